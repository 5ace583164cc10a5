use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::reviewers::reviewers_router;
use crate::webhook::webhook_router;
use crate::{get_bot_version, AppState};

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "prbot",
        "version": get_bot_version()
    }))
}

async fn help_handler() -> Json<Value> {
    Json(json!({
        "service": "prbot",
        "version": get_bot_version(),
        "description": "Assigns pull-request reviewers by workload, announces them in chat and keeps the task board current",
        "endpoints": [
            {
                "path": "/health",
                "method": "GET",
                "description": "Health check endpoint",
                "authentication": "None"
            },
            {
                "path": "/help",
                "method": "GET",
                "description": "API documentation and service information",
                "authentication": "None"
            },
            {
                "path": "/webhook",
                "method": "POST",
                "description": "GitHub webhook receiver for pull_request, star and ping events",
                "authentication": "GitHub webhook signature (X-Hub-Signature-256)"
            },
            {
                "path": "/reviewers",
                "method": "GET",
                "description": "Reviewer pool, least loaded first",
                "authentication": "Bearer ADMIN_AUTH_TOKEN"
            },
            {
                "path": "/reviewers/assign/{author}/{score}",
                "method": "POST",
                "description": "Credit a score to the least-loaded reviewer other than the author",
                "authentication": "Bearer ADMIN_AUTH_TOKEN"
            },
            {
                "path": "/reviewers/random",
                "method": "POST",
                "description": "Pick a reviewer uniformly at random",
                "authentication": "Bearer ADMIN_AUTH_TOKEN"
            }
        ],
        "features": [
            "Workload-balanced reviewer assignment with author exclusion",
            "Workload rebalancing once every reviewer passes the threshold",
            "Breaking-change labelling for conventional-commit titles",
            "Chat notification of the assigned reviewer",
            "Task board card placement in the In review column",
            "Star milestone announcements"
        ],
        "configuration": {
            "required_env_vars": [
                "GITHUB_TOKEN",
                "GITHUB_OWNER",
                "GITHUB_REPO",
                "GITHUB_WEBHOOK_SECRET",
                "CHAT_WEBHOOK_URL"
            ],
            "optional_env_vars": [
                "GITHUB_API_URL (default: https://api.github.com)",
                "TEAM_REVIEWER (default: none)",
                "ASSIGNMENT_MODE (default: balanced)",
                "PROJECT_NAME (default: Sprint 🏃‍♀️)",
                "STAR_MILESTONE (default: 100)",
                "PORT (default: 3000)",
                "STATE_DIR (default: current directory)",
                "ADMIN_AUTH_TOKEN (default: reviewer API disabled)"
            ]
        }
    }))
}

pub fn build_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/help", get(help_handler))
        .merge(webhook_router(app_state.clone()))
        .merge(reviewers_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{state_with, store_with};
    use crate::AssignmentMode;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        build_router(state_with(store_with(vec![]), AssignmentMode::Balanced, None))
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let response = router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "prbot");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_help_lists_every_route() {
        let (status, body) = get_json("/help").await;
        assert_eq!(status, StatusCode::OK);

        let paths: Vec<&str> = body["endpoints"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap())
            .collect();
        for path in ["/health", "/help", "/webhook", "/reviewers", "/reviewers/random"] {
            assert!(paths.contains(&path), "missing {}", path);
        }
    }

    #[tokio::test]
    async fn test_webhook_route_is_signature_guarded() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
