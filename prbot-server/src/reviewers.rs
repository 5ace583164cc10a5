//! Reviewer pool API.
//!
//! Every route requires `Authorization: Bearer <ADMIN_AUTH_TOKEN>`. Without a
//! configured token the whole API answers 503.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use prbot_core::{BalancerError, Reviewer};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;

/// Largest score the reviewer database can record as a workload.
const MAX_SCORE: u64 = i64::MAX as u64;

#[derive(Debug, Serialize)]
pub struct AssignResponse {
    pub name: String,
    pub contact_handle: String,
    pub workload_before: u64,
    pub score: u64,
    pub rebalanced: bool,
}

/// HTTP status for a core error: selection failures are the caller's pool, store
/// failures are ours.
pub fn status_for(err: &BalancerError) -> StatusCode {
    match err {
        BalancerError::EmptyPool | BalancerError::NoEligibleReviewer { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        BalancerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: BalancerError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Reviewer store failure: {}", err);
    }
    (status, err.to_string()).into_response()
}

fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> Result<(), Response> {
    let Some(expected_token) = auth_token else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Reviewer API is disabled (ADMIN_AUTH_TOKEN not configured)",
        )
            .into_response());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header.map(|value| value.strip_prefix("Bearer ")) {
        Some(Some(provided_token)) if provided_token == expected_token => Ok(()),
        Some(Some(_)) => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
        Some(None) => Err((
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header format. Expected: Bearer <token>",
        )
            .into_response()),
        None => Err((
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header. Expected: Bearer <token>",
        )
            .into_response()),
    }
}

/// Handler: GET /reviewers
pub async fn list_reviewers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Reviewer>>, Response> {
    validate_auth(&headers, &state.admin_auth_token)?;

    state.balancer.pool().await.map(Json).map_err(error_response)
}

/// Handler: POST /reviewers/assign/{author}/{score}
///
/// Runs one balanced assignment, keeping `author` off the review.
pub async fn assign_reviewer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((author, score)): Path<(String, u64)>,
) -> Result<Json<AssignResponse>, Response> {
    validate_auth(&headers, &state.admin_auth_token)?;

    if score > MAX_SCORE {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Score must be at most {}", MAX_SCORE),
        )
            .into_response());
    }

    info!("Manual assignment of score {} (author: {})", score, author);
    let assignment = state
        .balancer
        .assign(score, Some(&author))
        .await
        .map_err(error_response)?;

    Ok(Json(AssignResponse {
        name: assignment.assignee.name,
        contact_handle: assignment.assignee.contact_handle,
        workload_before: assignment.assignee.workload,
        score: assignment.score,
        rebalanced: assignment.rebalanced,
    }))
}

/// Handler: POST /reviewers/random
pub async fn random_reviewer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Reviewer>, Response> {
    validate_auth(&headers, &state.admin_auth_token)?;

    state
        .balancer
        .pick_random()
        .await
        .map(Json)
        .map_err(error_response)
}

pub fn reviewers_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reviewers", get(list_reviewers))
        .route("/reviewers/assign/{author}/{score}", post(assign_reviewer))
        .route("/reviewers/random", post(random_reviewer))
}
