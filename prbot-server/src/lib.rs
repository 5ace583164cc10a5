pub mod board;
pub mod chat;
pub mod config;
pub mod github;
pub mod outbound;
pub mod reviewers;
pub mod service;
pub mod webhook;

use std::sync::Arc;

use prbot_core::ReviewerBalancer;

pub use chat::ChatClient;
pub use config::{AssignmentMode, Config};
pub use github::GitHubClient;
pub use outbound::{CorrelationId, CORRELATION_ID_HEADER};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(git_hash: &str) -> String {
    git_hash.chars().take(8).collect()
}

pub fn get_bot_version() -> String {
    if let Some(git_hash) = option_env!("PRBOT_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        "unknown".to_string()
    }
}

pub struct AppState {
    pub github_client: Arc<GitHubClient>,
    pub chat_client: Arc<ChatClient>,
    pub balancer: Arc<ReviewerBalancer>,
    pub webhook_secret: String,
    pub assignment_mode: AssignmentMode,
    pub team_reviewer: Option<String>,
    pub project_name: String,
    pub star_milestone: u64,
    pub admin_auth_token: Option<String>,
}

impl AppState {
    pub fn from_config(config: &Config, balancer: Arc<ReviewerBalancer>) -> anyhow::Result<Self> {
        let github_client = GitHubClient::new(
            config.github_api_url.clone(),
            config.github_token.clone(),
            config.github_owner.clone(),
            config.github_repo.clone(),
        )?;
        let chat_client = ChatClient::new(config.chat_webhook_url.clone())?;

        Ok(Self {
            github_client: Arc::new(github_client),
            chat_client: Arc::new(chat_client),
            balancer,
            webhook_secret: config.github_webhook_secret.clone(),
            assignment_mode: config.assignment_mode,
            team_reviewer: config.team_reviewer.clone(),
            project_name: config.project_name.clone(),
            star_milestone: config.star_milestone,
            admin_auth_token: config.admin_auth_token.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::{
        extract::{Request, State},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        Router,
    };
    use prbot_core::{InMemoryStore, Reviewer};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    pub const WEBHOOK_SECRET: &str = "webhook-secret";
    pub const ADMIN_TOKEN: &str = "admin-token";
    pub const PROJECT_NAME: &str = "Sprint";

    /// Nothing listens on port 1, so every outbound call fails fast.
    pub const UNREACHABLE: &str = "http://127.0.0.1:1";

    /// Column ids served by [`FakeUpstream`], in board order.
    pub const BACKLOG_ID: u64 = 1;
    pub const IN_PROGRESS_ID: u64 = 2;
    pub const IN_REVIEW_ID: u64 = 3;
    pub const PENDING_RELEASE_ID: u64 = 4;

    pub fn store_with(reviewers: Vec<Reviewer>) -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::with_reviewers(reviewers).unwrap())
    }

    pub fn state_with(
        store: Arc<InMemoryStore>,
        assignment_mode: AssignmentMode,
        admin_auth_token: Option<&str>,
    ) -> Arc<AppState> {
        state_against(UNREACHABLE, store, assignment_mode, admin_auth_token, None)
    }

    /// App state whose GitHub API and chat webhook both live under `base_url`.
    pub fn state_against(
        base_url: &str,
        store: Arc<InMemoryStore>,
        assignment_mode: AssignmentMode,
        admin_auth_token: Option<&str>,
        team_reviewer: Option<&str>,
    ) -> Arc<AppState> {
        Arc::new(AppState {
            github_client: Arc::new(
                GitHubClient::new(base_url, "token", "acme", "widgets").unwrap(),
            ),
            chat_client: Arc::new(ChatClient::new(format!("{}/hook", base_url)).unwrap()),
            balancer: Arc::new(ReviewerBalancer::new(store)),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            assignment_mode,
            team_reviewer: team_reviewer.map(str::to_string),
            project_name: PROJECT_NAME.to_string(),
            star_milestone: 100,
            admin_auth_token: admin_auth_token.map(str::to_string),
        })
    }

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub method: String,
        pub path: String,
        pub correlation_id: Option<String>,
        pub body: Value,
    }

    #[derive(Debug, Clone)]
    pub struct ExistingCard {
        pub column_id: u64,
        pub card_id: u64,
        pub content_url: String,
    }

    #[derive(Debug, Clone, Default)]
    pub struct FakeOptions {
        pub stargazers: u64,
        pub existing_card: Option<ExistingCard>,
    }

    struct FakeState {
        options: FakeOptions,
        calls: Mutex<Vec<RecordedCall>>,
    }

    /// In-process stand-in for the GitHub REST API and the chat webhook.
    pub struct FakeUpstream {
        pub base_url: String,
        state: Arc<FakeState>,
    }

    impl FakeUpstream {
        pub async fn start(options: FakeOptions) -> Self {
            let state = Arc::new(FakeState {
                options,
                calls: Mutex::new(Vec::new()),
            });
            let app = Router::new().fallback(fake_upstream).with_state(state.clone());

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                base_url: format!("http://{}", addr),
                state,
            }
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.state.calls.lock().unwrap().clone()
        }

        pub fn find(&self, method: &str, path: &str) -> Option<RecordedCall> {
            self.calls()
                .into_iter()
                .find(|c| c.method == method && c.path == path)
        }
    }

    async fn fake_upstream(State(fake): State<Arc<FakeState>>, request: Request) -> Response {
        let method = request.method().to_string();
        let path = request.uri().path().to_string();
        let correlation_id = request
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        fake.calls.lock().unwrap().push(RecordedCall {
            method: method.clone(),
            path: path.clone(),
            correlation_id,
            body,
        });

        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match (method.as_str(), segments.as_slice()) {
            ("GET", ["repos", _, _]) => {
                Json(json!({ "stargazers_count": fake.options.stargazers })).into_response()
            }
            ("GET", ["repos", _, _, "projects"]) => {
                Json(json!([{ "id": 1, "name": PROJECT_NAME }])).into_response()
            }
            ("GET", ["projects", "1", "columns"]) => Json(json!([
                { "id": BACKLOG_ID, "name": "Backlog" },
                { "id": IN_PROGRESS_ID, "name": "In progress" },
                { "id": IN_REVIEW_ID, "name": "In review" },
                { "id": PENDING_RELEASE_ID, "name": "Pending release" }
            ]))
            .into_response(),
            ("GET", ["projects", "columns", column, "cards"]) => {
                let column: u64 = column.parse().unwrap_or(0);
                let cards: Vec<Value> = fake
                    .options
                    .existing_card
                    .iter()
                    .filter(|card| card.column_id == column)
                    .map(|card| json!({ "id": card.card_id, "content_url": card.content_url }))
                    .collect();
                Json(cards).into_response()
            }
            ("POST", ["projects", "columns", "cards", _, "moves"]) => {
                (StatusCode::CREATED, Json(json!({}))).into_response()
            }
            ("POST", ["projects", "columns", _, "cards"]) => {
                (StatusCode::CREATED, Json(json!({ "id": 99 }))).into_response()
            }
            ("POST", ["repos", _, _, "issues", _, "labels"]) => Json(json!([])).into_response(),
            ("POST", ["repos", _, _, "pulls", _, "requested_reviewers"]) => {
                (StatusCode::CREATED, Json(json!({}))).into_response()
            }
            ("POST", ["hook"]) => "ok".into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }
}
