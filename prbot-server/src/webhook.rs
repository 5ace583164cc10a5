use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use prbot_core::{ChangeSize, Reviewer};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::board::{self, BoardItem, CardAction};
use crate::chat::{is_star_milestone, review_request_message, star_milestone_message};
use crate::reviewers::status_for;
use crate::{AppState, AssignmentMode, CorrelationId};

pub const BREAKING_CHANGE_LABEL: &str = "type/breaking-change";

/// GitHub caps webhook payloads at 25 MB; anything larger is not from GitHub.
const MAX_WEBHOOK_BODY_SIZE: usize = 25 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub html_url: String,
    /// API URL of the issue backing this PR; project cards refer to it.
    pub issue_url: String,
    pub user: User,
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct StarEvent {
    pub action: String,
    pub repository: Option<Repository>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub full_name: Option<String>,
    pub stargazers_count: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct IntakeResponse {
    pub pr_number: u64,
    pub reviewer: String,
    pub contact_handle: String,
    pub score: u64,
    /// False in random mode, where nobody's workload changes.
    pub credited: bool,
    pub breaking_change: bool,
    pub card: CardAction,
}

#[derive(Debug, Serialize)]
pub struct IntakeFailure {
    pub message: String,
    pub step: IntakeStep,
    /// Set once a reviewer has been chosen (and, in balanced mode, credited).
    pub reviewer: Option<String>,
}

/// Outbound steps of PR intake that can fail after the event was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStep {
    Label,
    RequestReviewers,
    Notify,
    Board,
}

impl fmt::Display for IntakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntakeStep::Label => "label",
            IntakeStep::RequestReviewers => "request reviewers",
            IntakeStep::Notify => "chat notification",
            IntakeStep::Board => "task board",
        };
        f.write_str(name)
    }
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_WEBHOOK_BODY_SIZE)
        .await
        .map_err(|_| {
            error!("Webhook body too large or read error");
            StatusCode::PAYLOAD_TOO_LARGE
        })?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            warn!("Webhook without signature rejected");
            StatusCode::UNAUTHORIZED
        })?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    // GitHub's delivery ID doubles as the correlation ID when present
    let correlation_id = parts
        .headers
        .get("x-github-delivery")
        .and_then(|h| h.to_str().ok())
        .map(|id| CorrelationId(id.to_string()))
        .unwrap_or_else(CorrelationId::generate);

    let mut new_request = Request::from_parts(parts, axum::body::Body::from(bytes));
    new_request.extensions_mut().insert(correlation_id);

    Ok(next.run(new_request).await)
}

pub fn is_breaking_change(title: &str) -> bool {
    title.contains("!:")
}

fn accepted(message: impl Into<String>) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            message: message.into(),
        }),
    )
        .into_response()
}

fn step_failed(step: IntakeStep, reviewer: Option<&Reviewer>, err: anyhow::Error) -> Response {
    error!("PR intake failed at {}: {:#}", step, err);
    (
        StatusCode::BAD_GATEWAY,
        Json(IntakeFailure {
            message: format!("{} failed: {:#}", step, err),
            step,
            reviewer: reviewer.map(|r| r.name.clone()),
        }),
    )
        .into_response()
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, StatusCode> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone());
    let cid = correlation_id.as_deref();

    let (parts, body) = request.into_parts();
    let event = parts
        .headers
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    // Size already bounded by the signature middleware
    let bytes = axum::body::to_bytes(body, MAX_WEBHOOK_BODY_SIZE)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    info!("Received '{}' webhook", event);

    match event.as_str() {
        "ping" => Ok((StatusCode::OK, "pong").into_response()),
        "pull_request" => {
            let payload: PullRequestEvent = serde_json::from_slice(&bytes).map_err(|e| {
                warn!("Malformed pull_request payload: {}", e);
                StatusCode::BAD_REQUEST
            })?;

            if payload.action != "opened" {
                return Ok(accepted(format!(
                    "Ignoring pull_request action '{}'",
                    payload.action
                )));
            }

            Ok(process_pull_request_opened(&state, cid, &payload.pull_request).await)
        }
        "star" => {
            let payload: StarEvent = serde_json::from_slice(&bytes).map_err(|e| {
                warn!("Malformed star payload: {}", e);
                StatusCode::BAD_REQUEST
            })?;

            if payload.action != "created" {
                return Ok(accepted(format!(
                    "Ignoring star action '{}'",
                    payload.action
                )));
            }

            Ok(process_star_created(&state, cid, payload.repository.as_ref()).await)
        }
        other => {
            info!("Ignoring unsupported event '{}'", other);
            Ok(accepted(format!("Ignoring event '{}'", other)))
        }
    }
}

async fn process_pull_request_opened(
    state: &AppState,
    correlation_id: Option<&str>,
    pr: &PullRequest,
) -> Response {
    info!(
        "PR #{} opened by {}: {}",
        pr.number, pr.user.login, pr.title
    );

    let breaking_change = is_breaking_change(&pr.title);
    if breaking_change {
        if let Err(e) = state
            .github_client
            .add_labels(correlation_id, pr.number, &[BREAKING_CHANGE_LABEL])
            .await
        {
            return step_failed(IntakeStep::Label, None, e);
        }
    }

    let change = ChangeSize::new(pr.additions, pr.deletions);
    let (reviewer, score, credited) = match state.assignment_mode {
        AssignmentMode::Balanced => {
            match state
                .balancer
                .assign_change(change, Some(&pr.user.login))
                .await
            {
                Ok(assignment) => (assignment.assignee, assignment.score, true),
                Err(e) => {
                    error!("Could not assign a reviewer to PR #{}: {}", pr.number, e);
                    return (status_for(&e), e.to_string()).into_response();
                }
            }
        }
        AssignmentMode::Random => match state.balancer.pick_random().await {
            Ok(reviewer) => (reviewer, change.score(), false),
            Err(e) => {
                error!("Could not pick a reviewer for PR #{}: {}", pr.number, e);
                return (status_for(&e), e.to_string()).into_response();
            }
        },
    };

    let reviewers = vec![reviewer.name.clone()];
    let team_reviewers: Vec<String> = state.team_reviewer.iter().cloned().collect();
    if let Err(e) = state
        .github_client
        .request_reviewers(correlation_id, pr.number, &reviewers, &team_reviewers)
        .await
    {
        return step_failed(IntakeStep::RequestReviewers, Some(&reviewer), e);
    }

    let message = review_request_message(&pr.html_url, &reviewer.contact_handle);
    if let Err(e) = state.chat_client.post_message(correlation_id, &message).await {
        return step_failed(IntakeStep::Notify, Some(&reviewer), e);
    }

    let item = BoardItem {
        id: pr.id,
        number: pr.number,
        issue_url: &pr.issue_url,
    };
    let card = match board::place_in_review(
        &state.github_client,
        correlation_id,
        &state.project_name,
        &item,
    )
    .await
    {
        Ok(card) => card,
        Err(e) => return step_failed(IntakeStep::Board, Some(&reviewer), e),
    };

    info!(
        "PR #{} assigned to {} (score {}, card {:?})",
        pr.number, reviewer.name, score, card
    );

    (
        StatusCode::CREATED,
        Json(IntakeResponse {
            pr_number: pr.number,
            reviewer: reviewer.name,
            contact_handle: reviewer.contact_handle,
            score,
            credited,
            breaking_change,
            card,
        }),
    )
        .into_response()
}

async fn process_star_created(
    state: &AppState,
    correlation_id: Option<&str>,
    repository: Option<&Repository>,
) -> Response {
    let stars = match repository.and_then(|r| r.stargazers_count) {
        Some(count) => count,
        None => match state.github_client.get_stargazers_count(correlation_id).await {
            Ok(count) => count,
            Err(e) => {
                error!("Could not read stargazer count: {:#}", e);
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(WebhookResponse {
                        message: format!("Failed to read stargazer count: {:#}", e),
                    }),
                )
                    .into_response();
            }
        },
    };

    if !is_star_milestone(stars, state.star_milestone) {
        return accepted(format!("{} stars, no milestone", stars));
    }

    info!(
        "{} reached {} stars",
        repository
            .and_then(|r| r.full_name.as_deref())
            .unwrap_or("repository"),
        stars
    );

    if let Err(e) = state
        .chat_client
        .post_message(correlation_id, &star_milestone_message(stars))
        .await
    {
        error!("Failed to announce star milestone: {:#}", e);
        return (
            StatusCode::BAD_GATEWAY,
            Json(WebhookResponse {
                message: format!("Failed to announce {} stars: {:#}", stars, e),
            }),
        )
            .into_response();
    }

    (
        StatusCode::CREATED,
        Json(WebhookResponse {
            message: format!("Announced {} stars", stars),
        }),
    )
        .into_response()
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}
