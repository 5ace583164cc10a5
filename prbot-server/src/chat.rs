use anyhow::{anyhow, Context, Result};
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use tracing::{error, info};

use crate::outbound::{create_client, ServiceType, CORRELATION_ID_HEADER};

/// Incoming-webhook client for the team chat room.
#[derive(Clone)]
pub struct ChatClient {
    client: ClientWithMiddleware,
    webhook_url: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    #[serde(rename = "Content")]
    content: &'a str,
}

impl ChatClient {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: create_client(ServiceType::Chat)?,
            webhook_url: webhook_url.into(),
        })
    }

    pub async fn post_message(&self, correlation_id: Option<&str>, content: &str) -> Result<()> {
        let mut request_builder = self
            .client
            .post(&self.webhook_url)
            .json(&ChatMessage { content });

        if let Some(cid) = correlation_id {
            request_builder = request_builder.header(CORRELATION_ID_HEADER, cid);
        }

        let response = request_builder
            .send()
            .await
            .context("Failed to send chat message")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("Chat webhook error: {} - {}", status, error_text);
            return Err(anyhow!("Chat webhook error: {} - {}", status, error_text));
        }

        info!("Posted chat message ({} bytes)", content.len());
        Ok(())
    }
}

pub fn review_request_message(pr_url: &str, contact_handle: &str) -> String {
    format!(
        "A new pull-request is created: {} @{} please review 🙏",
        pr_url, contact_handle
    )
}

pub fn star_milestone_message(stars: u64) -> String {
    format!("@Present Congrat our repo has {} stars now 🎊", stars)
}

/// True for positive multiples of `every`. A zero interval never fires.
pub fn is_star_milestone(stars: u64, every: u64) -> bool {
    every != 0 && stars != 0 && stars % every == 0
}
