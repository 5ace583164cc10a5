//! Outbound HTTP plumbing shared by the GitHub and chat clients.
//!
//! Every request gets an `X-Correlation-ID` header (taken from the inbound
//! webhook when there is one) and is logged with its status and latency.
//! Query strings are never logged: chat webhook URLs carry their token there.

use anyhow::{Context, Result};
use axum::http;
use reqwest::{Client, Request, Response, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Header name for correlation ID propagation.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Correlation ID attached to an inbound request's extensions.
#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Which downstream service a client talks to, for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    GitHub,
    Chat,
}

impl ServiceType {
    fn as_str(&self) -> &'static str {
        match self {
            ServiceType::GitHub => "github",
            ServiceType::Chat => "chat",
        }
    }
}

pub struct OutboundLogMiddleware {
    service_type: ServiceType,
}

impl OutboundLogMiddleware {
    pub fn new(service_type: ServiceType) -> Self {
        Self { service_type }
    }
}

#[async_trait::async_trait]
impl Middleware for OutboundLogMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let correlation_id = match req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => existing.to_string(),
            None => {
                let generated = CorrelationId::generate();
                if let Ok(value) = generated.0.parse() {
                    req.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }
                generated.0
            }
        };

        let method = req.method().clone();
        let target = redact_url(req.url());
        let started = Instant::now();

        let response = next.run(req, extensions).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &response {
            Ok(resp) => info!(
                service = self.service_type.as_str(),
                correlation_id = %correlation_id,
                "{} {} -> {} ({} ms)",
                method,
                target,
                resp.status().as_u16(),
                elapsed_ms
            ),
            Err(e) => warn!(
                service = self.service_type.as_str(),
                correlation_id = %correlation_id,
                "{} {} failed after {} ms: {}",
                method,
                target,
                elapsed_ms,
                e
            ),
        }

        response
    }
}

/// Scheme, host and path of a URL, without query or credentials.
pub fn redact_url(url: &Url) -> String {
    format!(
        "{}://{}{}",
        url.scheme(),
        url.host_str().unwrap_or("unknown"),
        url.path()
    )
}

pub fn create_client(service_type: ServiceType) -> Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(format!("prbot/{}", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    Ok(ClientBuilder::new(client)
        .with(OutboundLogMiddleware::new(service_type))
        .build())
}
