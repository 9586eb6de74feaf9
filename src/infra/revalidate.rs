//! Outbound revalidation webhook.
//!
//! After a mutation the front-end process is told which invalidation tags
//! went stale. Delivery is best effort: every failure is logged and turned
//! into an unsuccessful [`RevalidateOutcome`], nothing is retried and the
//! mutation that caused it is never rolled back.

use std::time::Duration;

use metrics::counter;
use reqwest::{Client, Url, header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::signature::{SIGNATURE_HEADER, sign_body};
use crate::config::RevalidationSettings;

pub(crate) const METRIC_REVALIDATE_SUCCESS_TOTAL: &str = "resort_revalidate_success_total";
pub(crate) const METRIC_REVALIDATE_FAILURE_TOTAL: &str = "resort_revalidate_failure_total";

/// Exact webhook body: `{"tags":[...]}`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RevalidatePayload {
    pub tags: Vec<String>,
}

/// Result of one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevalidateOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RevalidateOutcome {
    fn delivered(status: u16) -> Self {
        Self {
            success: true,
            status: Some(status),
            message: None,
        }
    }

    fn skipped(message: &str) -> Self {
        Self {
            success: true,
            status: None,
            message: Some(message.to_string()),
        }
    }

    fn failed(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to build webhook client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("revalidation.{0} is required when revalidation.endpoint is set")]
    Missing(&'static str),
}

#[derive(Clone)]
pub struct RevalidationDispatcher {
    client: Client,
    endpoint: Url,
    secret: String,
    session_token: String,
}

impl RevalidationDispatcher {
    pub fn new(
        endpoint: Url,
        secret: impl Into<String>,
        session_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .user_agent(concat!("resort-cache/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            secret: secret.into(),
            session_token: session_token.into(),
        })
    }

    /// Dispatcher for the configured endpoint, `None` when no endpoint is set.
    pub fn from_settings(settings: &RevalidationSettings) -> Result<Option<Self>, DispatchError> {
        let Some(endpoint) = settings.endpoint.clone() else {
            return Ok(None);
        };
        let secret = settings
            .secret
            .clone()
            .ok_or(DispatchError::Missing("secret"))?;
        let session_token = settings
            .session_token
            .clone()
            .ok_or(DispatchError::Missing("session_token"))?;
        Self::new(endpoint, secret, session_token, settings.timeout).map(Some)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST the signed tag list. Never fails; inspect the outcome instead.
    pub async fn revalidate_tags(&self, tags: &[String]) -> RevalidateOutcome {
        if tags.is_empty() {
            debug!(endpoint = %self.endpoint, "No tags to revalidate");
            return RevalidateOutcome::skipped("no tags");
        }

        let outcome = self.dispatch(tags).await;
        if outcome.success {
            counter!(METRIC_REVALIDATE_SUCCESS_TOTAL).increment(1);
            debug!(
                endpoint = %self.endpoint,
                tags = ?tags,
                status = outcome.status,
                "Revalidation delivered"
            );
        } else {
            counter!(METRIC_REVALIDATE_FAILURE_TOTAL).increment(1);
            warn!(
                endpoint = %self.endpoint,
                tags = ?tags,
                status = outcome.status,
                error = outcome.message.as_deref().unwrap_or_default(),
                "Revalidation failed"
            );
        }
        outcome
    }

    async fn dispatch(&self, tags: &[String]) -> RevalidateOutcome {
        let payload = RevalidatePayload {
            tags: tags.to_vec(),
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(err) => return RevalidateOutcome::failed(None, format!("encode: {err}")),
        };
        let signature = match sign_body(&self.secret, &body) {
            Ok(signature) => signature,
            Err(err) => return RevalidateOutcome::failed(None, format!("sign: {err}")),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.session_token)
            .header(header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                RevalidateOutcome::delivered(response.status().as_u16())
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                RevalidateOutcome::failed(
                    Some(status.as_u16()),
                    format!("status {status}: {}", truncate(&text, 200)),
                )
            }
            Err(err) => RevalidateOutcome::failed(err.status().map(|s| s.as_u16()), err.to_string()),
        }
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
