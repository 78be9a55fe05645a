use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const COMPLETION_STATUS: &str = "Processing complete";

/// Body of the completion webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionEvent {
    pub job_id: Uuid,
    pub status: String,
}

impl CompletionEvent {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: COMPLETION_STATUS.to_string(),
        }
    }
}

/// Announces that a job has finished.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, job_id: Uuid) -> Result<(), NotifyError>;
}

/// Posts [`CompletionEvent`]s to a configured URL. Best effort: one attempt,
/// bounded by the client timeout.
pub struct WebhookNotifier {
    http: Client,
    webhook_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, webhook_url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, job_id: Uuid) -> Result<(), NotifyError> {
        let Some(url) = &self.webhook_url else {
            tracing::debug!(job_id = %job_id, "No webhook configured, skipping notification");
            return Ok(());
        };

        let response = self
            .http
            .post(url)
            .json(&CompletionEvent::new(job_id))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        tracing::info!(job_id = %job_id, webhook_url = %url, "Completion webhook delivered");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook endpoint returned HTTP {0}")]
    Status(u16),
}
