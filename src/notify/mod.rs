//! User-facing notifications
//!
//! Terminal swap failures surface to the user even though the flow resets
//! itself. The trait seam lets deployments swap the sink without touching
//! the engine.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::position::PositionForm;
use crate::transfer::SwapStatus;

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Sink for user-visible flow notifications.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserNotifier: Send + Sync {
    /// The swap backing a session ended without delivering funds.
    async fn swap_failed(
        &self,
        session: Uuid,
        status: SwapStatus,
        form: &PositionForm,
    ) -> OrchestratorResult<()>;
}

fn failure_message(session: Uuid, status: SwapStatus, form: &PositionForm) -> String {
    let reserve = form
        .destination()
        .token
        .as_ref()
        .map(|t| t.symbol.as_str())
        .unwrap_or("reserve");
    let outcome = match status {
        SwapStatus::Refunded => "was refunded at the source",
        _ => "failed before delivery",
    };
    format!(
        "Swap for {} supply (session {}) {}. The deposit was not started and the source selection was reset.",
        reserve, session, outcome
    )
}

/// Default notifier: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl UserNotifier for LogNotifier {
    async fn swap_failed(
        &self,
        session: Uuid,
        status: SwapStatus,
        form: &PositionForm,
    ) -> OrchestratorResult<()> {
        warn!("{}", failure_message(session, status, form));
        Ok(())
    }
}

/// Notifier posting to a Slack-compatible webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl UserNotifier for WebhookNotifier {
    async fn swap_failed(
        &self,
        session: Uuid,
        status: SwapStatus,
        form: &PositionForm,
    ) -> OrchestratorResult<()> {
        let body = serde_json::json!({
            "text": failure_message(session, status, form),
        });

        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(OrchestratorError::Notification(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
