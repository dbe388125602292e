//! HTTP supply planner client
//!
//! One client serves both trait seams: every planner deployment answers
//! `/v1/supply`, and those built with preview support answer
//! `/v1/supply/preview` as well. Whether the preview capability is wired up
//! is a configuration decision made in `main`.

use crate::config::SupplyConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::supply::{
    HealthFactorDelta, HealthFactorPreview, SupplyPlanner, SupplyReceipt, SupplyRequest,
};

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct HttpSupplyPlanner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSupplyPlanner {
    pub fn new(config: &SupplyConfig) -> OrchestratorResult<Self> {
        if config.planner_url.is_empty() {
            return Err(OrchestratorError::Config(
                "No supply planner URL configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.planner_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SupplyPlanner for HttpSupplyPlanner {
    async fn supply(&self, request: &SupplyRequest) -> OrchestratorResult<SupplyReceipt> {
        let url = format!("{}/v1/supply", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(OrchestratorError::Supply(format!(
                "planner returned {}",
                response.status()
            )));
        }

        let receipt: SupplyReceipt = response.json().await?;
        debug!(
            "Planner accepted supply on chain {}: tx {:?}",
            request.chain_id, receipt.tx_hash
        );
        Ok(receipt)
    }
}

#[async_trait]
impl HealthFactorPreview for HttpSupplyPlanner {
    async fn preview(&self, request: &SupplyRequest) -> OrchestratorResult<HealthFactorDelta> {
        let url = format!("{}/v1/supply/preview", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(OrchestratorError::Supply(format!(
                "preview returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}
