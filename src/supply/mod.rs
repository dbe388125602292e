//! Supply planning contract
//!
//! The orchestrator decides when a supply fires; an external planner decides
//! how (transaction building, signing, submission). Health-factor preview is
//! a capability some planners lack, and its absence never blocks a supply.

pub mod dispatcher;
pub mod http;

pub use dispatcher::SupplyDispatcher;
pub use http::HttpSupplyPlanner;

use crate::error::OrchestratorResult;
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// On-chain supply request handed to the planner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyRequest {
    pub chain_id: u64,
    /// Lending pool receiving the deposit.
    pub pool: Address,
    pub token: Address,
    /// Token base units (human amount scaled by the token's decimals).
    pub amount: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_behalf_of: Option<Address>,
}

/// Planner's answer for an accepted supply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyReceipt {
    pub tx_hash: H256,
    #[serde(default)]
    pub health_factor_after: Option<String>,
}

/// Predicted account health around a supply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthFactorDelta {
    pub before: String,
    pub after: String,
}

/// External service that turns supply requests into transactions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SupplyPlanner: Send + Sync {
    async fn supply(&self, request: &SupplyRequest) -> OrchestratorResult<SupplyReceipt>;
}

/// Optional planner capability: predict account health around a supply.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthFactorPreview: Send + Sync {
    async fn preview(&self, request: &SupplyRequest) -> OrchestratorResult<HealthFactorDelta>;
}

/// Capabilities the configured planner offers beyond plain supply.
#[derive(Clone, Default)]
pub struct SupplyCapabilities {
    pub health_factor: Option<Arc<dyn HealthFactorPreview>>,
}
