//! Cross-chain transfer provider contract
//!
//! The orchestrator never executes swaps itself. It hands an intent to an
//! external transfer provider and then observes that provider's reported
//! state until the swap reaches a terminal status.

pub mod http;
pub mod watcher;

pub use http::HttpTransferProvider;
pub use watcher::diff_snapshots;

use crate::error::OrchestratorResult;
use async_trait::async_trait;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status the provider reports for a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Refunded,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Failed | SwapStatus::Refunded
        )
    }

    /// Terminal without delivering funds to the destination.
    pub fn is_failure(self) -> bool {
        matches!(self, SwapStatus::Failed | SwapStatus::Refunded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwapStatus::Pending => "PENDING",
            SwapStatus::InProgress => "IN_PROGRESS",
            SwapStatus::Completed => "COMPLETED",
            SwapStatus::Failed => "FAILED",
            SwapStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque provider-assigned swap identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwapId(String);

impl SwapId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-side handle for an accepted transfer. Distinct from [`SwapId`]:
/// the ticket exists from acceptance, the swap id only once execution starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferTicket(String);

impl TransferTicket {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TransferTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observation of the provider's state for a ticket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferSnapshot {
    /// Source-side amount the provider is swapping.
    pub amount: String,
    /// Destination-side amount quoted or delivered. Empty until quoted.
    pub receive_amount: String,
    pub swap_id: Option<SwapId>,
    pub status: Option<SwapStatus>,
    /// Provider is actively tracking swap execution.
    pub is_tracking: bool,
    /// Provider is doing work for this ticket (quoting, signing, tracking).
    pub is_processing: bool,
}

/// Initiation request for a cross-chain transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferIntent {
    pub from_chain_id: u64,
    pub from_token: Address,
    pub to_chain_id: u64,
    pub to_token: Address,
    pub amount: String,
}

/// External service that executes cross-chain transfers.
#[async_trait]
pub trait TransferProvider: Send + Sync {
    /// Ask the provider to start a transfer. `Ok(None)` means the provider
    /// declined without error (e.g. user rejected the signature); the flow
    /// resets silently in that case.
    async fn handle_transfer(
        &self,
        intent: &TransferIntent,
    ) -> OrchestratorResult<Option<TransferTicket>>;

    /// Current provider state for an accepted transfer.
    async fn snapshot(&self, ticket: &TransferTicket) -> OrchestratorResult<TransferSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(!SwapStatus::Pending.is_terminal());
        assert!(!SwapStatus::InProgress.is_terminal());
        assert!(SwapStatus::Completed.is_terminal());
        assert!(SwapStatus::Failed.is_terminal());
        assert!(SwapStatus::Refunded.is_terminal());

        assert!(!SwapStatus::Completed.is_failure());
        assert!(SwapStatus::Failed.is_failure());
        assert!(SwapStatus::Refunded.is_failure());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&SwapStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let back: SwapStatus = serde_json::from_str("\"REFUNDED\"").unwrap();
        assert_eq!(back, SwapStatus::Refunded);
    }
}
