//! HTTP transfer provider client with multi-URL failover

use crate::config::TransferConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::transfer::{
    SwapId, SwapStatus, TransferIntent, TransferProvider, TransferSnapshot, TransferTicket,
};

use async_trait::async_trait;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Transfer provider client over camelCase JSON, with failover across the
/// configured URLs. Transport errors rotate to the next URL; an answered
/// request, success or not, never does.
pub struct HttpTransferProvider {
    client: reqwest::Client,
    base_urls: Vec<String>,
    current: AtomicUsize,
}

impl HttpTransferProvider {
    pub fn new(config: &TransferConfig) -> OrchestratorResult<Self> {
        if config.api_urls.is_empty() {
            return Err(OrchestratorError::Config(
                "No transfer provider URLs configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        let base_urls = config
            .api_urls
            .iter()
            .map(|u| u.trim_end_matches('/').to_string())
            .collect();

        Ok(Self {
            client,
            base_urls,
            current: AtomicUsize::new(0),
        })
    }

    /// Get the active base URL
    fn base_url(&self) -> &str {
        let idx = self.current.load(Ordering::Relaxed);
        &self.base_urls[idx % self.base_urls.len()]
    }

    /// Switch to the next configured URL
    fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.base_urls.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Transfer provider failover to {}", self.base_urls[next]);
    }
}

#[async_trait]
impl TransferProvider for HttpTransferProvider {
    async fn handle_transfer(
        &self,
        intent: &TransferIntent,
    ) -> OrchestratorResult<Option<TransferTicket>> {
        let body = TransferRequestDto::from(intent);
        let mut last_error = None;

        for _ in 0..self.base_urls.len() {
            let url = format!("{}/v1/transfers", self.base_url());
            match self.client.post(&url).json(&body).send().await {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(OrchestratorError::Transfer(format!(
                            "transfer initiation returned {}",
                            response.status()
                        )));
                    }
                    let accepted: TransferAcceptedDto = response.json().await?;
                    let ticket = match accepted.ticket {
                        Some(t) if accepted.accepted => Some(TransferTicket::new(t)),
                        _ => None,
                    };
                    debug!(
                        "Transfer initiation for {} -> {}: accepted={}",
                        intent.from_chain_id,
                        intent.to_chain_id,
                        ticket.is_some()
                    );
                    return Ok(ticket);
                }
                Err(e) => {
                    warn!("Transfer initiation request failed: {}", e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(last_error
            .map(OrchestratorError::from)
            .unwrap_or_else(|| {
                OrchestratorError::Transfer("all transfer provider URLs failed".to_string())
            }))
    }

    async fn snapshot(&self, ticket: &TransferTicket) -> OrchestratorResult<TransferSnapshot> {
        let mut last_error = None;

        for _ in 0..self.base_urls.len() {
            let url = format!("{}/v1/transfers/{}", self.base_url(), ticket);
            match self.client.get(&url).send().await {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(OrchestratorError::Transfer(format!(
                            "snapshot for ticket {} returned {}",
                            ticket,
                            response.status()
                        )));
                    }
                    let dto: TransferSnapshotDto = response.json().await?;
                    return Ok(dto.into_snapshot());
                }
                Err(e) => {
                    warn!("Transfer snapshot request failed: {}", e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(last_error
            .map(OrchestratorError::from)
            .unwrap_or_else(|| {
                OrchestratorError::Transfer("all transfer provider URLs failed".to_string())
            }))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequestDto {
    from_chain_id: u64,
    from_token: Address,
    to_chain_id: u64,
    to_token: Address,
    amount: String,
}

impl From<&TransferIntent> for TransferRequestDto {
    fn from(intent: &TransferIntent) -> Self {
        Self {
            from_chain_id: intent.from_chain_id,
            from_token: intent.from_token,
            to_chain_id: intent.to_chain_id,
            to_token: intent.to_token,
            amount: intent.amount.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TransferAcceptedDto {
    accepted: bool,
    ticket: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TransferSnapshotDto {
    amount: String,
    receive_amount: String,
    swap_id: Option<String>,
    swap_status: Option<SwapStatusDto>,
    is_tracking: bool,
    is_processing: bool,
}

#[derive(Debug, Deserialize)]
struct SwapStatusDto {
    status: String,
}

impl TransferSnapshotDto {
    fn into_snapshot(self) -> TransferSnapshot {
        let status = self
            .swap_status
            .as_ref()
            .and_then(|s| parse_status(&s.status));
        TransferSnapshot {
            amount: self.amount,
            receive_amount: self.receive_amount,
            swap_id: self.swap_id.map(SwapId::new),
            status,
            is_tracking: self.is_tracking,
            is_processing: self.is_processing,
        }
    }
}

/// Map a provider status string onto the known lifecycle. Unknown statuses
/// are treated as no status so the flow neither advances nor fails on them.
fn parse_status(raw: &str) -> Option<SwapStatus> {
    match raw.to_ascii_uppercase().as_str() {
        "PENDING" => Some(SwapStatus::Pending),
        "IN_PROGRESS" | "PROCESSING" => Some(SwapStatus::InProgress),
        "COMPLETED" | "SUCCESS" => Some(SwapStatus::Completed),
        "FAILED" => Some(SwapStatus::Failed),
        "REFUNDED" => Some(SwapStatus::Refunded),
        other => {
            warn!("Unknown swap status from provider: {}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(urls: &[&str]) -> TransferConfig {
        TransferConfig {
            api_urls: urls.iter().map(|u| u.to_string()).collect(),
            request_timeout_ms: 1000,
        }
    }

    #[test]
    fn test_failover_rotates_urls() {
        let provider = HttpTransferProvider::new(&config(&[
            "http://a.example",
            "http://b.example/",
            "http://c.example",
        ]))
        .unwrap();

        assert_eq!(provider.base_url(), "http://a.example");
        provider.failover();
        assert_eq!(provider.base_url(), "http://b.example");
        provider.failover();
        assert_eq!(provider.base_url(), "http://c.example");
        provider.failover();
        assert_eq!(provider.base_url(), "http://a.example");
    }

    #[test]
    fn test_rejects_empty_url_list() {
        assert!(HttpTransferProvider::new(&config(&[])).is_err());
    }

    #[test]
    fn test_snapshot_dto_maps_wire_fields() {
        let json = r#"{
            "amount": "250.0",
            "receiveAmount": "249.1",
            "swapId": "swap-77",
            "swapStatus": { "status": "IN_PROGRESS" },
            "isTracking": true,
            "isProcessing": true
        }"#;

        let dto: TransferSnapshotDto = serde_json::from_str(json).unwrap();
        let snapshot = dto.into_snapshot();

        assert_eq!(snapshot.receive_amount, "249.1");
        assert_eq!(snapshot.swap_id, Some(SwapId::new("swap-77")));
        assert_eq!(snapshot.status, Some(SwapStatus::InProgress));
        assert!(snapshot.is_tracking);
    }

    #[test]
    fn test_snapshot_dto_tolerates_missing_fields() {
        let dto: TransferSnapshotDto = serde_json::from_str(r#"{"isProcessing": true}"#).unwrap();
        let snapshot = dto.into_snapshot();

        assert!(snapshot.amount.is_empty());
        assert!(snapshot.swap_id.is_none());
        assert!(snapshot.status.is_none());
        assert!(!snapshot.is_tracking);
        assert!(snapshot.is_processing);
    }

    #[test]
    fn test_unknown_status_maps_to_none() {
        assert_eq!(parse_status("completed"), Some(SwapStatus::Completed));
        assert_eq!(parse_status("BRIDGING"), None);
    }

    #[test]
    fn test_accepted_dto_defaults_to_declined() {
        let dto: TransferAcceptedDto = serde_json::from_str("{}").unwrap();
        assert!(!dto.accepted);
        assert!(dto.ticket.is_none());
    }
}
