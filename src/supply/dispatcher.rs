//! Supply dispatch with flow-state and duplicate guards

use crate::config::Settings;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::flow::machine::OrchestrationState;
use crate::flow::session::FlowSession;
use crate::metrics;
use crate::position::PositionForm;
use crate::supply::{SupplyCapabilities, SupplyPlanner, SupplyRequest};

use ethers::types::Address;
use ethers::utils::{parse_units, ParseUnits};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Fires supply requests at the planner, enforcing the two rules the flow
/// depends on: supply only from Idle (direct) or ReadyToSupply, and at most
/// one dispatch per flow.
pub struct SupplyDispatcher {
    planner: Arc<dyn SupplyPlanner>,
    capabilities: SupplyCapabilities,
    /// Lending pool per chain id, from configuration.
    pools: HashMap<u64, Address>,
    on_behalf_of: Option<Address>,
}

impl SupplyDispatcher {
    pub fn new(
        planner: Arc<dyn SupplyPlanner>,
        capabilities: SupplyCapabilities,
        settings: &Settings,
    ) -> OrchestratorResult<Self> {
        let mut pools = HashMap::new();
        for (name, chain) in settings.enabled_chains() {
            if chain.pool_address.is_empty() {
                continue;
            }
            let pool = chain.pool_address.parse::<Address>().map_err(|e| {
                OrchestratorError::Config(format!("Invalid pool address for {}: {}", name, e))
            })?;
            pools.insert(chain.chain_id, pool);
        }

        let on_behalf_of = match &settings.supply.on_behalf_of {
            Some(raw) if !raw.is_empty() => Some(raw.parse::<Address>().map_err(|e| {
                OrchestratorError::Config(format!("Invalid on_behalf_of address: {}", e))
            })?),
            _ => None,
        };

        Ok(Self {
            planner,
            capabilities,
            pools,
            on_behalf_of,
        })
    }

    /// Dispatch the supply for a session.
    ///
    /// The state check runs against the session as it is now, so a stale
    /// caller retrying after a reset gets a clean rejection instead of a
    /// deposit.
    pub async fn dispatch(&self, session: &mut FlowSession) -> OrchestratorResult<()> {
        let ready = match session.state {
            OrchestrationState::ReadyToSupply => true,
            OrchestrationState::Idle => session.form.is_direct(),
            _ => false,
        };
        if !ready {
            return Err(OrchestratorError::SupplyNotReady {
                state: session.state.name().to_string(),
            });
        }
        if session.supply_dispatched {
            return Err(OrchestratorError::SupplyAlreadyDispatched);
        }

        let request = self.build_request(&session.form)?;

        if let Some(preview) = &self.capabilities.health_factor {
            // Preview is advisory; its failure never blocks the supply.
            match preview.preview(&request).await {
                Ok(delta) => info!(
                    "Health factor preview for session {}: {} -> {}",
                    session.id, delta.before, delta.after
                ),
                Err(e) => warn!(
                    "Health factor preview failed for session {}: {}",
                    session.id, e
                ),
            }
        }

        match self.planner.supply(&request).await {
            Ok(receipt) => {
                session.supply_dispatched = true;
                session.supply_tx = Some(receipt.tx_hash);
                metrics::record_supply_dispatched(request.chain_id);
                info!(
                    "Supply dispatched for session {}: {} base units on chain {} (tx {:?})",
                    session.id, request.amount, request.chain_id, receipt.tx_hash
                );
                Ok(())
            }
            Err(e) => {
                metrics::record_supply_failure(request.chain_id);
                Err(e)
            }
        }
    }

    fn build_request(&self, form: &PositionForm) -> OrchestratorResult<SupplyRequest> {
        let token = form.source().token.as_ref().ok_or_else(|| {
            OrchestratorError::InvalidSelection("source token missing".to_string())
        })?;
        let chain = form.source().chain.as_ref().ok_or_else(|| {
            OrchestratorError::InvalidSelection("source chain missing".to_string())
        })?;
        let raw_amount = form.source().amount.as_str();
        if raw_amount.is_empty() {
            return Err(OrchestratorError::InvalidSelection(
                "source amount missing".to_string(),
            ));
        }

        let pool =
            self.pools
                .get(&chain.chain_id)
                .copied()
                .ok_or(OrchestratorError::ChainNotFound {
                    chain_id: chain.chain_id,
                })?;

        let amount = match parse_units(raw_amount, u32::from(token.decimals)) {
            Ok(ParseUnits::U256(value)) if !value.is_zero() => value,
            Ok(_) => {
                return Err(OrchestratorError::InvalidAmount {
                    value: raw_amount.to_string(),
                    message: "amount must be positive".to_string(),
                })
            }
            Err(e) => {
                return Err(OrchestratorError::InvalidAmount {
                    value: raw_amount.to_string(),
                    message: e.to_string(),
                })
            }
        };

        Ok(SupplyRequest {
            chain_id: chain.chain_id,
            pool,
            token: token.address,
            amount,
            on_behalf_of: self.on_behalf_of,
        })
    }
}
