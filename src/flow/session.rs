//! Per-dialog session state

use crate::flow::machine::OrchestrationState;
use crate::position::{PositionForm, SourceField};
use crate::transfer::{SwapStatus, TransferSnapshot, TransferTicket};

use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::Serialize;
use uuid::Uuid;

/// Everything the orchestrator holds for one open supply dialog.
#[derive(Debug, Clone)]
pub struct FlowSession {
    pub id: Uuid,
    pub state: OrchestrationState,
    pub form: PositionForm,
    /// Provider handle for the in-flight transfer, if one was accepted.
    pub ticket: Option<TransferTicket>,
    /// Latest provider observation for the in-flight transfer.
    pub last_snapshot: Option<TransferSnapshot>,
    /// Last swap status seen, kept for display after tracking ends.
    pub last_status: Option<SwapStatus>,
    /// Source fields written by the current handoff, in write order.
    pub handoff_log: Vec<SourceField>,
    /// Guard against a second supply dispatch within one flow.
    pub supply_dispatched: bool,
    pub supply_tx: Option<H256>,
    pub swap_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl FlowSession {
    pub fn new(form: PositionForm) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: OrchestrationState::Idle,
            form,
            ticket: None,
            last_snapshot: None,
            last_status: None,
            handoff_log: Vec::new(),
            supply_dispatched: false,
            supply_tx: None,
            swap_started_at: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Drop all swap-flow bookkeeping. Runs alongside the source reset so a
    /// later confirm starts from a clean slate.
    pub fn clear_flow(&mut self) {
        self.ticket = None;
        self.last_snapshot = None;
        self.last_status = None;
        self.handoff_log.clear();
        self.supply_dispatched = false;
        self.swap_started_at = None;
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            state: self.state.clone(),
            form: self.form.clone(),
            swap_status: self.last_status,
            handoff_log: self.handoff_log.clone(),
            supply_dispatched: self.supply_dispatched,
            supply_tx: self.supply_tx,
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed: self.is_closed(),
        }
    }
}

/// Read model served by the session API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub state: OrchestrationState,
    pub form: PositionForm,
    pub swap_status: Option<SwapStatus>,
    pub handoff_log: Vec<SourceField>,
    pub supply_dispatched: bool,
    pub supply_tx: Option<H256>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed: bool,
}
