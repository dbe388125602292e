//! Orchestration state machine for the swap-then-supply flow
//!
//! All sequencing lives in one pure transition function over
//! (state, event) pairs. The engine executes the effects a transition
//! requests; the machine itself never touches providers, the form, or the
//! clock, which keeps every ordering rule testable in isolation.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::FlowEvent;
use crate::position::SourceField;
use crate::transfer::{SwapId, SwapStatus};

use serde::{Deserialize, Serialize};

/// Lifecycle of one supply dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrchestrationState {
    /// No swap activity. A confirm from here either supplies directly (when
    /// the source selection already is the destination reserve) or starts a
    /// cross-chain transfer.
    Idle,

    /// Transfer requested from the provider; no swap id yet.
    SwapInitiated,

    /// Swap id assigned; the provider is tracking execution.
    SwapTracking { swap_id: SwapId },

    /// Provider reported terminal success; handoff not yet begun.
    SwapCompleted,

    /// Moving swap outputs into the source selection, one field per step in
    /// fixed order.
    HandoffInProgress { step: SourceField },

    /// Handoff complete; the supply action may fire.
    ReadyToSupply,

    /// Swap ended without delivering funds; notification and reset pending.
    Failed { status: SwapStatus },
}

impl OrchestrationState {
    /// Get state name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            OrchestrationState::Idle => "idle",
            OrchestrationState::SwapInitiated => "swap_initiated",
            OrchestrationState::SwapTracking { .. } => "swap_tracking",
            OrchestrationState::SwapCompleted => "swap_completed",
            OrchestrationState::HandoffInProgress { .. } => "handoff_in_progress",
            OrchestrationState::ReadyToSupply => "ready_to_supply",
            OrchestrationState::Failed { .. } => "failed",
        }
    }

    /// Check if a swap is in flight or being handed off
    pub fn is_swap_active(&self) -> bool {
        matches!(
            self,
            OrchestrationState::SwapInitiated
                | OrchestrationState::SwapTracking { .. }
                | OrchestrationState::SwapCompleted
                | OrchestrationState::HandoffInProgress { .. }
        )
    }
}

/// Side effects requested by a transition, executed by the engine in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Call the transfer provider's initiation entry point.
    InitiateTransfer,

    /// Write one source field from the swap outputs.
    WriteSourceField(SourceField),

    /// Surface a terminal swap failure to the user.
    NotifySwapFailure(SwapStatus),

    /// Reset the source selection to mirror the destination.
    ResetSource,

    /// Fire the supply action.
    DispatchSupply,
}

/// Result of applying one event to one state.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: OrchestrationState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: OrchestrationState) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    fn with(next: OrchestrationState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }
}

/// Apply `event` to `state`.
///
/// Caller commands that make no sense in the current state are rejected with
/// [`OrchestratorError::InvalidTransition`]. Observations that arrive late,
/// after a reset or from a previous flow, are absorbed: same state, no
/// effects.
pub fn transition(
    state: &OrchestrationState,
    event: &FlowEvent,
) -> OrchestratorResult<Transition> {
    use FlowEvent as E;
    use OrchestrationState as S;

    let transition = match (state, event) {
        // Dialog close and selection reverts short-circuit every state.
        (_, E::SessionClosed) => Transition::with(S::Idle, vec![Effect::ResetSource]),
        (_, E::SelectionMatched) => Transition::to(S::Idle),

        (S::Idle, E::ConfirmRequested { direct: true }) => {
            Transition::with(S::Idle, vec![Effect::DispatchSupply])
        }
        (S::Idle, E::ConfirmRequested { direct: false }) => {
            Transition::with(S::SwapInitiated, vec![Effect::InitiateTransfer])
        }

        // Declined initiation and a provider that goes quiet before ever
        // assigning a swap id both reset without any user-visible error.
        (S::SwapInitiated, E::TransferRejected) => Transition::to(S::Idle),
        (S::SwapInitiated, E::ProcessingStopped) => Transition::to(S::Idle),

        (S::SwapInitiated, E::SwapIdAssigned { swap_id }) => Transition::to(S::SwapTracking {
            swap_id: swap_id.clone(),
        }),

        (S::SwapTracking { .. }, E::StatusObserved { .. }) => Transition::to(state.clone()),

        (S::SwapTracking { .. }, E::TrackingStopped { status })
            if *status == SwapStatus::Completed =>
        {
            Transition::to(S::SwapCompleted)
        }
        (S::SwapTracking { .. }, E::TrackingStopped { status }) if status.is_failure() => {
            Transition::with(
                S::Failed { status: *status },
                vec![Effect::NotifySwapFailure(*status), Effect::ResetSource],
            )
        }

        (S::SwapCompleted, E::HandoffBegun) => Transition::to(S::HandoffInProgress {
            step: SourceField::FIRST,
        }),

        // Handoff steps complete strictly in order; input for any other step
        // is not an error, the flow just keeps waiting.
        (S::HandoffInProgress { step }, E::HandoffInputReady { step: ready })
            if step == ready =>
        {
            let next = match step.next() {
                Some(following) => S::HandoffInProgress { step: following },
                None => S::ReadyToSupply,
            };
            Transition::with(next, vec![Effect::WriteSourceField(*step)])
        }

        (S::Failed { .. }, E::FailureHandled) => Transition::to(S::Idle),

        (S::ReadyToSupply, E::ConfirmRequested { .. }) => {
            Transition::with(S::ReadyToSupply, vec![Effect::DispatchSupply])
        }

        (state, event) if event.is_command() => {
            return Err(OrchestratorError::InvalidTransition {
                state: state.name().to_string(),
                event: event.name().to_string(),
            })
        }
        (state, _) => Transition::to(state.clone()),
    };

    Ok(transition)
}
