//! Flow event types
//!
//! Everything that can move a session's orchestration state machine, whether
//! it came from the caller or was derived from transfer provider polls.

use crate::position::SourceField;
use crate::transfer::{SwapId, SwapStatus};

/// An input to the orchestration state machine.
///
/// Commands originate with the caller; observations are derived by the
/// engine from provider snapshots and its own per-tick work. The machine
/// rejects commands that are invalid in the current state and absorbs stale
/// observations silently.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// Caller triggered the supply action.
    ConfirmRequested { direct: bool },

    /// Provider declined to start the transfer without raising an error.
    TransferRejected,

    /// Provider assigned a swap id and began tracking execution.
    SwapIdAssigned { swap_id: SwapId },

    /// Status progress while the provider tracks the swap.
    StatusObserved { status: SwapStatus },

    /// Provider stopped tracking with a terminal status.
    TrackingStopped { status: SwapStatus },

    /// Provider went quiet without ever assigning a swap id.
    ProcessingStopped,

    /// Engine starts moving swap outputs into the source selection.
    HandoffBegun,

    /// The dependency for one handoff step is present.
    HandoffInputReady { step: SourceField },

    /// Failure notification and source reset have been carried out.
    FailureHandled,

    /// The source selection matches the destination reserve again.
    SelectionMatched,

    /// The dialog was closed.
    SessionClosed,
}

impl FlowEvent {
    /// Get event name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            FlowEvent::ConfirmRequested { .. } => "confirm_requested",
            FlowEvent::TransferRejected => "transfer_rejected",
            FlowEvent::SwapIdAssigned { .. } => "swap_id_assigned",
            FlowEvent::StatusObserved { .. } => "status_observed",
            FlowEvent::TrackingStopped { .. } => "tracking_stopped",
            FlowEvent::ProcessingStopped => "processing_stopped",
            FlowEvent::HandoffBegun => "handoff_begun",
            FlowEvent::HandoffInputReady { .. } => "handoff_input_ready",
            FlowEvent::FailureHandled => "failure_handled",
            FlowEvent::SelectionMatched => "selection_matched",
            FlowEvent::SessionClosed => "session_closed",
        }
    }

    /// Check if this event is a caller command rather than an observation
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            FlowEvent::ConfirmRequested { .. }
                | FlowEvent::SelectionMatched
                | FlowEvent::SessionClosed
        )
    }
}
