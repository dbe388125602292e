//! Snapshot diffing for transfer provider observations
//!
//! The engine polls the provider and feeds consecutive snapshots through
//! [`diff_snapshots`], which derives the flow events implied by what changed.
//! Diffing is pure so every edge the engine reacts to can be tested without
//! a provider.

use crate::events::FlowEvent;
use crate::transfer::TransferSnapshot;

/// Derive flow events from two consecutive provider snapshots, in the order
/// the engine should apply them.
///
/// A single poll gap can legitimately carry two events: a swap id appearing
/// together with a terminal status means the provider assigned, tracked, and
/// finished the swap between observations.
pub fn diff_snapshots(prev: Option<&TransferSnapshot>, next: &TransferSnapshot) -> Vec<FlowEvent> {
    let mut events = Vec::new();

    let prev_swap_id = prev.and_then(|p| p.swap_id.as_ref());
    let prev_status = prev.and_then(|p| p.status);
    // Before the first observation the provider is assumed busy: it just
    // accepted the transfer.
    let prev_processing = prev.map(|p| p.is_processing).unwrap_or(true);
    let prev_stopped = prev
        .map(|p| !p.is_tracking && p.status.map(|s| s.is_terminal()).unwrap_or(false))
        .unwrap_or(false);

    if prev_swap_id.is_none() {
        if let Some(swap_id) = &next.swap_id {
            events.push(FlowEvent::SwapIdAssigned {
                swap_id: swap_id.clone(),
            });
        }
    }

    match next.status {
        Some(status) if status.is_terminal() && !next.is_tracking => {
            if !prev_stopped {
                events.push(FlowEvent::TrackingStopped { status });
            }
        }
        Some(status) if next.is_tracking && prev_status != Some(status) => {
            events.push(FlowEvent::StatusObserved { status });
        }
        _ => {}
    }

    // The provider going quiet before ever assigning a swap id means the
    // initiation fizzled (rejected signature, abandoned quote).
    if next.swap_id.is_none() && !next.is_processing && !next.is_tracking && prev_processing {
        events.push(FlowEvent::ProcessingStopped);
    }

    events
}
