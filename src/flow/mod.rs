//! Swap-then-supply flow orchestration
//!
//! The flow layer:
//! 1. Models the deposit lifecycle as an explicit state machine
//! 2. Tracks one session per open supply dialog
//! 3. Polls the transfer provider and turns snapshot diffs into events
//! 4. Hands swap outputs to the supply dispatcher once the flow settles

pub mod engine;
pub mod machine;
pub mod session;

pub use engine::FlowEngine;
pub use session::SessionSummary;
