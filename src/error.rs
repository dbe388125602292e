//! Error types for the LendFlow Orchestrator

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transfer provider error: {0}")]
    Transfer(String),

    #[error("Supply planner error: {0}")]
    Supply(String),

    #[error("Invalid asset selection: {0}")]
    InvalidSelection(String),

    #[error("Invalid amount {value}: {message}")]
    InvalidAmount { value: String, message: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Session {id} not found")]
    SessionNotFound { id: Uuid },

    #[error("Session {id} is closed")]
    SessionClosed { id: Uuid },

    #[error("Session limit of {max} reached")]
    SessionLimitReached { max: usize },

    #[error("Supply not available in state {state}")]
    SupplyNotReady { state: String },

    #[error("Supply already dispatched for this session")]
    SupplyAlreadyDispatched,

    #[error("Event {event} is not valid in state {state}")]
    InvalidTransition { state: String, event: String },

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Check if error is transient (collaborator hiccup, worth retrying later)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Http(_) | OrchestratorError::Transfer(_)
        )
    }

    /// Check if error was caused by the caller rather than a collaborator
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            OrchestratorError::InvalidSelection(_)
                | OrchestratorError::InvalidAmount { .. }
                | OrchestratorError::ChainNotFound { .. }
                | OrchestratorError::SessionNotFound { .. }
                | OrchestratorError::SessionClosed { .. }
                | OrchestratorError::SessionLimitReached { .. }
                | OrchestratorError::SupplyNotReady { .. }
                | OrchestratorError::SupplyAlreadyDispatched
                | OrchestratorError::InvalidTransition { .. }
        )
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
