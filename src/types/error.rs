//! Error types for Speakeasy
//!
//! Protocol mistakes (stale challenge, knocking while locked) surface as
//! `Rejected`; environment problems (no randomness, no storage) surface at
//! construction time and are never papered over.

use crate::doorman::DoormanState;

/// Main error type for Speakeasy operations
#[derive(Debug, thiserror::Error)]
pub enum SpeakeasyError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rejected in state {state}: {reason}")]
    Rejected { state: DoormanState, reason: String },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SpeakeasyError {
    /// Shorthand for a protocol rejection in the given state
    pub fn rejected(state: DoormanState, reason: impl Into<String>) -> Self {
        Self::Rejected {
            state,
            reason: reason.into(),
        }
    }

    /// Whether the error means the subsystem cannot run safely at all
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Environment(_) | Self::Config(_))
    }
}

impl From<std::io::Error> for SpeakeasyError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SpeakeasyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<tokio::task::JoinError> for SpeakeasyError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Blocking task failed: {}", err))
    }
}

/// Result type alias for Speakeasy operations
pub type Result<T> = std::result::Result<T, SpeakeasyError>;
