//! Error types shared across the bridge.
//!
//! Everything here is rendered into the `error` string of a response line,
//! so the `Display` text is what the host ultimately sees.

use thiserror::Error;

/// Failure of an outbound callback to the host.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Bridge request '{action}' timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    #[error("{message}")]
    Rejected { action: String, message: String },

    #[error("Bridge channel closed before '{action}' completed")]
    Closed { action: String },

    #[error("Failed to serialize bridge request: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CallbackError {
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failure of a wallet capability invoked by the agent engine.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error("Wallet response for '{action}' is missing {field}")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
}

/// Operational failure of a dispatched command.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Agent not initialized")]
    NotInitialized,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Engine(String),
}

impl From<anyhow::Error> for DispatchError {
    fn from(error: anyhow::Error) -> Self {
        Self::Engine(format!("{error:#}"))
    }
}

/// Protocol-level failure of an inbound line.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Request is missing an action")]
    MissingAction,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Line exceeds max size: {len} > {max} bytes")]
    LineTooLong { len: usize, max: usize },
}
