use std::io;

use radio_types::PlaybackState;
use thiserror::Error;

/// Network-level failures for a session or a one-shot request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("server {address} unreachable: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("session dropped: {0}")]
    Dropped(String),
}

impl TransportError {
    pub(crate) fn invalid(address: &str, reason: impl Into<String>) -> Self {
        TransportError::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn dropped(reason: impl std::fmt::Display) -> Self {
        TransportError::Dropped(reason.to_string())
    }
}

/// Errors returned by [`crate::Engine`] operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot {operation} while {state:?}")]
    InvalidStateTransition {
        operation: &'static str,
        state: PlaybackState,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to start session thread: {0}")]
    Thread(#[source] io::Error),
}
