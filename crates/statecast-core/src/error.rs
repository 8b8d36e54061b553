//! Error types for Statecast

use thiserror::Error;

/// Core Statecast errors
#[derive(Error, Debug)]
pub enum StatecastError {
    // Codec errors
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Datagram too large: {size} bytes, limit {limit}")]
    DatagramTooLarge { size: usize, limit: usize },

    // Transport errors
    #[error("Channel detached")]
    Detached,

    #[error("Peer closed: {0}")]
    PeerClosed(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for Statecast operations
pub type StatecastResult<T> = Result<T, StatecastError>;
