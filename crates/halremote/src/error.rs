//! Error types for the halremote client

use crate::pin::PinType;
use crate::wire::WireError;

/// Result type alias using HalRemoteError
pub type Result<T> = std::result::Result<T, HalRemoteError>;

/// Errors that can occur while driving a remote component session
#[derive(Debug, thiserror::Error)]
pub enum HalRemoteError {
    /// ZMQ communication error
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zmq::Error),

    /// Wire codec error
    #[error("wire codec error: {0}")]
    Wire(#[from] WireError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A value whose type does not match the pin's declared type
    #[error("pin '{pin}' expects {expected:?} values, got {got:?}")]
    PinTypeMismatch {
        pin: String,
        expected: PinType,
        got: PinType,
    },

    /// Socket used before connect() was called
    #[error("transport not connected")]
    NotConnected,

    /// Generic error
    #[error("{0}")]
    Other(String),
}
