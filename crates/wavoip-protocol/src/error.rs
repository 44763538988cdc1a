//! Error types for signaling payload decoding

use thiserror::Error;

/// Errors that can occur while decoding wire events
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Event name not part of the protocol
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// A positional argument the event requires was not supplied
    #[error("{event}: missing argument {index}")]
    MissingArgument {
        /// Event being decoded
        event: String,
        /// Zero-based argument position
        index: usize,
    },

    /// An argument did not match the expected shape
    #[error("{event}: invalid payload: {reason}")]
    InvalidPayload {
        /// Event being decoded
        event: String,
        /// Decoder message
        reason: String,
    },

    /// Unrecognised status string
    #[error("invalid status: {0}")]
    InvalidStatus(String),
}
