//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when working with the LegCtrl protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is too short to be valid.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Header carries a version this crate does not speak.
    #[error("unsupported protocol version: 0x{0:02X}")]
    UnsupportedVersion(u8),

    /// Header carries a different message type than the decoder handles.
    #[error("unexpected message type: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedMessageType {
        /// Message type the decoder handles.
        expected: u8,
        /// Message type found in the header.
        actual: u8,
    },

    /// Declared payload length does not fit the message.
    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    PayloadLengthMismatch {
        /// Payload length required by the message.
        expected: usize,
        /// Payload length declared or present.
        actual: usize,
    },

    /// Payload is larger than the robot accepts.
    #[error("payload too large: maximum {max} bytes, got {actual}")]
    PayloadTooLarge {
        /// Maximum allowed payload.
        max: usize,
        /// Declared payload length.
        actual: usize,
    },

    /// Unknown command message type.
    #[error("unknown command: 0x{0:02X}")]
    UnknownCommand(u8),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
