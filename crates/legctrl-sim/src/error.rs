//! Error types for the simulator.

use legctrl_protocol::ProtocolError;
use thiserror::Error;

/// Errors produced by the simulated robot and transport.
#[derive(Error, Debug)]
pub enum SimError {
    /// A write failed validation and was rejected, as a GATT error would.
    #[error("write rejected: {0}")]
    WriteRejected(#[from] ProtocolError),

    /// No simulated device has this id.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The configuration failed validation.
    #[error("invalid simulator configuration: {0}")]
    InvalidConfig(String),

    /// The background thread could not be started.
    #[error("failed to spawn simulator thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Result type for simulator operations.
pub type SimResult<T> = Result<T, SimError>;
