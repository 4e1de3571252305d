//! Error types for the client.

use thiserror::Error;

use crate::transport::{AdapterState, DeviceId};

/// Errors returned by client operations.
///
/// Transport faults and malformed telemetry never show up here; they are
/// reported as phase changes and log entries instead.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A scan was requested while the radio adapter is not powered on.
    #[error("radio not ready (adapter state: {0})")]
    AdapterNotReady(AdapterState),

    /// The device is not in the catalog of the current scan.
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        /// Thread name.
        name: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
