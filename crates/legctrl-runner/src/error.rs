//! Error types for the runner.

use std::path::PathBuf;

use legctrl_client::ClientError;
use legctrl_sim::SimError;
use thiserror::Error;

/// Errors produced by the `legctrl` commands.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// A configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid YAML for a run.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No scanned device matched the requested name.
    #[error("no device named {0:?} was discovered")]
    DeviceNotFound(String),

    /// The session ended in `Failed` while a step waited for it.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// A scenario step waited too long.
    #[error("timed out after {timeout_ms} ms waiting for {what}")]
    Timeout { what: &'static str, timeout_ms: u64 },

    /// The run was interrupted with Ctrl-C.
    #[error("interrupted")]
    Interrupted,

    /// Client error.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Simulator error.
    #[error(transparent)]
    Sim(#[from] SimError),

    /// Socket or runtime I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The Ctrl-C handler could not be installed.
    #[error("failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;
