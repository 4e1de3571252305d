//! Simulated LegCtrl robot.
//!
//! Models the observable behaviour of the robot's control firmware (arming,
//! servo clamping, the 200 ms deadman, telemetry) and exposes it through
//! [`SimTransport`], an in-process implementation of the client's
//! [`Transport`](legctrl_client::Transport) trait. Used by tests, by
//! `legctrl run` with a `sim` transport, and behind the TCP bridge.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use legctrl_client::{event_channel, ClientConfig, RemoteClient};
//! use legctrl_sim::{SimConfig, SimTransport};
//!
//! let (tx, rx) = event_channel();
//! let transport = Arc::new(SimTransport::new(SimConfig::default(), tx)?);
//! let client = RemoteClient::new(ClientConfig::default(), transport.clone(), rx)?;
//! ```

mod config;
mod error;
mod firmware;
mod transport;

pub use config::*;
pub use error::*;
pub use firmware::*;
pub use transport::*;
