//! Session core of the LegCtrl remote-control client.
//!
//! The client finds a robot advertising the control service, establishes a
//! session with it, streams commands and keeps the latest telemetry. The
//! radio itself sits behind the [`Transport`] trait.
//!
//! ## Key Types
//!
//! - [`RemoteClient`]: Top-level coordinator, one per process
//! - [`ConnectionStateMachine`]: The session lifecycle
//! - [`CommandScheduler`]: Re-sends the last command every 20 ms so the
//!   robot's deadman never trips
//! - [`DeviceCatalog`]: Devices found by the current scan
//! - [`Transport`] / [`TransportEvent`]: The radio boundary
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use legctrl_client::{event_channel, ClientConfig, RemoteClient};
//!
//! let (events_tx, events_rx) = event_channel();
//! let transport = Arc::new(MyRadio::new(events_tx));
//! let client = RemoteClient::new(ClientConfig::default(), transport, events_rx)?;
//!
//! client.start_scan()?;
//! // ... wait for StateUpdate::Devices on client.subscribe()
//! client.connect(&device_id)?;
//! // ... wait for LinkPhase::Ready
//! client.arm();
//! client.start_periodic(Command::SetServoCh0 { pulse_us: 1500 })?;
//! ```

mod activity_log;
mod catalog;
mod client;
mod config;
mod error;
mod notify;
mod scheduler;
mod session;
mod transport;

#[cfg(test)]
mod testing;

pub use activity_log::*;
pub use catalog::*;
pub use client::*;
pub use config::*;
pub use error::*;
pub use notify::*;
pub use scheduler::*;
pub use session::*;
pub use transport::*;
