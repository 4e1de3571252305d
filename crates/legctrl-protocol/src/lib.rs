//! LegCtrl Wire Protocol
//!
//! This crate provides types and utilities for talking to the LegCtrl robot
//! controller over its radio link. Every message is a small binary frame made
//! of a fixed 4-byte header followed by a message-specific payload.
//!
//! # Protocol Overview
//!
//! ```text
//! +---------+----------+-------------+----------+------------------+
//! | version | msg_type | payload_len | reserved | payload[0..len]  |
//! +---------+----------+-------------+----------+------------------+
//! ```
//!
//! - **Commands** (client → robot): `Arm`, `Disarm`, `SetServoCh0`, `Ping`
//! - **Telemetry** (robot → client): periodic status notification
//!
//! All multi-byte integers are little-endian. The client never receives an
//! acknowledgment for a command; the robot disarms itself if no accepted
//! command arrives within its deadman interval, so motion commands are
//! repeated every [`COMMAND_PERIOD`].
//!
//! # Example
//!
//! ```rust,ignore
//! use legctrl_protocol::{Command, Telemetry};
//!
//! // Build a command
//! let frame = Command::SetServoCh0 { pulse_us: 1500 }.encode();
//!
//! // Parse a notification
//! let telemetry = Telemetry::decode(&received_data)?;
//! ```

mod commands;
mod constants;
mod error;
mod frame;
mod telemetry;
mod types;

pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use telemetry::*;
pub use types::*;
