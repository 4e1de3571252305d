//! Runner for the LegCtrl remote-control client.
//!
//! Backs the `legctrl` binary: YAML run configurations, scenario execution,
//! the TCP bridge that serves a simulated robot, and [`TcpTransport`] for
//! reaching bridged robots.

pub mod bridge_server;
pub mod config;
pub mod error;
pub mod scenario;
pub mod tcp_transport;

pub use bridge_server::{BridgeConfig, BridgeServer, BridgeState};
pub use config::{RunConfig, Step, TransportConfig};
pub use error::{RunnerError, RunnerResult};
pub use scenario::{Interrupt, ScenarioRunner};
pub use tcp_transport::{TcpConfig, TcpEndpoint, TcpTransport};
