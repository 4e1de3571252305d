//! Run configuration: which transport to use, client settings and the
//! scenario to execute.
//!
//! ```yaml
//! transport:
//!   kind: sim
//!   seed: 7
//! device: LegCtrl
//! steps:
//!   - step: scan
//!   - step: connect
//!   - step: wait_ready
//!   - step: arm
//!   - step: start_periodic
//!     pulse_us: 1500
//!   - step: wait
//!     ms: 2000
//!   - step: disconnect
//! ```

use std::path::Path;

use legctrl_client::ClientConfig;
use legctrl_protocol::Command;
use legctrl_sim::SimConfig;
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};
use crate::tcp_transport::TcpConfig;

/// Where the robots are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Simulated robots in this process.
    Sim(SimConfig),
    /// Robots served by `legctrl bridge`.
    Tcp(TcpConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Sim(SimConfig::default())
    }
}

fn default_scan_ms() -> u64 {
    1000
}

fn default_wait_ready_ms() -> u64 {
    5000
}

/// One scenario step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Scan for `duration_ms`, then stop.
    Scan {
        #[serde(default = "default_scan_ms")]
        duration_ms: u64,
    },
    /// Connect to the named device, or the run's default device.
    Connect {
        #[serde(default)]
        device: Option<String>,
    },
    /// Wait until the session is ready.
    WaitReady {
        #[serde(default = "default_wait_ready_ms")]
        timeout_ms: u64,
    },
    Arm,
    Disarm,
    Ping,
    Servo { pulse_us: u16 },
    /// Start periodic sending of a servo command, or of `Ping` when no pulse is given.
    StartPeriodic {
        #[serde(default)]
        pulse_us: Option<u16>,
    },
    UpdatePeriodic {
        #[serde(default)]
        pulse_us: Option<u16>,
    },
    StopPeriodic,
    Wait { ms: u64 },
    Disconnect,
}

impl Step {
    /// The command a periodic step sends.
    pub fn periodic_command(pulse_us: Option<u16>) -> Command {
        match pulse_us {
            Some(pulse_us) => Command::SetServoCh0 { pulse_us },
            None => Command::Ping,
        }
    }
}

/// A complete `legctrl run` configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub transport: TransportConfig,
    pub client: ClientConfig,
    /// Device name `connect` steps use when they name none.
    pub device: Option<String>,
    pub steps: Vec<Step>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            transport: TransportConfig::default(),
            client: ClientConfig::default(),
            device: None,
            steps: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Load and validate a YAML configuration file.
    pub fn load(path: &Path) -> RunnerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| RunnerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a YAML configuration.
    pub fn from_yaml(text: &str) -> RunnerResult<Self> {
        let config: RunConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RunnerResult<()> {
        self.client.validate()?;
        match &self.transport {
            TransportConfig::Sim(sim) => sim.validate()?,
            TransportConfig::Tcp(tcp) => tcp.validate()?,
        }

        let names_device = |step: &Step| matches!(step, Step::Connect { device: Some(_) });
        let bare_connect = self
            .steps
            .iter()
            .any(|s| matches!(s, Step::Connect { .. }) && !names_device(s));
        if bare_connect && self.device.is_none() {
            return Err(RunnerError::InvalidConfig(
                "a connect step names no device and no default device is set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
transport:
  kind: sim
  seed: 7
device: LegCtrl
steps:
  - step: scan
    duration_ms: 300
  - step: connect
  - step: wait_ready
  - step: arm
  - step: start_periodic
    pulse_us: 1500
  - step: update_periodic
  - step: servo
    pulse_us: 2000
  - step: wait
    ms: 250
  - step: stop_periodic
  - step: disconnect
"#;

    #[test]
    fn test_parse_scenario() {
        let config = RunConfig::from_yaml(SCENARIO).expect("valid scenario");

        match &config.transport {
            TransportConfig::Sim(sim) => {
                assert_eq!(sim.seed, 7);
                assert_eq!(sim.telemetry_period_ms, 100);
            }
            other => panic!("unexpected transport {:?}", other),
        }
        assert_eq!(config.steps.len(), 10);
        assert_eq!(config.steps[0], Step::Scan { duration_ms: 300 });
        assert_eq!(config.steps[1], Step::Connect { device: None });
        assert_eq!(config.steps[2], Step::WaitReady { timeout_ms: 5000 });
        assert_eq!(config.steps[5], Step::UpdatePeriodic { pulse_us: None });
        assert_eq!(config.steps[6], Step::Servo { pulse_us: 2000 });
    }

    #[test]
    fn test_parse_tcp_transport() {
        let yaml = "transport:\n  kind: tcp\n  endpoints:\n    - address: 127.0.0.1:7400\n      name: Bench\n";
        let config = RunConfig::from_yaml(yaml).expect("valid config");
        match config.transport {
            TransportConfig::Tcp(tcp) => assert_eq!(tcp.endpoints[0].name.as_deref(), Some("Bench")),
            other => panic!("unexpected transport {:?}", other),
        }
        assert!(config.steps.is_empty());
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = RunConfig::from_yaml("{}").expect("valid config");
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_connect_needs_a_device() {
        let yaml = "steps:\n  - step: connect\n";
        assert!(matches!(
            RunConfig::from_yaml(yaml),
            Err(RunnerError::InvalidConfig(_))
        ));

        let yaml = "steps:\n  - step: connect\n    device: Alpha\n";
        assert!(RunConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_unknown_step_rejected() {
        let yaml = "steps:\n  - step: dance\n";
        assert!(matches!(
            RunConfig::from_yaml(yaml),
            Err(RunnerError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_bundled_configs_parse() {
        let sim = RunConfig::from_yaml(include_str!("../configs/sim_demo.yaml")).expect("sim demo");
        assert!(matches!(sim.transport, TransportConfig::Sim(_)));
        assert_eq!(sim.steps.last(), Some(&Step::Disconnect));

        let bridge =
            RunConfig::from_yaml(include_str!("../configs/bridge_demo.yaml")).expect("bridge demo");
        assert!(matches!(bridge.transport, TransportConfig::Tcp(_)));
        assert_eq!(bridge.device.as_deref(), Some("LegCtrl"));
    }

    #[test]
    fn test_periodic_command() {
        assert_eq!(Step::periodic_command(None), Command::Ping);
        assert_eq!(
            Step::periodic_command(Some(1200)),
            Command::SetServoCh0 { pulse_us: 1200 }
        );
    }
}
