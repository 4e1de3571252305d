//! Simulator configuration.

use legctrl_protocol::{COMMAND_CHARACTERISTIC_UUID, SERVICE_UUID, TELEMETRY_CHARACTERISTIC_UUID};
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::firmware::DEFAULT_BATTERY_MV;

/// One simulated robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimDeviceConfig {
    /// Stable identity reported in discovery.
    pub id: String,
    /// Advertised name.
    #[serde(default)]
    pub name: Option<String>,
    /// Signal strength reported in discovery (dBm).
    #[serde(default = "default_rssi")]
    pub rssi: i16,
    /// Fail every connection attempt.
    #[serde(default)]
    pub refuse_connect: bool,
    /// Leave the telemetry characteristic out of the service.
    #[serde(default)]
    pub omit_telemetry: bool,
}

fn default_rssi() -> i16 {
    -60
}

impl SimDeviceConfig {
    /// A well-behaved robot.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        SimDeviceConfig {
            id: id.into(),
            name: Some(name.into()),
            rssi: default_rssi(),
            refuse_connect: false,
            omit_telemetry: false,
        }
    }
}

/// Configuration for [`SimTransport`](crate::SimTransport).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Robots within range.
    pub devices: Vec<SimDeviceConfig>,
    /// Service the robots advertise.
    pub service_uuid: String,
    /// Command characteristic exposed by each robot.
    pub command_characteristic: String,
    /// Telemetry characteristic exposed by each robot.
    pub telemetry_characteristic: String,
    /// Interval between telemetry notifications.
    pub telemetry_period_ms: u64,
    /// Interval between firmware deadman checks.
    pub tick_period_ms: u64,
    /// Probability that an unacknowledged write is lost.
    pub write_drop_probability: f64,
    /// Seed for the write-loss RNG.
    pub seed: u64,
    /// Battery voltage every robot reports.
    pub battery_mv: u16,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            devices: vec![SimDeviceConfig::new("legctrl-sim-01", "LegCtrl")],
            service_uuid: SERVICE_UUID.to_string(),
            command_characteristic: COMMAND_CHARACTERISTIC_UUID.to_string(),
            telemetry_characteristic: TELEMETRY_CHARACTERISTIC_UUID.to_string(),
            telemetry_period_ms: 100,
            tick_period_ms: 10,
            write_drop_probability: 0.0,
            seed: 0,
            battery_mv: DEFAULT_BATTERY_MV,
        }
    }
}

impl SimConfig {
    /// Check the configuration is usable.
    pub fn validate(&self) -> SimResult<()> {
        if !(0.0..=1.0).contains(&self.write_drop_probability) {
            return Err(SimError::InvalidConfig(format!(
                "write_drop_probability must be within 0..=1, got {}",
                self.write_drop_probability
            )));
        }
        if self.telemetry_period_ms == 0 || self.tick_period_ms == 0 {
            return Err(SimError::InvalidConfig("periods must be non-zero".to_string()));
        }
        for (i, device) in self.devices.iter().enumerate() {
            if self.devices[..i].iter().any(|d| d.id == device.id) {
                return Err(SimError::InvalidConfig(format!("duplicate device id {}", device.id)));
            }
        }
        Ok(())
    }
}
