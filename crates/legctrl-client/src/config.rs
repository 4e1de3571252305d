//! Client configuration.

use legctrl_protocol::{COMMAND_CHARACTERISTIC_UUID, SERVICE_UUID, TELEMETRY_CHARACTERISTIC_UUID};
use serde::{Deserialize, Serialize};

use crate::activity_log::DEFAULT_LOG_CAPACITY;
use crate::error::{ClientError, ClientResult};
use crate::transport::CapabilityId;

/// Identities of the control service and its capabilities, plus log sizing.
///
/// The command period is a protocol constant and deliberately absent here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Service advertised by the robot.
    pub service_uuid: String,
    /// Write target for command frames.
    pub command_characteristic: String,
    /// Notify source for telemetry frames.
    pub telemetry_characteristic: String,
    /// Number of activity log entries kept.
    pub log_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            service_uuid: SERVICE_UUID.to_string(),
            command_characteristic: COMMAND_CHARACTERISTIC_UUID.to_string(),
            telemetry_characteristic: TELEMETRY_CHARACTERISTIC_UUID.to_string(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn command_capability(&self) -> CapabilityId {
        CapabilityId::new(&self.command_characteristic)
    }

    pub fn telemetry_capability(&self) -> CapabilityId {
        CapabilityId::new(&self.telemetry_characteristic)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> ClientResult<()> {
        if self.service_uuid.is_empty() {
            return Err(ClientError::InvalidConfig("service_uuid is empty".to_string()));
        }
        if self.command_characteristic.is_empty() || self.telemetry_characteristic.is_empty() {
            return Err(ClientError::InvalidConfig(
                "characteristic UUIDs must not be empty".to_string(),
            ));
        }
        if self.command_capability().matches(&self.telemetry_capability()) {
            return Err(ClientError::InvalidConfig(
                "command and telemetry characteristics must differ".to_string(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(ClientError::InvalidConfig("log_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_robot_uuids() {
        let config = ClientConfig::default();
        assert_eq!(config.service_uuid, "12345678-1234-1234-1234-123456789abc");
        assert_eq!(config.log_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: ClientConfig = serde_yaml::from_str("log_capacity: 20\n").expect("valid yaml");
        assert_eq!(config.log_capacity, 20);
        assert_eq!(config.command_characteristic, COMMAND_CHARACTERISTIC_UUID);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.telemetry_characteristic = config.command_characteristic.to_uppercase();
        assert!(matches!(config.validate(), Err(ClientError::InvalidConfig(_))));

        let config = ClientConfig {
            log_capacity: 0,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            service_uuid: String::new(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
