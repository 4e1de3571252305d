//! Behavioural model of the robot's control firmware.
//!
//! Time is passed in explicitly as milliseconds since an arbitrary epoch, so
//! the model is deterministic and can be driven by tests without sleeping.

use legctrl_protocol::{
    Command, ErrorCode, Header, ProtocolError, SystemState, Telemetry, DEADMAN_TIMEOUT_MS,
    MAX_PAYLOAD_SIZE, SERVO_PULSE_CENTER_US, SERVO_PULSE_MAX_US, SERVO_PULSE_MIN_US,
    TELEMETRY_FRAME_SIZE,
};
use tracing::{debug, info, warn};

use crate::error::SimResult;

/// Battery voltage the firmware reports (no ADC on the reference board).
pub const DEFAULT_BATTERY_MV: u16 = 7400;

/// Counters kept by the firmware model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareStats {
    /// Writes that passed validation and decoded to a command.
    pub commands: u64,
    /// Writes rejected by validation.
    pub rejected_writes: u64,
    /// Deadman trips.
    pub deadman_trips: u64,
}

/// The simulated robot controller.
#[derive(Debug, Clone)]
pub struct RobotFirmware {
    state: SystemState,
    error_code: ErrorCode,
    /// Time of the last accepted command; `None` when cleared.
    last_cmd_ms: Option<u64>,
    /// Servo channel 0 pulse width; `None` when the output is off.
    servo_pulse_us: Option<u16>,
    connected: bool,
    notifications: bool,
    battery_mv: u16,
    stats: FirmwareStats,
}

impl Default for RobotFirmware {
    fn default() -> Self {
        Self::new(DEFAULT_BATTERY_MV)
    }
}

impl RobotFirmware {
    /// Boot the firmware: disarmed, servo centred.
    pub fn new(battery_mv: u16) -> Self {
        RobotFirmware {
            state: SystemState::Disarmed,
            error_code: ErrorCode::None,
            last_cmd_ms: None,
            servo_pulse_us: Some(SERVO_PULSE_CENTER_US),
            connected: false,
            notifications: false,
            battery_mv,
            stats: FirmwareStats::default(),
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    /// Current servo output, `None` when stopped.
    pub fn servo_pulse_us(&self) -> Option<u16> {
        self.servo_pulse_us
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications
    }

    pub fn stats(&self) -> FirmwareStats {
        self.stats
    }

    // ========================================================================
    // Link lifecycle
    // ========================================================================

    /// A central connected. Every new link starts disarmed.
    pub fn on_connect(&mut self) {
        info!("Firmware: connected");
        self.connected = true;
        self.state = SystemState::Disarmed;
        self.error_code = ErrorCode::None;
        self.last_cmd_ms = None;
    }

    /// The link dropped. The robot faults until re-armed.
    pub fn on_disconnect(&mut self) {
        info!("Firmware: disconnected");
        self.connected = false;
        self.state = SystemState::Fault;
        self.error_code = ErrorCode::None;
        self.notifications = false;
    }

    pub fn set_notifications(&mut self, enabled: bool) {
        debug!("Firmware: telemetry notifications {}", if enabled { "enabled" } else { "disabled" });
        self.notifications = enabled;
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Handle a write to the command characteristic.
    ///
    /// Frames with a bad header, a length that disagrees with the header, or
    /// an oversized payload are rejected. Frames that pass but carry an
    /// unknown opcode set [`ErrorCode::InvalidCmd`]; a servo command with the
    /// wrong payload size is dropped. Returns the command that was processed.
    pub fn write(&mut self, now_ms: u64, data: &[u8]) -> SimResult<Option<Command>> {
        if let Err(e) = Self::validate(data) {
            warn!("Firmware: write rejected: {}", e);
            self.stats.rejected_writes += 1;
            return Err(e.into());
        }

        match Command::decode(data) {
            Ok(command) => {
                self.stats.commands += 1;
                self.apply(now_ms, command);
                Ok(Some(command))
            }
            Err(ProtocolError::UnknownCommand(code)) => {
                warn!("Firmware: unknown command 0x{:02X}", code);
                self.error_code = ErrorCode::InvalidCmd;
                Ok(None)
            }
            Err(e) => {
                warn!("Firmware: dropping command: {}", e);
                Ok(None)
            }
        }
    }

    fn validate(data: &[u8]) -> Result<(), ProtocolError> {
        let header = Header::parse(data)?;
        if data.len() != header.frame_len() {
            return Err(ProtocolError::PayloadLengthMismatch {
                expected: header.payload_len(),
                actual: data.len() - legctrl_protocol::HEADER_SIZE,
            });
        }
        if header.payload_len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: header.payload_len(),
            });
        }
        Ok(())
    }

    fn apply(&mut self, now_ms: u64, command: Command) {
        debug!("Firmware: {}", command);

        match command {
            Command::Arm => {
                if matches!(self.state, SystemState::Disarmed | SystemState::Fault) {
                    self.state = SystemState::Armed;
                    self.error_code = ErrorCode::None;
                    self.last_cmd_ms = Some(now_ms);
                    info!("Firmware: state ARMED");
                }
            }
            Command::Disarm => {
                self.state = SystemState::Disarmed;
                self.error_code = ErrorCode::None;
                self.last_cmd_ms = None;
                self.servo_pulse_us = None;
                info!("Firmware: state DISARMED");
            }
            Command::SetServoCh0 { pulse_us } => {
                if self.state != SystemState::Armed {
                    warn!("Firmware: servo command ignored, not armed");
                    return;
                }
                self.last_cmd_ms = Some(now_ms);
                let clamped = pulse_us.clamp(SERVO_PULSE_MIN_US, SERVO_PULSE_MAX_US);
                if clamped != pulse_us {
                    warn!("Firmware: pulse width {} us clamped to {} us", pulse_us, clamped);
                }
                self.servo_pulse_us = Some(clamped);
            }
            Command::Ping => {
                if self.state == SystemState::Armed {
                    self.last_cmd_ms = Some(now_ms);
                }
            }
        }
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Milliseconds since the last accepted command, 0 if none, capped at 65535.
    pub fn last_cmd_age_ms(&self, now_ms: u64) -> u16 {
        match self.last_cmd_ms {
            Some(stamp) => now_ms.saturating_sub(stamp).min(u16::MAX as u64) as u16,
            None => 0,
        }
    }

    /// Run the deadman check. Returns `true` if it tripped.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        if self.state != SystemState::Armed {
            return false;
        }

        let age_ms = self.last_cmd_age_ms(now_ms);
        if age_ms < DEADMAN_TIMEOUT_MS {
            return false;
        }

        warn!("Firmware: deadman timeout: {} ms >= {} ms", age_ms, DEADMAN_TIMEOUT_MS);
        self.state = SystemState::Fault;
        self.error_code = ErrorCode::DeadmanTimeout;
        self.servo_pulse_us = None;
        self.stats.deadman_trips += 1;
        true
    }

    /// Current status.
    pub fn telemetry(&self, now_ms: u64) -> Telemetry {
        Telemetry {
            state: self.state,
            error_code: self.error_code,
            last_cmd_age_ms: self.last_cmd_age_ms(now_ms),
            battery_mv: self.battery_mv,
        }
    }

    /// Telemetry notification to send, if a central is subscribed.
    pub fn notification(&self, now_ms: u64) -> Option<[u8; TELEMETRY_FRAME_SIZE]> {
        (self.connected && self.notifications).then(|| self.telemetry(now_ms).encode())
    }
}
