//! Status types carried in telemetry.

use crate::constants::*;

/// Robot system state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemState {
    /// Outputs off.
    Disarmed,
    /// Accepting motion commands.
    Armed,
    /// Outputs forced off after a fault.
    Fault,
}

impl SystemState {
    /// Label shown to the operator.
    pub fn label(&self) -> &'static str {
        match self {
            SystemState::Disarmed => "DISARMED",
            SystemState::Armed => "ARMED",
            SystemState::Fault => "FAULT",
        }
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Unrecognized state bytes decode as [`SystemState::Fault`].
impl From<u8> for SystemState {
    fn from(value: u8) -> Self {
        match value {
            STATE_DISARMED => SystemState::Disarmed,
            STATE_ARMED => SystemState::Armed,
            _ => SystemState::Fault,
        }
    }
}

impl From<SystemState> for u8 {
    fn from(state: SystemState) -> Self {
        match state {
            SystemState::Disarmed => STATE_DISARMED,
            SystemState::Armed => STATE_ARMED,
            SystemState::Fault => STATE_FAULT,
        }
    }
}

/// Error code reported by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No error.
    None,
    /// No accepted command within the deadman interval.
    DeadmanTimeout,
    /// Battery below the safe threshold.
    LowBattery,
    /// Servo driver bus fault.
    I2cFault,
    /// Last command was not understood.
    InvalidCmd,
    /// Anything else.
    Unknown,
}

impl ErrorCode {
    /// Label shown to the operator.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCode::None => "None",
            ErrorCode::DeadmanTimeout => "Deadman Timeout",
            ErrorCode::LowBattery => "Low Battery",
            ErrorCode::I2cFault => "I2C Fault",
            ErrorCode::InvalidCmd => "Invalid Command",
            ErrorCode::Unknown => "Unknown Error",
        }
    }

    /// Whether this code signals a problem.
    pub fn is_error(&self) -> bool {
        !matches!(self, ErrorCode::None)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Unrecognized error bytes decode as [`ErrorCode::Unknown`].
impl From<u8> for ErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ERR_CODE_NONE => ErrorCode::None,
            ERR_CODE_DEADMAN_TIMEOUT => ErrorCode::DeadmanTimeout,
            ERR_CODE_LOW_BATTERY => ErrorCode::LowBattery,
            ERR_CODE_I2C_FAULT => ErrorCode::I2cFault,
            ERR_CODE_INVALID_CMD => ErrorCode::InvalidCmd,
            _ => ErrorCode::Unknown,
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::None => ERR_CODE_NONE,
            ErrorCode::DeadmanTimeout => ERR_CODE_DEADMAN_TIMEOUT,
            ErrorCode::LowBattery => ERR_CODE_LOW_BATTERY,
            ErrorCode::I2cFault => ERR_CODE_I2C_FAULT,
            ErrorCode::InvalidCmd => ERR_CODE_INVALID_CMD,
            ErrorCode::Unknown => ERR_CODE_UNKNOWN,
        }
    }
}
