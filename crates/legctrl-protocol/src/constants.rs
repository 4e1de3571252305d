//! Protocol constants
//!
//! These constants define the header layout, message types, state and error
//! codes, and the radio service identity used by the LegCtrl protocol.

use std::time::Duration;

// ============================================================================
// Framing
// ============================================================================

/// The only protocol version understood by either side.
pub const PROTOCOL_VERSION: u8 = 0x01;
/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 4;
/// Largest payload the robot controller accepts in a single command.
pub const MAX_PAYLOAD_SIZE: usize = 8;
/// Value of the reserved header byte on outbound frames.
pub const HEADER_RESERVED: u8 = 0x00;

// ============================================================================
// Message Types
// ============================================================================

/// Arm the robot (enables motion and the deadman watchdog).
pub const MSG_TYPE_CMD_ARM: u8 = 0x01;
/// Disarm the robot and stop all servo outputs.
pub const MSG_TYPE_CMD_DISARM: u8 = 0x02;
/// Set the pulse width of servo channel 0.
pub const MSG_TYPE_CMD_SET_SERVO_CH0: u8 = 0x03;
/// Keep-alive; refreshes the deadman timer while armed.
pub const MSG_TYPE_CMD_PING: u8 = 0x04;
/// Status notification from the robot.
pub const MSG_TYPE_TELEMETRY: u8 = 0x10;

// ============================================================================
// Payload Sizes
// ============================================================================

/// Payload size of `SetServoCh0` (pulse width, u16).
pub const SERVO_CH0_PAYLOAD_SIZE: usize = 2;
/// Payload size of a telemetry notification.
pub const TELEMETRY_PAYLOAD_SIZE: usize = 8;
/// Total size of a telemetry frame.
pub const TELEMETRY_FRAME_SIZE: usize = HEADER_SIZE + TELEMETRY_PAYLOAD_SIZE;

// ============================================================================
// System States
// ============================================================================

/// Outputs off, commands other than `Arm` are ignored.
pub const STATE_DISARMED: u8 = 0x00;
/// Accepting motion commands.
pub const STATE_ARMED: u8 = 0x01;
/// Outputs forced off after a fault or a lost link.
pub const STATE_FAULT: u8 = 0x02;

// ============================================================================
// Error Codes
// ============================================================================

/// No error.
pub const ERR_CODE_NONE: u8 = 0x00;
/// No accepted command within the deadman interval.
pub const ERR_CODE_DEADMAN_TIMEOUT: u8 = 0x01;
/// Battery below the safe threshold.
pub const ERR_CODE_LOW_BATTERY: u8 = 0x02;
/// The servo driver did not respond.
pub const ERR_CODE_I2C_FAULT: u8 = 0x03;
/// The last command had an unknown message type.
pub const ERR_CODE_INVALID_CMD: u8 = 0x04;
/// Catch-all error code.
pub const ERR_CODE_UNKNOWN: u8 = 0xFF;

// ============================================================================
// Radio Service
// ============================================================================

/// Service advertised by the robot controller.
pub const SERVICE_UUID: &str = "12345678-1234-1234-1234-123456789abc";
/// Command characteristic (write without response).
pub const COMMAND_CHARACTERISTIC_UUID: &str = "12345678-1234-1234-1234-123456789abd";
/// Telemetry characteristic (notify).
pub const TELEMETRY_CHARACTERISTIC_UUID: &str = "12345678-1234-1234-1234-123456789abe";

// ============================================================================
// Timing
// ============================================================================

/// Robot-side deadman interval in milliseconds.
pub const DEADMAN_TIMEOUT_MS: u16 = 200;
/// Period at which the client repeats the current control command.
pub const COMMAND_PERIOD_MS: u64 = 20;
/// [`COMMAND_PERIOD_MS`] as a [`Duration`]. Shared with the robot's deadman
/// budget; never user configurable.
pub const COMMAND_PERIOD: Duration = Duration::from_millis(COMMAND_PERIOD_MS);

// ============================================================================
// Servo Range
// ============================================================================

/// Shortest pulse the robot will drive; shorter requests are clamped.
pub const SERVO_PULSE_MIN_US: u16 = 500;
/// Longest pulse the robot will drive; longer requests are clamped.
pub const SERVO_PULSE_MAX_US: u16 = 2500;
/// Neutral servo position.
pub const SERVO_PULSE_CENTER_US: u16 = 1500;
