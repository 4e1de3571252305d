//! Telemetry notifications from the robot controller.
//!
//! ```text
//! offset  size  field
//! 0       4     header (version, 0x10, 8, reserved)
//! 4       1     state
//! 5       1     error code
//! 6       2     last command age, ms (LE)
//! 8       2     battery voltage, mV (LE)
//! 10      2     pad
//! ```

use crate::constants::*;
use crate::error::*;
use crate::frame::*;
use crate::types::*;

/// Decoded robot status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    /// System state.
    pub state: SystemState,
    /// Error code.
    pub error_code: ErrorCode,
    /// Milliseconds since the robot last accepted a command.
    pub last_cmd_age_ms: u16,
    /// Battery voltage in millivolts.
    pub battery_mv: u16,
}

impl Telemetry {
    /// Decode a telemetry frame.
    ///
    /// The frame is rejected as a whole when it is shorter than
    /// [`TELEMETRY_FRAME_SIZE`], carries another version or message type, or
    /// declares a payload length other than [`TELEMETRY_PAYLOAD_SIZE`].
    /// Unrecognized state and error bytes do not fail the decode; they map to
    /// [`SystemState::Fault`] and [`ErrorCode::Unknown`].
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < TELEMETRY_FRAME_SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: TELEMETRY_FRAME_SIZE,
                actual: frame.len(),
            });
        }

        let header = Header::parse(frame)?;

        if header.msg_type != MSG_TYPE_TELEMETRY {
            return Err(ProtocolError::UnexpectedMessageType {
                expected: MSG_TYPE_TELEMETRY,
                actual: header.msg_type,
            });
        }

        if header.payload_len() != TELEMETRY_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadLengthMismatch {
                expected: TELEMETRY_PAYLOAD_SIZE,
                actual: header.payload_len(),
            });
        }

        let payload = &frame[HEADER_SIZE..TELEMETRY_FRAME_SIZE];

        Ok(Telemetry {
            state: SystemState::from(payload[0]),
            error_code: ErrorCode::from(payload[1]),
            last_cmd_age_ms: u16::from_le_bytes([payload[2], payload[3]]),
            battery_mv: u16::from_le_bytes([payload[4], payload[5]]),
        })
    }

    /// Encode as the robot controller sends it (pad bytes zero).
    pub fn encode(&self) -> [u8; TELEMETRY_FRAME_SIZE] {
        let mut buf = [0u8; TELEMETRY_FRAME_SIZE];
        buf[..HEADER_SIZE]
            .copy_from_slice(&Header::new(MSG_TYPE_TELEMETRY, TELEMETRY_PAYLOAD_SIZE as u8).to_bytes());
        buf[4] = self.state.into();
        buf[5] = self.error_code.into();
        buf[6..8].copy_from_slice(&self.last_cmd_age_ms.to_le_bytes());
        buf[8..10].copy_from_slice(&self.battery_mv.to_le_bytes());
        buf
    }

    /// Battery voltage in volts.
    pub fn battery_volts(&self) -> f32 {
        self.battery_mv as f32 / 1000.0
    }
}

impl std::fmt::Display for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "state={} error={} last_cmd_age={}ms battery={:.1}V",
            self.state,
            self.error_code,
            self.last_cmd_age_ms,
            self.battery_volts()
        )
    }
}

/// Decode a telemetry frame. See [`Telemetry::decode`].
pub fn decode_telemetry(frame: &[u8]) -> Result<Telemetry, ProtocolError> {
    Telemetry::decode(frame)
}
