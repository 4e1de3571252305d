//! Commands that can be sent to the robot controller.

use crate::constants::*;
use crate::error::*;
use crate::frame::*;

/// Commands that can be sent to the robot controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Arm the robot.
    Arm,

    /// Disarm the robot and stop servo outputs.
    Disarm,

    /// Set the pulse width of servo channel 0.
    ///
    /// Any value encodes; the robot clamps to its safe range.
    SetServoCh0 {
        /// Pulse width in microseconds.
        pulse_us: u16,
    },

    /// Keep-alive.
    Ping,
}

impl Command {
    /// Get the message type for this command.
    pub fn code(&self) -> u8 {
        match self {
            Command::Arm => MSG_TYPE_CMD_ARM,
            Command::Disarm => MSG_TYPE_CMD_DISARM,
            Command::SetServoCh0 { .. } => MSG_TYPE_CMD_SET_SERVO_CH0,
            Command::Ping => MSG_TYPE_CMD_PING,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Arm => "ARM",
            Command::Disarm => "DISARM",
            Command::SetServoCh0 { .. } => "SET_SERVO_CH0",
            Command::Ping => "PING",
        }
    }

    /// Payload length this command declares in its header.
    pub fn payload_len(&self) -> usize {
        match self {
            Command::SetServoCh0 { .. } => SERVO_CH0_PAYLOAD_SIZE,
            Command::Arm | Command::Disarm | Command::Ping => 0,
        }
    }

    /// Encode the command to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload_len();
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len);
        buf.extend_from_slice(&Header::new(self.code(), payload_len as u8).to_bytes());

        match self {
            Command::SetServoCh0 { pulse_us } => {
                buf.extend_from_slice(&pulse_us.to_le_bytes());
            }
            Command::Arm | Command::Disarm | Command::Ping => {}
        }

        buf
    }

    /// Encode the command into an immutable, cheaply cloneable frame.
    pub fn frame(&self) -> CommandFrame {
        CommandFrame::from_vec(self.encode())
    }

    /// Decode a command frame, as the robot controller does on write.
    ///
    /// Validates the header version, that the frame length matches the
    /// declared payload length, that the payload fits [`MAX_PAYLOAD_SIZE`],
    /// and that the message type is a known command with the right payload.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let header = Header::parse(frame)?;

        if frame.len() != header.frame_len() {
            return Err(ProtocolError::PayloadLengthMismatch {
                expected: header.payload_len(),
                actual: frame.len() - HEADER_SIZE,
            });
        }

        if header.payload_len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: header.payload_len(),
            });
        }

        let payload = &frame[HEADER_SIZE..];

        match header.msg_type {
            MSG_TYPE_CMD_ARM => Ok(Command::Arm),
            MSG_TYPE_CMD_DISARM => Ok(Command::Disarm),
            MSG_TYPE_CMD_PING => Ok(Command::Ping),
            MSG_TYPE_CMD_SET_SERVO_CH0 => {
                if payload.len() != SERVO_CH0_PAYLOAD_SIZE {
                    return Err(ProtocolError::PayloadLengthMismatch {
                        expected: SERVO_CH0_PAYLOAD_SIZE,
                        actual: payload.len(),
                    });
                }
                let pulse_us = u16::from_le_bytes([payload[0], payload[1]]);
                Ok(Command::SetServoCh0 { pulse_us })
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::SetServoCh0 { pulse_us } => write!(f, "{} {}us", self.name(), pulse_us),
            _ => f.write_str(self.name()),
        }
    }
}
