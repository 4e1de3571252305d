//! Frame header, immutable command frames and stream framing.
//!
//! Every frame starts with the same 4-byte header:
//!
//! ```text
//! +---------+----------+-------------+----------+
//! | version | msg_type | payload_len | reserved |
//! +---------+----------+-------------+----------+
//! ```
//!
//! Over the radio link each write or notification carries exactly one frame.
//! Over a byte stream (the TCP bridge) frames are concatenated, and
//! [`FrameCodec`] uses `payload_len` to split them again.

use bytes::{Buf, Bytes, BytesMut};

use crate::constants::*;
use crate::error::*;

/// The fixed header at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version.
    pub version: u8,
    /// Message type (opcode).
    pub msg_type: u8,
    /// Number of payload bytes following the header.
    pub payload_len: u8,
    /// Reserved, zero on send and ignored on receive.
    pub reserved: u8,
}

impl Header {
    /// Create an outbound header for the current protocol version.
    pub fn new(msg_type: u8, payload_len: u8) -> Self {
        Header {
            version: PROTOCOL_VERSION,
            msg_type,
            payload_len,
            reserved: HEADER_RESERVED,
        }
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        [self.version, self.msg_type, self.payload_len, self.reserved]
    }

    /// Parse the header at the start of `frame`.
    ///
    /// Fails when fewer than [`HEADER_SIZE`] bytes are present or when the
    /// version is not [`PROTOCOL_VERSION`]. The payload itself is not checked.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: HEADER_SIZE,
                actual: frame.len(),
            });
        }

        let header = Header {
            version: frame[0],
            msg_type: frame[1],
            payload_len: frame[2],
            reserved: frame[3],
        };

        if header.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        Ok(header)
    }

    /// Declared payload length as a `usize`.
    pub fn payload_len(&self) -> usize {
        self.payload_len as usize
    }

    /// Declared total frame length (header plus payload).
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }
}

/// One complete, immutable outbound frame.
///
/// Cloning is cheap (reference counted), so a frame can be stored once and
/// handed to the transport on every repetition without re-encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandFrame(Bytes);

impl CommandFrame {
    /// Wrap already encoded frame bytes.
    pub fn from_vec(data: Vec<u8>) -> Self {
        CommandFrame(Bytes::from(data))
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the frame is empty (never true for encoded commands).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Message type byte from the header, if present.
    pub fn msg_type(&self) -> Option<u8> {
        self.0.get(1).copied()
    }

    /// Upper-case hex rendering, space separated (`01 03 02 00 DC 05`).
    pub fn to_hex(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Splits a byte stream back into frames.
///
/// Bytes that cannot start a frame (wrong version, or an implausible payload
/// length) are discarded one at a time until the stream realigns.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        FrameCodec {
            buffer: BytesMut::with_capacity(HEADER_SIZE + MAX_PAYLOAD_SIZE * 8),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode a complete frame from the buffer.
    ///
    /// Returns `Some(frame)` (header included) if a complete frame is
    /// available, or `None` if more data is needed.
    pub fn decode(&mut self) -> Option<Vec<u8>> {
        loop {
            // Scan for a version byte, discarding any preceding garbage
            while !self.buffer.is_empty() && self.buffer[0] != PROTOCOL_VERSION {
                self.buffer.advance(1);
            }

            if self.buffer.len() < HEADER_SIZE {
                return None;
            }

            let payload_len = self.buffer[2] as usize;
            if payload_len > MAX_PAYLOAD_SIZE {
                log::debug!("discarding byte before implausible payload length {}", payload_len);
                self.buffer.advance(1);
                continue;
            }

            let frame_len = HEADER_SIZE + payload_len;
            if self.buffer.len() < frame_len {
                return None;
            }

            return Some(self.buffer.split_to(frame_len).to_vec());
        }
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
