//! Binary frame formats exchanged over the UART characteristic pair.
//!
//! ## Outbound register request (5 bytes)
//!
//! | Byte | Value |
//! |------|-------|
//! | 0 | Opcode high (`0x22`, read) |
//! | 1 | Opcode low (register class) |
//! | 2 | Length (`0x02`) |
//! | 3–4 | Register id, big-endian |
//!
//! ## Inbound register response
//!
//! | Byte | Value |
//! |------|-------|
//! | 0 | Response marker (`0xB0`) |
//! | 1 | Class echo (opcode low byte) |
//! | 2 | Status (`0x00` = ok) |
//! | 3 | Length (payload bytes + 2) |
//! | 4–5 | Register id, big-endian |
//! | 6.. | Payload |

use serde::Serialize;

use crate::codec;
use crate::error::DecodeError;
use crate::register::RegisterId;

/// High byte shared by both request opcodes.
pub const READ_OPCODE: u8 = 0x22;
/// Length field of an outbound request (two id bytes).
pub const REQUEST_LENGTH: u8 = 0x02;
/// First byte of every inbound binary frame.
pub const RESPONSE_MARKER: u8 = 0xB0;

pub const CLASS_OFFSET: usize = 1;
pub const STATUS_OFFSET: usize = 2;
pub const LENGTH_OFFSET: usize = 3;
pub const ID_OFFSET: usize = 4;
pub const PAYLOAD_OFFSET: usize = 6;
/// Bytes counted by the length field that are not payload (the id).
pub const LENGTH_OVERHEAD: usize = 2;

/// Register namespace, selected by the low byte of the request opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterClass {
    /// Real-time telemetry registers ("RLI").
    Telemetry,
    /// Identification registers ("ECU").
    Identification,
}

impl RegisterClass {
    /// Opcode low byte for this class.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Telemetry => 0x01,
            Self::Identification => 0x02,
        }
    }

    /// Full 16-bit request opcode.
    #[must_use]
    pub const fn opcode(self) -> u16 {
        u16::from_be_bytes([READ_OPCODE, self.code()])
    }

    /// Resolve the class echoed in a response frame.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Telemetry),
            0x02 => Some(Self::Identification),
            _ => None,
        }
    }
}

impl std::fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Telemetry => f.write_str("RLI"),
            Self::Identification => f.write_str("ECU"),
        }
    }
}

/// Build the 5-byte request for one register.
#[must_use]
pub fn request(class: RegisterClass, id: RegisterId) -> [u8; 5] {
    let [op_hi, op_lo] = class.opcode().to_be_bytes();
    let [id_hi, id_lo] = id.get().to_be_bytes();
    [op_hi, op_lo, REQUEST_LENGTH, id_hi, id_lo]
}

/// Whether an inbound message is a binary frame rather than a text line.
///
/// The marker is outside the printable ASCII range, so a text line can
/// never be mistaken for a frame.
#[must_use]
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.first() == Some(&RESPONSE_MARKER)
}

/// A parsed inbound register response.
///
/// Keeps the complete raw frame so the codec can be applied according to
/// the register's decode rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Class echoed by the peripheral.
    pub class: RegisterClass,
    /// Register the response answers.
    pub id: RegisterId,
    /// Status byte (`0` = ok).
    pub status: u8,
    /// The complete frame, header included.
    pub bytes: Vec<u8>,
}

impl ResponseFrame {
    /// Parse a binary frame header.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ShortFrame`] when the header is incomplete,
    /// [`DecodeError::UnexpectedMarker`] when byte 0 is not the response
    /// marker, and [`DecodeError::UnknownClass`] when the class echo is not
    /// recognised.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < PAYLOAD_OFFSET {
            return Err(DecodeError::ShortFrame { len: bytes.len() });
        }
        if bytes[0] != RESPONSE_MARKER {
            return Err(DecodeError::UnexpectedMarker(bytes[0]));
        }
        let class = RegisterClass::from_code(bytes[CLASS_OFFSET])
            .ok_or(DecodeError::UnknownClass(bytes[CLASS_OFFSET]))?;
        let id = RegisterId::new(u16::from_be_bytes([
            bytes[ID_OFFSET],
            bytes[ID_OFFSET + 1],
        ]));

        Ok(Self {
            class,
            id,
            status: bytes[STATUS_OFFSET],
            bytes: bytes.to_vec(),
        })
    }

    /// Check the status byte.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Status`] when the peripheral flagged the read
    /// as failed.
    pub fn ensure_ok(&self) -> Result<(), DecodeError> {
        if self.status == 0 {
            Ok(())
        } else {
            Err(DecodeError::Status(self.status))
        }
    }

    /// Payload bytes as delimited by the length field.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        codec::payload(&self.bytes)
    }
}
