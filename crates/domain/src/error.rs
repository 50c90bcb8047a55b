//! Common error types for the protocol model.

/// Why an inbound transport message could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The binary frame is shorter than its fixed header.
    #[error("frame too short: {len} bytes")]
    ShortFrame {
        /// The actual length received.
        len: usize,
    },

    /// The first byte is not the binary response marker.
    #[error("unexpected response marker 0x{0:02X}")]
    UnexpectedMarker(u8),

    /// The request-class echo does not name a known register class.
    #[error("unknown register class 0x{0:02X}")]
    UnknownClass(u8),

    /// The peripheral answered with a non-zero status byte.
    #[error("peripheral reported status 0x{0:02X}")]
    Status(u8),

    /// A non-binary message is not valid UTF-8 text.
    #[error("notification is not valid text")]
    NotText,
}
