use crate::cobs::CobsError;
use crate::message::MessageType;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stuffed record is malformed or truncated.
    #[error("framing error: {0}")]
    Framing(#[from] CobsError),

    /// The unstuffed record is shorter or longer than its category allows.
    #[error("length error ({len} bytes, expected {expected})")]
    Length { len: usize, expected: usize },

    /// The trailing CRC does not match the header and payload.
    #[error("checksum mismatch (frame 0x{received:04X}, computed 0x{computed:04X})")]
    Checksum { received: u16, computed: u16 },

    /// The type byte is not one of the known message categories.
    #[error("unknown message type byte {0}")]
    UnknownType(u8),

    /// The payload exceeds the protocol maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload does not fit the message category's header shape.
    #[error("{kind} messages cannot carry a {len}-byte payload")]
    PayloadShape { kind: MessageType, len: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed before a complete frame was received.
    #[error("link closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this error describes a corrupt frame on the wire, as opposed
    /// to a local encode or I/O failure.
    pub fn is_corrupt_frame(&self) -> bool {
        matches!(
            self,
            Self::Framing(_) | Self::Length { .. } | Self::Checksum { .. } | Self::UnknownType(_)
        )
    }

    /// Whether this is an I/O timeout from the underlying stream.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(err) if matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
