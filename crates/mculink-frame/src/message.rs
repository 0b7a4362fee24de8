use std::fmt;

use bytes::Bytes;
use serde::Serialize;

/// Message category, carried as the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MessageType {
    Read = 10,
    ReadGroup = 11,
    ReadAck = 12,
    Write = 20,
    WriteAck = 21,
    Command = 30,
    CommandAck = 31,
    Firmware = 40,
    FirmwareAck = 41,
}

/// How a category lays out its header and payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderShape {
    /// `[type][timeId][identifier]`, no payload.
    Short,
    /// `[type][timeId][identifier][code]`: one implicit payload byte.
    ShortWithCode,
    /// `[type][timeId][identifier][length][payload]`.
    Long,
}

impl MessageType {
    /// All categories, in type-byte order.
    pub const ALL: [MessageType; 9] = [
        Self::Read,
        Self::ReadGroup,
        Self::ReadAck,
        Self::Write,
        Self::WriteAck,
        Self::Command,
        Self::CommandAck,
        Self::Firmware,
        Self::FirmwareAck,
    ];

    /// The wire type byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Header layout for this category.
    pub const fn shape(self) -> HeaderShape {
        match self {
            Self::Read | Self::ReadGroup => HeaderShape::Short,
            Self::FirmwareAck => HeaderShape::ShortWithCode,
            Self::ReadAck
            | Self::Write
            | Self::WriteAck
            | Self::Command
            | Self::CommandAck
            | Self::Firmware => HeaderShape::Long,
        }
    }

    /// The acknowledgement category a request of this type expects.
    pub const fn ack(self) -> Option<MessageType> {
        match self {
            Self::Read | Self::ReadGroup => Some(Self::ReadAck),
            Self::Write => Some(Self::WriteAck),
            Self::Command => Some(Self::CommandAck),
            Self::Firmware => Some(Self::FirmwareAck),
            Self::ReadAck | Self::WriteAck | Self::CommandAck | Self::FirmwareAck => None,
        }
    }

    /// Whether this category is a reply.
    pub const fn is_ack(self) -> bool {
        self.ack().is_none()
    }

    /// Human-readable category name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::ReadGroup => "read_group",
            Self::ReadAck => "read_ack",
            Self::Write => "write",
            Self::WriteAck => "write_ack",
            Self::Command => "command",
            Self::CommandAck => "command_ack",
            Self::Firmware => "firmware",
            Self::FirmwareAck => "firmware_ack",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_u8() == value)
            .ok_or(value)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded protocol message.
///
/// `payload` is empty for `Read`/`ReadGroup` and exactly one byte for
/// `FirmwareAck`; the codec rejects anything else for those categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub time_id: u16,
    pub identifier: u16,
    pub payload: Bytes,
}

impl Message {
    /// Create a message with time id 0.
    pub fn new(kind: MessageType, identifier: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            time_id: 0,
            identifier,
            payload: payload.into(),
        }
    }

    /// Parameter read request.
    pub fn read(identifier: u16) -> Self {
        Self::new(MessageType::Read, identifier, Bytes::new())
    }

    /// Parameter group read request.
    pub fn read_group(identifier: u16) -> Self {
        Self::new(MessageType::ReadGroup, identifier, Bytes::new())
    }

    /// Parameter write request.
    pub fn write(identifier: u16, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Write, identifier, payload)
    }

    /// Command request.
    pub fn command(identifier: u16, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Command, identifier, payload)
    }

    /// Bootloader request. The identifier is unused by the bootloader.
    pub fn firmware(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Firmware, 0, payload)
    }

    /// Reply to `request` with the given payload, echoing its ids.
    ///
    /// Returns `None` when `request` is itself a reply.
    pub fn reply_to(request: &Message, payload: impl Into<Bytes>) -> Option<Self> {
        let kind = request.kind.ack()?;
        Some(Self {
            kind,
            time_id: request.time_id,
            identifier: request.identifier,
            payload: payload.into(),
        })
    }

    /// Acknowledge `request` with a one-byte result code.
    ///
    /// Reads are answered with a value, not a code; use [`Message::reply_to`].
    pub fn ack_for(request: &Message, code: u8) -> Option<Self> {
        match request.kind {
            MessageType::Write | MessageType::Command | MessageType::Firmware => {
                Self::reply_to(request, Bytes::copy_from_slice(&[code]))
            }
            _ => None,
        }
    }

    /// Set the time id.
    pub fn with_time_id(mut self, time_id: u16) -> Self {
        self.time_id = time_id;
        self
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// First payload byte, the result code of an acknowledgement.
    pub fn result_code(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Decode a one-byte scalar payload.
    pub fn as_u8(&self) -> Option<u8> {
        self.fixed::<1>().map(|b| b[0])
    }

    /// Decode a big-endian two-byte scalar payload.
    pub fn as_u16(&self) -> Option<u16> {
        self.fixed::<2>().map(u16::from_be_bytes)
    }

    /// Decode a big-endian four-byte scalar payload.
    pub fn as_u32(&self) -> Option<u32> {
        self.fixed::<4>().map(u32::from_be_bytes)
    }

    /// Decode a big-endian IEEE-754 single-precision payload.
    pub fn as_f32(&self) -> Option<f32> {
        self.fixed::<4>().map(f32::from_be_bytes)
    }

    /// Decode a string payload, stopping at the first NUL.
    pub fn as_str(&self) -> Option<&str> {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.payload.len());
        std::str::from_utf8(&self.payload[..end]).ok()
    }

    /// Scalar decode fails closed: the payload must be exactly `N` bytes.
    fn fixed<const N: usize>(&self) -> Option<[u8; N]> {
        self.payload.as_ref().try_into().ok()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} id={} time={} len={}",
            self.kind,
            self.identifier,
            self.time_id,
            self.payload.len()
        )
    }
}
