//! COBS framing, CRC-16 checksums and message codec for the controller MCU link.
//!
//! This is the wire layer of mculink. Every message is framed as:
//! - A 5-byte header (type, time id, identifier), plus a 2-byte payload
//!   length and the payload for the long categories
//! - A big-endian CRC-16/MODBUS over header and payload
//! - COBS stuffing, so the single trailing 0x00 is the only zero on the wire
//!
//! Corruption is isolated to one frame: the streaming parser drops anything
//! that fails to unstuff or checksum and resynchronizes at the next delimiter.

pub mod checksum;
pub mod cobs;
pub mod codec;
pub mod error;
pub mod message;
pub mod parser;
pub mod reader;
pub mod stats;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::McuCodec;
pub use checksum::crc16;
pub use codec::{
    decode_frame, decode_raw, encode_frame, encode_raw, FrameConfig, CRC_SIZE, LONG_HEADER_SIZE,
    MAX_ENCODED_FRAME, MAX_PAYLOAD, MAX_RAW_FRAME, MAX_STUFFED_FRAME, MIN_FRAME_SIZE,
    SHORT_HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use message::{HeaderShape, Message, MessageType};
pub use parser::FrameParser;
pub use reader::FrameReader;
pub use stats::{FrameCounters, FrameStats};
pub use writer::FrameWriter;
