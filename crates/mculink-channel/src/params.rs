//! Typed parameter, command and firmware requests.
//!
//! The controller judges a write or command by the acknowledgement's
//! category alone; the one-byte result code inside is returned to the
//! caller untouched.

use bytes::Bytes;
use mculink_frame::{Message, MessageType};
use tracing::{error, warn};

use crate::engine::{ProtocolEngine, ReplyGuard};
use crate::error::{ChannelError, Result};

impl ProtocolEngine {
    /// Send `request`, require the matching acknowledgement category and,
    /// when `match_identifier` is set, the echoed identifier.
    fn expect_ack(&self, request: &Message, match_identifier: bool) -> Result<ReplyGuard> {
        let expected = request.kind.ack().unwrap_or(request.kind);
        let reply = self.request(request)?;

        if reply.kind != expected {
            warn!(
                id = request.identifier,
                expected = %expected,
                got = %reply.kind,
                "unexpected reply category"
            );
            return Err(ChannelError::UnexpectedReply {
                expected,
                got: reply.kind,
                identifier: request.identifier,
            });
        }
        if match_identifier && reply.identifier != request.identifier {
            error!(
                sent = request.identifier,
                received = reply.identifier,
                "reply identifier does not match request"
            );
            return Err(ChannelError::Desync {
                sent: request.identifier,
                received: reply.identifier,
            });
        }
        Ok(reply)
    }

    /// Read parameter `id` and return the whole reply.
    pub fn read_parameter(&self, id: u16) -> Result<Message> {
        Ok(self.expect_ack(&Message::read(id), true)?.into_message())
    }

    /// Read a parameter group.
    pub fn read_group(&self, id: u16) -> Result<Message> {
        Ok(self.expect_ack(&Message::read_group(id), true)?.into_message())
    }

    pub fn read_u8(&self, id: u16) -> Result<u8> {
        let reply = self.read_parameter(id)?;
        reply.as_u8().ok_or_else(|| decode_error(&reply, "u8"))
    }

    pub fn read_u16(&self, id: u16) -> Result<u16> {
        let reply = self.read_parameter(id)?;
        reply.as_u16().ok_or_else(|| decode_error(&reply, "u16"))
    }

    pub fn read_u32(&self, id: u16) -> Result<u32> {
        let reply = self.read_parameter(id)?;
        reply.as_u32().ok_or_else(|| decode_error(&reply, "u32"))
    }

    pub fn read_f32(&self, id: u16) -> Result<f32> {
        let reply = self.read_parameter(id)?;
        reply.as_f32().ok_or_else(|| decode_error(&reply, "f32"))
    }

    /// Read a string parameter, stopping at the first NUL.
    pub fn read_string(&self, id: u16) -> Result<String> {
        let reply = self.read_parameter(id)?;
        reply
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| decode_error(&reply, "utf-8 string"))
    }

    /// Write raw bytes to parameter `id`; returns the acknowledgement
    /// payload (normally a single result code).
    pub fn write_bytes(&self, id: u16, value: &[u8]) -> Result<Bytes> {
        let request = Message::write(id, Bytes::copy_from_slice(value));
        Ok(self.expect_ack(&request, true)?.into_message().payload)
    }

    pub fn write_u8(&self, id: u16, value: u8) -> Result<Bytes> {
        self.write_bytes(id, &[value])
    }

    pub fn write_u16(&self, id: u16, value: u16) -> Result<Bytes> {
        self.write_bytes(id, &value.to_be_bytes())
    }

    pub fn write_u32(&self, id: u16, value: u32) -> Result<Bytes> {
        self.write_bytes(id, &value.to_be_bytes())
    }

    pub fn write_f32(&self, id: u16, value: f32) -> Result<Bytes> {
        self.write_bytes(id, &value.to_be_bytes())
    }

    /// Send command `id` without arguments.
    pub fn send_command(&self, id: u16) -> Result<Bytes> {
        self.send_command_with(id, &[])
    }

    /// Send command `id` with an argument payload; returns the
    /// acknowledgement payload.
    pub fn send_command_with(&self, id: u16, args: &[u8]) -> Result<Bytes> {
        let request = Message::command(id, Bytes::copy_from_slice(args));
        Ok(self.expect_ack(&request, true)?.into_message().payload)
    }

    /// Send one bootloader frame and return its result code.
    ///
    /// Bootloader replies do not echo an identifier, so only the category
    /// is checked.
    pub fn send_firmware(&self, payload: &[u8]) -> Result<u8> {
        let request = Message::firmware(Bytes::copy_from_slice(payload));
        let reply = self.expect_ack(&request, false)?;
        reply.result_code().ok_or_else(|| decode_error(&reply, "result code"))
    }
}

fn decode_error(reply: &Message, expected: &'static str) -> ChannelError {
    warn!(id = reply.identifier, len = reply.len(), expected, "reply payload does not decode");
    ChannelError::Decode {
        identifier: reply.identifier,
        expected,
        len: reply.len(),
    }
}

/// Whether `err` is the controller answering from its bootloader.
pub fn is_bootloader_reply(err: &ChannelError) -> bool {
    matches!(
        err,
        ChannelError::UnexpectedReply {
            got: MessageType::FirmwareAck,
            ..
        }
    )
}
