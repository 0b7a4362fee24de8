//! In-process controller simulator for tests and demos.
//!
//! A [`DeviceSim`] sits on the device end of a [`McuStream::pair`], decodes
//! each request and answers through a [`Responder`].

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use mculink_frame::{FrameReader, FrameWriter, Message, MessageType};
use mculink_transport::McuStream;
use tracing::debug;

use crate::config::ChannelConfig;
use crate::engine::ProtocolEngine;
use crate::error::{ChannelError, Result};

const SIM_POLL: Duration = Duration::from_millis(5);

/// What the simulated controller does with one request.
#[derive(Debug, Clone)]
pub enum SimReply {
    /// Encode and send this message.
    Reply(Message),
    /// Send these bytes verbatim (several frames, garbage, anything).
    Raw(Bytes),
    /// Say nothing.
    Silence,
}

impl From<Option<Message>> for SimReply {
    fn from(reply: Option<Message>) -> Self {
        reply.map_or(SimReply::Silence, SimReply::Reply)
    }
}

/// Controller behaviour.
pub trait Responder: Send + 'static {
    fn respond(&mut self, request: &Message) -> SimReply;
}

impl<F> Responder for F
where
    F: FnMut(&Message) -> SimReply + Send + 'static,
{
    fn respond(&mut self, request: &Message) -> SimReply {
        (self)(request)
    }
}

/// A simulated controller running on its own thread.
pub struct DeviceSim {
    stop: Arc<AtomicBool>,
    received: Arc<Mutex<Vec<Message>>>,
    task: Option<JoinHandle<()>>,
}

impl DeviceSim {
    /// Serve requests arriving on `stream` until stopped or the host end
    /// goes away.
    pub fn spawn(stream: McuStream, responder: impl Responder) -> Result<Self> {
        let mut rx = stream.try_clone()?;
        rx.set_read_timeout(Some(SIM_POLL))?;

        let stop = Arc::new(AtomicBool::new(false));
        let received = Arc::new(Mutex::new(Vec::new()));
        let task = {
            let stop = Arc::clone(&stop);
            let received = Arc::clone(&received);
            thread::Builder::new()
                .name("mcu-sim".to_string())
                .spawn(move || serve(rx, stream, responder, &stop, &received))
                .map_err(ChannelError::Spawn)?
        };

        Ok(Self {
            stop,
            received,
            task: Some(task),
        })
    }

    /// A protocol engine wired to a fresh simulator.
    pub fn attach(
        responder: impl Responder,
        config: ChannelConfig,
    ) -> Result<(ProtocolEngine, DeviceSim)> {
        let (host, device) = McuStream::pair();
        let sim = Self::spawn(device, responder)?;
        let engine = ProtocolEngine::start_with_config(host, config)?;
        Ok((engine, sim))
    }

    /// Every request seen so far, in arrival order.
    pub fn received(&self) -> Vec<Message> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Stop serving and wait for the simulator thread.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            let _ = task.join();
        }
    }
}

impl Drop for DeviceSim {
    fn drop(&mut self) {
        self.halt();
    }
}

fn serve(
    rx: McuStream,
    tx: McuStream,
    mut responder: impl Responder,
    stop: &AtomicBool,
    received: &Mutex<Vec<Message>>,
) {
    let mut reader = FrameReader::new(rx);
    let mut writer = FrameWriter::new(tx);

    while !stop.load(Ordering::Acquire) {
        let request = match reader.read_message() {
            Ok(msg) => msg,
            Err(err) if err.is_timeout() => continue,
            Err(_) => break,
        };
        debug!(request = %request, "sim request");
        received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let sent = match responder.respond(&request) {
            SimReply::Reply(reply) => writer.write_message(&reply).is_ok(),
            SimReply::Raw(bytes) => writer.get_mut().write_all(&bytes).is_ok(),
            SimReply::Silence => true,
        };
        if !sent {
            break;
        }
    }
}

/// A register file: answers reads from stored values, stores writes, and
/// acknowledges commands with a configurable result code.
///
/// Reads of unknown identifiers go unanswered, like a controller ignoring
/// an id it does not implement. Firmware frames are ignored; there is no
/// bootloader here.
#[derive(Debug, Clone, Default)]
pub struct Registers {
    values: HashMap<u16, Bytes>,
    commands: HashMap<u16, u8>,
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw value.
    pub fn with(mut self, id: u16, value: impl Into<Bytes>) -> Self {
        self.values.insert(id, value.into());
        self
    }

    pub fn with_u8(self, id: u16, value: u8) -> Self {
        self.with(id, vec![value])
    }

    pub fn with_u16(self, id: u16, value: u16) -> Self {
        self.with(id, value.to_be_bytes().to_vec())
    }

    pub fn with_u32(self, id: u16, value: u32) -> Self {
        self.with(id, value.to_be_bytes().to_vec())
    }

    pub fn with_f32(self, id: u16, value: f32) -> Self {
        self.with(id, value.to_be_bytes().to_vec())
    }

    /// Store a NUL-terminated string.
    pub fn with_str(self, id: u16, value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.with(id, bytes)
    }

    /// Answer command `id` with `code` instead of 0.
    pub fn with_command(mut self, id: u16, code: u8) -> Self {
        self.commands.insert(id, code);
        self
    }

    /// Current value of `id`.
    pub fn value(&self, id: u16) -> Option<&Bytes> {
        self.values.get(&id)
    }
}

impl Responder for Registers {
    fn respond(&mut self, request: &Message) -> SimReply {
        match request.kind {
            MessageType::Read | MessageType::ReadGroup => match self.values.get(&request.identifier) {
                Some(value) => Message::reply_to(request, value.clone()).into(),
                None => SimReply::Silence,
            },
            MessageType::Write => {
                self.values
                    .insert(request.identifier, request.payload.clone());
                Message::ack_for(request, 0).into()
            }
            MessageType::Command => {
                let code = self.commands.get(&request.identifier).copied().unwrap_or(0);
                Message::ack_for(request, code).into()
            }
            _ => SimReply::Silence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_answer_reads_and_store_writes() {
        let mut regs = Registers::new().with_u16(712, 1);

        let SimReply::Reply(reply) = regs.respond(&Message::read(712)) else {
            panic!("expected reply");
        };
        assert_eq!(reply.kind, MessageType::ReadAck);
        assert_eq!(reply.as_u16(), Some(1));

        let SimReply::Reply(ack) = regs.respond(&Message::write(712, vec![0, 2])) else {
            panic!("expected ack");
        };
        assert_eq!(ack.kind, MessageType::WriteAck);
        assert_eq!(ack.result_code(), Some(0));
        assert_eq!(regs.value(712).map(|b| b.as_ref()), Some(&[0u8, 2][..]));
    }

    #[test]
    fn unknown_read_is_silent() {
        let mut regs = Registers::new();
        assert!(matches!(regs.respond(&Message::read(1)), SimReply::Silence));
    }

    #[test]
    fn command_code_override() {
        let mut regs = Registers::new().with_command(204, 3);
        let SimReply::Reply(ack) = regs.respond(&Message::command(204, Vec::<u8>::new())) else {
            panic!("expected ack");
        };
        assert_eq!(ack.kind, MessageType::CommandAck);
        assert_eq!(ack.result_code(), Some(3));
    }

    #[test]
    fn sim_logs_requests_over_pair() {
        let (host, device) = McuStream::pair();
        let sim = DeviceSim::spawn(device, Registers::new().with_u8(5, 7)).unwrap();

        let mut writer = FrameWriter::new(host.try_clone().unwrap());
        let mut reader = FrameReader::new(host);
        writer.write_message(&Message::read(5)).unwrap();
        let reply = reader.read_message().unwrap();

        assert_eq!(reply.as_u8(), Some(7));
        assert_eq!(sim.received(), vec![Message::read(5)]);
        sim.stop();
    }
}
