use std::io::{ErrorKind, Read};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use mculink_transport::{McuStream, TransportError};

use crate::codec::{FrameConfig, MAX_ENCODED_FRAME};
use crate::error::{FrameError, Result};
use crate::message::Message;
use crate::parser::FrameParser;
use crate::stats::FrameStats;

const READ_CHUNK_SIZE: usize = 256;

/// Reads complete messages from any `Read` stream.
///
/// Handles partial reads and resynchronization internally. Corrupt frames
/// are counted and skipped; callers only ever see checksum-valid messages.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    parser: FrameParser,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_ENCODED_FRAME),
            parser: FrameParser::new(),
            config,
        }
    }

    /// Report decode counters into `stats` instead of private ones.
    pub fn with_stats(mut self, stats: Arc<FrameStats>) -> Self {
        self.parser = FrameParser::with_stats(stats);
        self
    }

    /// Read the next valid message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached and
    /// `Err(FrameError::Io(_))` with `TimedOut` when the stream's read
    /// timeout elapses.
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            while self.buf.has_remaining() {
                let byte = self.buf.get_u8();
                if let Some(Ok(msg)) = self.parser.push(byte) {
                    return Ok(msg);
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Drop buffered bytes and any partial record.
    pub fn resync(&mut self) {
        self.buf.clear();
        self.parser.reset();
    }

    /// Decode counters for this reader.
    pub fn stats(&self) -> &Arc<FrameStats> {
        self.parser.stats()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<McuStream> {
    /// Create a frame reader for `McuStream` and apply read timeout from config.
    pub fn with_config_mcu(mut inner: McuStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) => FrameError::Io(io),
        TransportError::Closed => FrameError::ConnectionClosed,
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
