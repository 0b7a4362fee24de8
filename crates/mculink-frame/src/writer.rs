use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use mculink_transport::McuStream;
use tracing::trace;

use crate::codec::{encode_frame, FrameConfig, MAX_ENCODED_FRAME};
use crate::error::{FrameError, Result};
use crate::message::Message;
use crate::reader::transport_to_frame_error;

/// Writes complete frames to any `Write` stream.
///
/// A successful return means every byte was handed to the stream and the
/// stream was flushed; for a serial port that is the TX-complete point.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_ENCODED_FRAME),
            config,
        }
    }

    /// Encode and send one message (blocking).
    pub fn write_message(&mut self, msg: &Message) -> Result<()> {
        if msg.payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: msg.payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(msg, &mut self.buf)?;
        trace!(kind = %msg.kind, id = msg.identifier, bytes = self.buf.len(), "tx frame");

        let buf = std::mem::take(&mut self.buf);
        let result = self.write_all_then_flush(&buf);
        self.buf = buf;
        result
    }

    /// Send bytes that are already a complete wire frame.
    pub fn write_encoded(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_ENCODED_FRAME {
            return Err(FrameError::PayloadTooLarge {
                size: frame.len(),
                max: MAX_ENCODED_FRAME,
            });
        }
        self.write_all_then_flush(frame)
    }

    fn write_all_then_flush(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Lower the maximum payload size for subsequent sends. Values above
    /// the protocol maximum are clamped.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size.min(crate::codec::MAX_PAYLOAD);
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<McuStream> {
    /// Create a frame writer for `McuStream` and apply write timeout from config.
    pub fn with_config_mcu(mut inner: McuStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
