use std::sync::Arc;

use tracing::debug;

use crate::cobs::CobsError;
use crate::codec::{decode_frame, DELIMITER, MAX_STUFFED_FRAME};
use crate::error::{FrameError, Result};
use crate::message::Message;
use crate::stats::FrameStats;

/// Byte-at-a-time frame parser.
///
/// Accumulates stuffed bytes into a fixed buffer until a delimiter arrives,
/// then decodes the record. Every outcome is counted in the shared
/// [`FrameStats`]. Bytes past the buffer are discarded and the record is
/// reported as a framing error at its delimiter.
pub struct FrameParser {
    buf: [u8; MAX_STUFFED_FRAME],
    len: usize,
    overflow: bool,
    stats: Arc<FrameStats>,
}

impl FrameParser {
    /// Create a parser with its own counters.
    pub fn new() -> Self {
        Self::with_stats(Arc::new(FrameStats::new()))
    }

    /// Create a parser that reports into shared counters.
    pub fn with_stats(stats: Arc<FrameStats>) -> Self {
        Self {
            buf: [0u8; MAX_STUFFED_FRAME],
            len: 0,
            overflow: false,
            stats,
        }
    }

    /// Feed one byte. Returns the decode outcome when `byte` is a delimiter
    /// that ends a non-empty record.
    pub fn push(&mut self, byte: u8) -> Option<Result<Message>> {
        if byte != DELIMITER {
            match self.buf.get_mut(self.len) {
                Some(slot) => {
                    *slot = byte;
                    self.len += 1;
                }
                None => self.overflow = true,
            }
            return None;
        }

        if self.len == 0 && !self.overflow {
            // Idle delimiters between frames.
            return None;
        }

        let outcome = if self.overflow {
            self.stats.record_overflow();
            Err(FrameError::Framing(CobsError::Overflow {
                capacity: MAX_STUFFED_FRAME,
            }))
        } else {
            let decoded = decode_frame(&self.buf[..self.len]);
            match &decoded {
                Ok(_) => self.stats.record_completed(),
                Err(err) => self.stats.record_error(err),
            }
            decoded
        };
        self.reset();

        if let Err(err) = &outcome {
            debug!(error = %err, "dropped corrupt frame");
        }
        Some(outcome)
    }

    /// Feed a slice, handing each valid message to `on_message`. Corrupt
    /// records are counted and skipped.
    pub fn feed(&mut self, bytes: &[u8], mut on_message: impl FnMut(Message)) {
        for &byte in bytes {
            if let Some(Ok(msg)) = self.push(byte) {
                on_message(msg);
            }
        }
    }

    /// Discard any partially accumulated record.
    pub fn reset(&mut self) {
        self.len = 0;
        self.overflow = false;
    }

    /// Number of bytes buffered for the current record.
    pub fn pending(&self) -> usize {
        self.len
    }

    /// Counters this parser reports into.
    pub fn stats(&self) -> &Arc<FrameStats> {
        &self.stats
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
