//! `tokio_util::codec` adapter for async links.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::codec::{decode_frame, encode_frame, DELIMITER, MAX_STUFFED_FRAME};
use crate::error::FrameError;
use crate::message::Message;
use crate::stats::FrameStats;

/// Frames messages over an async byte stream.
///
/// Corrupt frames are counted and skipped rather than ending the stream, so
/// a `FramedRead` keeps yielding messages after line noise.
#[derive(Debug, Default)]
pub struct McuCodec {
    stats: Arc<FrameStats>,
    overflow: bool,
}

impl McuCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report decode counters into `stats`.
    pub fn with_stats(stats: Arc<FrameStats>) -> Self {
        Self {
            stats,
            overflow: false,
        }
    }

    /// Decode counters for this codec.
    pub fn stats(&self) -> &Arc<FrameStats> {
        &self.stats
    }
}

impl Decoder for McuCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        loop {
            let Some(end) = src.iter().position(|&b| b == DELIMITER) else {
                if src.len() > MAX_STUFFED_FRAME {
                    // Keep scanning for the delimiter without buffering noise.
                    self.overflow = true;
                    src.clear();
                }
                return Ok(None);
            };

            let record = src.split_to(end);
            src.advance(1);

            if std::mem::take(&mut self.overflow) {
                self.stats.record_overflow();
                continue;
            }
            if record.is_empty() {
                continue;
            }

            match decode_frame(&record) {
                Ok(msg) => {
                    self.stats.record_completed();
                    return Ok(Some(msg));
                }
                Err(err) => {
                    self.stats.record_error(&err);
                    debug!(error = %err, "dropped corrupt frame");
                }
            }
        }
    }
}

impl Encoder<Message> for McuCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&item, dst)
    }
}

impl Encoder<&Message> for McuCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(item, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::encode_to_bytes;

    #[test]
    fn decode_skips_noise_between_frames() {
        let mut codec = McuCodec::new();
        let mut buf = BytesMut::from(&[0x03u8, 0x11, 0x00][..]);
        buf.extend_from_slice(&encode_to_bytes(&Message::read(510)).unwrap());

        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg, Message::read(510));
        assert!(buf.is_empty());
        assert_eq!(codec.stats().snapshot().total_errors(), 1);
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let wire = encode_to_bytes(&Message::read(1)).unwrap();
        let mut codec = McuCodec::new();
        let mut buf = BytesMut::from(&wire[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[3..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::read(1)));
    }

    #[test]
    fn overlong_noise_counts_framing_error() {
        let mut codec = McuCodec::new();
        let mut buf = BytesMut::from(&vec![0x22u8; MAX_STUFFED_FRAME + 5][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(&[0x22, 0x00]);
        buf.extend_from_slice(&encode_to_bytes(&Message::read(2)).unwrap());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::read(2)));
        assert_eq!(codec.stats().snapshot().framing_errors, 1);
    }

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, McuCodec::new());
        let mut stream = FramedRead::new(server, McuCodec::new());

        sink.send(Message::read(510)).await.unwrap();
        sink.send(Message::write(712, vec![0, 16])).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.identifier, 510);
        assert_eq!(second.payload.as_ref(), &[0, 16]);
    }
}
