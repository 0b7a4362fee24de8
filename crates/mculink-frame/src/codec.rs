use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum::{crc16, FRAME_CRC};
use crate::cobs;
use crate::error::{FrameError, Result};
use crate::message::{HeaderShape, Message, MessageType};

/// Short header: type (1) + time id (2) + identifier (2).
pub const SHORT_HEADER_SIZE: usize = 5;

/// Long header: short header + payload length (2).
pub const LONG_HEADER_SIZE: usize = 7;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 2;

/// Smallest unstuffed record: short header + checksum.
pub const MIN_FRAME_SIZE: usize = SHORT_HEADER_SIZE + CRC_SIZE;

/// Protocol maximum payload size.
pub const MAX_PAYLOAD: usize = 128;

/// Largest unstuffed record: long header + max payload + checksum.
pub const MAX_RAW_FRAME: usize = LONG_HEADER_SIZE + MAX_PAYLOAD + CRC_SIZE;

/// Largest stuffed record, without the delimiter.
pub const MAX_STUFFED_FRAME: usize = cobs::max_stuffed_len(MAX_RAW_FRAME);

/// Largest frame on the wire, delimiter included.
pub const MAX_ENCODED_FRAME: usize = MAX_STUFFED_FRAME + 1;

/// Frame delimiter.
pub const DELIMITER: u8 = 0x00;

/// Check that `msg` fits its category's header shape.
pub fn validate(msg: &Message) -> Result<()> {
    let len = msg.payload.len();
    match msg.kind.shape() {
        HeaderShape::Short if len != 0 => Err(FrameError::PayloadShape {
            kind: msg.kind,
            len,
        }),
        HeaderShape::ShortWithCode if len != 1 => Err(FrameError::PayloadShape {
            kind: msg.kind,
            len,
        }),
        HeaderShape::Long if len > MAX_PAYLOAD => Err(FrameError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD,
        }),
        _ => Ok(()),
    }
}

/// Append the unstuffed record (header, payload, checksum) to `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────┬─────────────┬──────────────┬─────────────┬───────────┬───────────┐
/// │ Type (1) │ TimeId (2)  │ Ident (2)    │ Length (2)  │ Payload   │ CRC (2)   │
/// │          │ BE          │ BE           │ BE, long    │ long only │ BE        │
/// └──────────┴─────────────┴──────────────┴─────────────┴───────────┴───────────┘
/// ```
/// `FirmwareAck` carries its single payload byte straight after the
/// identifier, without a length field.
pub fn encode_raw(msg: &Message, dst: &mut BytesMut) -> Result<()> {
    validate(msg)?;

    let start = dst.len();
    dst.reserve(LONG_HEADER_SIZE + msg.payload.len() + CRC_SIZE);
    dst.put_u8(msg.kind.as_u8());
    dst.put_u16(msg.time_id);
    dst.put_u16(msg.identifier);
    if msg.kind.shape() == HeaderShape::Long {
        // Bounded by MAX_PAYLOAD in validate().
        dst.put_u16(msg.payload.len() as u16);
    }
    dst.put_slice(&msg.payload);

    let crc = crc16(&dst[start..]);
    dst.put_u16(crc);
    Ok(())
}

/// Encode `msg` as a complete wire frame (stuffed record + delimiter).
pub fn encode_frame(msg: &Message, dst: &mut BytesMut) -> Result<()> {
    let mut raw = BytesMut::with_capacity(MAX_RAW_FRAME);
    encode_raw(msg, &mut raw)?;
    cobs::stuff(&raw, dst);
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Encode `msg` into a freshly allocated wire frame.
pub fn encode_to_bytes(msg: &Message) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(MAX_ENCODED_FRAME);
    encode_frame(msg, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode one unstuffed record.
///
/// Checks run in order: minimum size, checksum, type byte, then the exact
/// length the category implies.
pub fn decode_raw(raw: &[u8]) -> Result<Message> {
    if raw.len() < MIN_FRAME_SIZE {
        return Err(FrameError::Length {
            len: raw.len(),
            expected: MIN_FRAME_SIZE,
        });
    }

    let (body, trailer) = raw.split_at(raw.len() - CRC_SIZE);
    let received = u16::from_be_bytes([trailer[0], trailer[1]]);
    let computed = FRAME_CRC.checksum(body);
    if received != computed {
        return Err(FrameError::Checksum { received, computed });
    }

    let kind = MessageType::try_from(body[0]).map_err(FrameError::UnknownType)?;
    let time_id = u16::from_be_bytes([body[1], body[2]]);
    let identifier = u16::from_be_bytes([body[3], body[4]]);

    let payload = match kind.shape() {
        HeaderShape::Short => {
            expect_len(body.len(), SHORT_HEADER_SIZE)?;
            Bytes::new()
        }
        HeaderShape::ShortWithCode => {
            expect_len(body.len(), SHORT_HEADER_SIZE + 1)?;
            Bytes::copy_from_slice(&body[SHORT_HEADER_SIZE..])
        }
        HeaderShape::Long => {
            if body.len() < LONG_HEADER_SIZE {
                return Err(FrameError::Length {
                    len: raw.len(),
                    expected: LONG_HEADER_SIZE + CRC_SIZE,
                });
            }
            let len = usize::from(u16::from_be_bytes([body[5], body[6]]));
            if len > MAX_PAYLOAD {
                return Err(FrameError::Length {
                    len: raw.len(),
                    expected: MAX_RAW_FRAME,
                });
            }
            expect_len(body.len(), LONG_HEADER_SIZE + len)?;
            Bytes::copy_from_slice(&body[LONG_HEADER_SIZE..])
        }
    };

    Ok(Message {
        kind,
        time_id,
        identifier,
        payload,
    })
}

fn expect_len(body_len: usize, expected_body: usize) -> Result<()> {
    if body_len == expected_body {
        Ok(())
    } else {
        Err(FrameError::Length {
            len: body_len + CRC_SIZE,
            expected: expected_body + CRC_SIZE,
        })
    }
}

/// Decode one stuffed record. A trailing delimiter, if present, is ignored.
pub fn decode_frame(stuffed: &[u8]) -> Result<Message> {
    let stuffed = stuffed.strip_suffix(&[DELIMITER]).unwrap_or(stuffed);
    let mut raw = [0u8; MAX_RAW_FRAME];
    let len = cobs::unstuff(stuffed, &mut raw)?;
    decode_raw(&raw[..len])
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size accepted for sending. Default and ceiling: 128.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cobs::CobsError;

    fn raw(msg: &Message) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_raw(msg, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn read_request_header_layout() {
        let bytes = raw(&Message::read(510));
        assert_eq!(&bytes[..5], &[10, 0x00, 0x00, 0x01, 0xFE]);
        assert_eq!(bytes.len(), MIN_FRAME_SIZE);
        assert_eq!(&bytes[5..], &crc16(&bytes[..5]).to_be_bytes());
    }

    #[test]
    fn long_header_carries_length() {
        let msg = Message::write(712, vec![0xAA, 0xBB, 0xCC]).with_time_id(0x0102);
        let bytes = raw(&msg);
        assert_eq!(&bytes[..7], &[20, 0x01, 0x02, 0x02, 0xC8, 0x00, 0x03]);
        assert_eq!(&bytes[7..10], &[0xAA, 0xBB, 0xCC]);
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn firmware_ack_has_implicit_code_byte() {
        let ack = Message::new(MessageType::FirmwareAck, 0, vec![16]);
        let bytes = raw(&ack);
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[5], 16);
        assert_eq!(decode_raw(&bytes).unwrap(), ack);
    }

    #[test]
    fn wire_frame_has_single_trailing_delimiter() {
        let msg = Message::write(0, vec![0, 0, 0, 0]);
        let wire = encode_to_bytes(&msg).unwrap();
        assert_eq!(wire.last(), Some(&DELIMITER));
        assert_eq!(wire.iter().filter(|&&b| b == 0).count(), 1);
        assert_eq!(decode_frame(&wire).unwrap(), msg);
    }

    #[test]
    fn max_payload_fits_encoded_bound() {
        let msg = Message::command(204, vec![0xFF; MAX_PAYLOAD]);
        let wire = encode_to_bytes(&msg).unwrap();
        assert!(wire.len() <= MAX_ENCODED_FRAME);
        assert_eq!(MAX_ENCODED_FRAME, 139);
    }

    #[test]
    fn payload_shape_enforced_on_encode() {
        let mut buf = BytesMut::new();
        let bad_read = Message::new(MessageType::Read, 1, vec![1]);
        assert!(matches!(
            encode_frame(&bad_read, &mut buf),
            Err(FrameError::PayloadShape { .. })
        ));

        let bad_ack = Message::new(MessageType::FirmwareAck, 0, vec![0, 0]);
        assert!(matches!(
            encode_frame(&bad_ack, &mut buf),
            Err(FrameError::PayloadShape { .. })
        ));

        let too_big = Message::write(1, vec![1; MAX_PAYLOAD + 1]);
        assert!(matches!(
            encode_frame(&too_big, &mut buf),
            Err(FrameError::PayloadTooLarge { size: 129, max: 128 })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn short_record_is_length_error() {
        let err = decode_raw(&[10, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, FrameError::Length { len: 4, expected: 7 }));
    }

    #[test]
    fn checksum_mismatch_detected() {
        let mut bytes = raw(&Message::read(510));
        bytes[4] ^= 0x01;
        assert!(matches!(
            decode_raw(&bytes).unwrap_err(),
            FrameError::Checksum { .. }
        ));
    }

    #[test]
    fn unknown_type_after_valid_checksum() {
        let mut body = vec![99u8, 0, 0, 0, 1];
        let crc = crc16(&body);
        body.extend_from_slice(&crc.to_be_bytes());
        assert!(matches!(
            decode_raw(&body).unwrap_err(),
            FrameError::UnknownType(99)
        ));
    }

    #[test]
    fn length_field_must_match_record() {
        let mut body = vec![12u8, 0, 0, 0x01, 0xFE, 0x00, 0x04, 0x42, 0x00];
        let crc = crc16(&body);
        body.extend_from_slice(&crc.to_be_bytes());
        assert!(matches!(
            decode_raw(&body).unwrap_err(),
            FrameError::Length { .. }
        ));
    }

    #[test]
    fn read_with_trailing_bytes_rejected() {
        let mut body = vec![10u8, 0, 0, 0, 1, 0xAB];
        let crc = crc16(&body);
        body.extend_from_slice(&crc.to_be_bytes());
        assert!(matches!(
            decode_raw(&body).unwrap_err(),
            FrameError::Length { len: 8, expected: 7 }
        ));
    }

    #[test]
    fn oversized_stuffed_record_rejected() {
        let stuffed = vec![0x01u8; MAX_RAW_FRAME + 10];
        assert!(matches!(
            decode_frame(&stuffed).unwrap_err(),
            FrameError::Framing(CobsError::Overflow { .. })
        ));
    }

    #[test]
    fn read_ack_float_decodes() {
        let reply = Message::new(MessageType::ReadAck, 510, vec![0x42, 0x00, 0x00, 0x00]);
        let wire = encode_to_bytes(&reply).unwrap();
        let decoded = decode_frame(&wire).unwrap();
        assert_eq!(decoded.kind, MessageType::ReadAck);
        assert_eq!(decoded.identifier, 510);
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded.as_f32(), Some(32.0));
    }
}
