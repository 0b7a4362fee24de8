//! Consistent Overhead Byte Stuffing.
//!
//! The stuffed form is a sequence of blocks. Each block starts with a code
//! byte `n` (1..=255) followed by `n - 1` non-zero data bytes. A block with
//! code below 0xFF implies a zero byte after it, except for the last block.

use bytes::{BufMut, BytesMut};

/// Longest run of non-zero bytes a single block can carry.
pub const MAX_RUN: usize = 254;

/// Errors from unstuffing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CobsError {
    /// A zero byte appeared inside the stuffed record.
    #[error("zero byte inside stuffed data at offset {offset}")]
    ZeroByte { offset: usize },

    /// A code byte points past the end of the record.
    #[error("block at offset {offset} runs past end of record")]
    Truncated { offset: usize },

    /// The decoded record does not fit the destination buffer.
    #[error("decoded record exceeds {capacity} bytes")]
    Overflow { capacity: usize },
}

/// Upper bound on the stuffed size of `len` raw bytes (without delimiter).
pub const fn max_stuffed_len(len: usize) -> usize {
    len + len / MAX_RUN + 1
}

/// Stuff `src` and append the result to `dst`. No delimiter is written.
pub fn stuff(src: &[u8], dst: &mut BytesMut) {
    dst.reserve(max_stuffed_len(src.len()));

    let mut code_at = dst.len();
    dst.put_u8(0);
    let mut code: u8 = 1;

    for &byte in src {
        if byte == 0 {
            dst[code_at] = code;
            code_at = dst.len();
            dst.put_u8(0);
            code = 1;
            continue;
        }

        dst.put_u8(byte);
        code += 1;
        if code == 0xFF {
            dst[code_at] = code;
            code_at = dst.len();
            dst.put_u8(0);
            code = 1;
        }
    }

    dst[code_at] = code;
}

/// Unstuff `src` into `dst`, returning the number of bytes written.
///
/// `src` must not include the trailing delimiter. Nothing is written past
/// the end of `dst`; a record that would overflow it is rejected.
pub fn unstuff(src: &[u8], dst: &mut [u8]) -> Result<usize, CobsError> {
    let capacity = dst.len();
    let mut read = 0usize;
    let mut written = 0usize;

    while read < src.len() {
        let code = src[read];
        if code == 0 {
            return Err(CobsError::ZeroByte { offset: read });
        }

        let block_start = read;
        read += 1;
        let run = usize::from(code) - 1;
        let end = read + run;
        if end > src.len() {
            return Err(CobsError::Truncated {
                offset: block_start,
            });
        }

        let data = &src[read..end];
        if let Some(offset) = data.iter().position(|&b| b == 0) {
            return Err(CobsError::ZeroByte {
                offset: read + offset,
            });
        }

        let out = dst
            .get_mut(written..written + run)
            .ok_or(CobsError::Overflow { capacity })?;
        out.copy_from_slice(data);
        written += run;
        read = end;

        if code != 0xFF && read < src.len() {
            let slot = dst
                .get_mut(written)
                .ok_or(CobsError::Overflow { capacity })?;
            *slot = 0;
            written += 1;
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stuffed(src: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        stuff(src, &mut buf);
        buf.to_vec()
    }

    fn unstuffed(src: &[u8]) -> Result<Vec<u8>, CobsError> {
        let mut out = vec![0u8; src.len()];
        let n = unstuff(src, &mut out)?;
        out.truncate(n);
        Ok(out)
    }

    #[test]
    fn known_vectors() {
        assert_eq!(stuffed(&[]), vec![0x01]);
        assert_eq!(stuffed(&[0x00]), vec![0x01, 0x01]);
        assert_eq!(stuffed(&[0x00, 0x00]), vec![0x01, 0x01, 0x01]);
        assert_eq!(stuffed(&[0x11, 0x22, 0x00, 0x33]), vec![0x03, 0x11, 0x22, 0x02, 0x33]);
        assert_eq!(stuffed(&[0x11, 0x00, 0x00, 0x00]), vec![0x02, 0x11, 0x01, 0x01, 0x01]);
    }

    #[test]
    fn long_run_splits_at_254() {
        let src: Vec<u8> = (1..=254u32).map(|b| b as u8).collect();
        let out = stuffed(&src);
        assert_eq!(out[0], 0xFF);
        assert_eq!(&out[1..255], src.as_slice());
        assert_eq!(out[255], 0x01);
        assert_eq!(unstuffed(&out).unwrap(), src);
    }

    #[test]
    fn stuffed_output_has_no_zero() {
        let src = [0u8, 1, 0, 2, 3, 0, 0, 4];
        assert!(!stuffed(&src).contains(&0));
    }

    #[test]
    fn embedded_zero_rejected() {
        let err = unstuffed(&[0x03, 0x11, 0x00]).unwrap_err();
        assert_eq!(err, CobsError::ZeroByte { offset: 2 });
    }

    #[test]
    fn truncated_block_rejected() {
        let err = unstuffed(&[0x05, 0x11, 0x22]).unwrap_err();
        assert_eq!(err, CobsError::Truncated { offset: 0 });
    }

    #[test]
    fn small_destination_rejected_without_overrun() {
        let src = stuffed(&[1, 2, 3, 4, 5, 6]);
        let mut dst = [0u8; 4];
        let err = unstuff(&src, &mut dst).unwrap_err();
        assert_eq!(err, CobsError::Overflow { capacity: 4 });
    }

    #[test]
    fn restored_zero_past_destination_rejected() {
        let src = stuffed(&[1, 2, 0, 3]);
        let mut dst = [0u8; 2];
        let err = unstuff(&src, &mut dst).unwrap_err();
        assert_eq!(err, CobsError::Overflow { capacity: 2 });
        assert_eq!(dst, [1, 2]);
    }

    #[test]
    fn empty_record_decodes_to_nothing() {
        assert!(unstuffed(&[]).unwrap().is_empty());
    }
}
