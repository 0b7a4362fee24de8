//! Firmware images and FPGA bitstreams.

use bytes::Bytes;
use crc::{Crc, CRC_32_ISO_HDLC};
use mculink_frame::MAX_PAYLOAD;

use crate::error::ImageError;

const IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Whether an image blob starts with a version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionPrefix {
    /// The whole blob is program data.
    #[default]
    None,
    /// The blob starts with a NUL-terminated UTF-8 version string, followed
    /// by program data.
    NulTerminated,
}

/// An immutable firmware image, read page by page.
///
/// The program data length is always an exact multiple of the page size.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Bytes,
    version: Option<String>,
    page_size: usize,
}

impl FirmwareImage {
    /// Validate `blob` and split off its version prefix.
    pub fn parse(
        blob: impl Into<Bytes>,
        page_size: usize,
        prefix: VersionPrefix,
    ) -> Result<Self, ImageError> {
        if page_size == 0 || page_size > MAX_PAYLOAD {
            return Err(ImageError::PageSize {
                size: page_size,
                expected: MAX_PAYLOAD,
            });
        }

        let mut data = blob.into();
        let version = match prefix {
            VersionPrefix::None => None,
            VersionPrefix::NulTerminated => {
                let end = data
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(ImageError::UnterminatedVersion)?;
                let version = std::str::from_utf8(&data[..end])
                    .map_err(|_| ImageError::InvalidVersion)?
                    .to_owned();
                data = data.slice(end + 1..);
                Some(version)
            }
        };

        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        if data.len() % page_size != 0 {
            return Err(ImageError::Misaligned {
                len: data.len(),
                page_size,
            });
        }

        Ok(Self {
            data,
            version,
            page_size,
        })
    }

    /// Version string carried by the image, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Program data, without the version prefix.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.data.len() / self.page_size
    }

    /// Pages in increasing address order.
    pub fn pages(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.data.chunks_exact(self.page_size)
    }

    /// CRC-32 (ISO-HDLC) of the program data.
    pub fn crc32(&self) -> u32 {
        IMAGE_CRC.checksum(&self.data)
    }
}

/// An FPGA configuration bitstream, streamed in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct Bitstream {
    data: Bytes,
}

impl Bitstream {
    pub fn new(blob: impl Into<Bytes>) -> Result<Self, ImageError> {
        let data = blob.into();
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Chunks of at most `size` bytes; only the last may be shorter.
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = &[u8]> + '_ {
        self.data.chunks(size)
    }

    pub fn chunk_count(&self, size: usize) -> usize {
        self.data.len().div_ceil(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_image() {
        let image = FirmwareImage::parse(vec![0xAB; 128], 64, VersionPrefix::None).unwrap();
        assert_eq!(image.page_count(), 2);
        assert_eq!(image.version(), None);
        assert!(image.pages().all(|p| p.len() == 64));
    }

    #[test]
    fn version_prefix_is_split_off() {
        let mut blob = b"2.4.1\0".to_vec();
        blob.extend_from_slice(&[1u8; 64]);

        let image = FirmwareImage::parse(blob, 64, VersionPrefix::NulTerminated).unwrap();
        assert_eq!(image.version(), Some("2.4.1"));
        assert_eq!(image.len(), 64);
        assert_eq!(image.data()[0], 1);
    }

    #[test]
    fn misaligned_image_rejected() {
        let err = FirmwareImage::parse(vec![0u8; 100], 64, VersionPrefix::None).unwrap_err();
        assert_eq!(
            err,
            ImageError::Misaligned {
                len: 100,
                page_size: 64
            }
        );
    }

    #[test]
    fn unterminated_version_rejected() {
        let err =
            FirmwareImage::parse(b"1.0".to_vec(), 64, VersionPrefix::NulTerminated).unwrap_err();
        assert_eq!(err, ImageError::UnterminatedVersion);
    }

    #[test]
    fn empty_and_oversized_pages_rejected() {
        assert_eq!(
            FirmwareImage::parse(Vec::<u8>::new(), 64, VersionPrefix::None).unwrap_err(),
            ImageError::Empty
        );
        assert!(matches!(
            FirmwareImage::parse(vec![0u8; 512], 512, VersionPrefix::None),
            Err(ImageError::PageSize { size: 512, .. })
        ));
    }

    #[test]
    fn image_crc_is_iso_hdlc() {
        let image = FirmwareImage::parse(b"123456789".to_vec(), 9, VersionPrefix::None).unwrap();
        assert_eq!(image.crc32(), 0xCBF4_3926);
    }

    #[test]
    fn bitstream_chunks() {
        let bits = Bitstream::new(vec![7u8; 250]).unwrap();
        let sizes: Vec<usize> = bits.chunks(111).map(<[u8]>::len).collect();
        assert_eq!(sizes, vec![111, 111, 28]);
        assert_eq!(bits.chunk_count(111), 3);
        assert!(Bitstream::new(Vec::<u8>::new()).is_err());
    }
}
