//! Firmware image builder.
//!
//! An image is the header ("config block") followed by the application
//! binary, laid out exactly as the bootloader expects to find it at the base
//! of a domain.  The whole image is built in memory; nothing is written until
//! it is complete.

use asraw::{AsMutRaw, AsRaw};
use boot::crc::{crc16, CRC_START_VALUE};
use boot::{ImageHeader, HEADER_IDENTITY_SIZE, HEADER_MIN_SIZE};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use thiserror::Error;

/// Header size used when none is given, in address units.
pub const DEFAULT_HEADER_SIZE: u32 = 0x100;

/// Value of unused header bytes.
pub const FILL: u8 = 0xff;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("input is empty")]
    Empty,
    #[error("header of {size} bytes is too small, need at least {needed}")]
    HeaderTooSmall { size: usize, needed: usize },
    #[error("input files differ in size: {lsb} bytes LSB, {msb} bytes MSB")]
    SizeMismatch { lsb: usize, msb: usize },
    #[error("word mode needs an even number of bytes, got {0}")]
    OddLength(usize),
    #[error("{what} of {value} does not fit in 32 bits")]
    Overflow { what: &'static str, value: u64 },
}

/// Identity block of the header.  When any field is given, all four are
/// written, and the missing ones read as erased flash.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Identity {
    pub vendor_id: Option<u32>,
    pub product_code: Option<u32>,
    pub revision: Option<u32>,
    pub build_version: Option<u32>,
}

impl Identity {
    pub fn is_empty(&self) -> bool {
        self.vendor_id.is_none()
            && self.product_code.is_none()
            && self.revision.is_none()
            && self.build_version.is_none()
    }
}

/// A finished image.
#[derive(Debug, Clone)]
pub struct Image {
    /// The bytes to write out.
    pub data: Vec<u8>,
    pub header: ImageHeader,
    /// Header size in bytes.
    pub header_bytes: usize,
    /// Payload size in bytes.  The payload is only part of `data` if the
    /// image is not header-only.
    pub payload_bytes: usize,
}

impl Image {
    pub fn payload(&self) -> &[u8] {
        &self.data[self.header_bytes.min(self.data.len())..]
    }
}

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    /// In address units: bytes, or 16-bit words in word mode.
    header_size: u32,
    words: bool,
    random_fill: bool,
    seed: Option<u64>,
    header_only: bool,
    identity: Identity,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        ImageBuilder::new(DEFAULT_HEADER_SIZE)
    }
}

impl ImageBuilder {
    pub fn new(header_size: u32) -> ImageBuilder {
        ImageBuilder {
            header_size,
            words: false,
            random_fill: false,
            seed: None,
            header_only: false,
            identity: Identity::default(),
        }
    }

    pub fn header_size(&mut self, header_size: u32) -> &mut Self {
        self.header_size = header_size;
        self
    }

    /// Sizes count 16-bit words instead of bytes.
    pub fn words(&mut self, words: bool) -> &mut Self {
        self.words = words;
        self
    }

    /// Fill unused header bytes with random data instead of 0xff.
    pub fn random_fill(&mut self, random_fill: bool) -> &mut Self {
        self.random_fill = random_fill;
        self
    }

    /// Seed for the random fill, to make it reproducible.
    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = Some(seed);
        self
    }

    /// Only output the header.
    pub fn header_only(&mut self, header_only: bool) -> &mut Self {
        self.header_only = header_only;
        self
    }

    pub fn identity(&mut self, identity: Identity) -> &mut Self {
        self.identity = identity;
        self
    }

    fn unit(&self) -> usize {
        if self.words {
            2
        } else {
            1
        }
    }

    /// Header size in bytes, checked against what it has to hold.
    fn header_bytes(&self) -> Result<usize, BuildError> {
        let size = (self.header_size as usize)
            .checked_mul(self.unit())
            .ok_or(BuildError::Overflow {
                what: "header size",
                value: self.header_size as u64,
            })?;
        let needed = if self.identity.is_empty() {
            HEADER_MIN_SIZE
        } else {
            HEADER_IDENTITY_SIZE
        };
        if size < needed {
            return Err(BuildError::HeaderTooSmall { size, needed });
        }
        Ok(size)
    }

    /// Build an image around `payload`.  In word mode, the payload is the
    /// already interleaved byte stream.
    pub fn build(&self, payload: &[u8]) -> Result<Image, BuildError> {
        if payload.is_empty() {
            return Err(BuildError::Empty);
        }
        if self.words && payload.len() % 2 != 0 {
            return Err(BuildError::OddLength(payload.len()));
        }
        let header_bytes = self.header_bytes()?;
        let units = payload.len() / self.unit();
        let application_size = u32::try_from(units).map_err(|_| BuildError::Overflow {
            what: "application size",
            value: units as u64,
        })?;

        let mut raw = vec![FILL; header_bytes];
        if self.random_fill {
            let mut rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            rng.fill_bytes(&mut raw);
        }

        // Start from whatever the fill put there, and set the fields that
        // carry a value.
        let mut header = ImageHeader::blank();
        header.copy_from_raw(&raw);
        header.application_size = application_size;
        header.crc = crc16(payload, CRC_START_VALUE, payload.len());
        if !self.identity.is_empty() {
            header.vendor_id = self.identity.vendor_id.unwrap_or(u32::MAX);
            header.product_code = self.identity.product_code.unwrap_or(u32::MAX);
            header.revision = self.identity.revision.unwrap_or(u32::MAX);
            header.build_version = self.identity.build_version.unwrap_or(u32::MAX);
        }
        let fields = header.raw_prefix(header_bytes);
        raw[..fields.len()].copy_from_slice(fields);

        log::debug!(
            "header {} bytes, application 0x{:x} units, crc 0x{:04x}",
            header_bytes,
            header.application_size,
            header.crc
        );

        let mut data = raw;
        if !self.header_only {
            data.extend_from_slice(payload);
        }
        Ok(Image {
            data,
            header,
            header_bytes,
            payload_bytes: payload.len(),
        })
    }

    /// Build a word mode image from separate low and high byte streams.
    pub fn build_split(&self, lsb: &[u8], msb: &[u8]) -> Result<Image, BuildError> {
        let payload = interleave(lsb, msb)?;
        let mut builder = self.clone();
        builder.words(true);
        builder.build(&payload)
    }
}

/// Merge a low byte stream and a high byte stream into little-endian 16-bit
/// words.
pub fn interleave(lsb: &[u8], msb: &[u8]) -> Result<Vec<u8>, BuildError> {
    if lsb.len() != msb.len() {
        return Err(BuildError::SizeMismatch {
            lsb: lsb.len(),
            msb: msb.len(),
        });
    }
    if lsb.is_empty() {
        return Err(BuildError::Empty);
    }
    Ok(lsb
        .iter()
        .zip(msb)
        .flat_map(|(&lo, &hi)| [lo, hi])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn basic_layout() {
        let payload: Vec<u8> = (0..100u8).collect();
        let image = ImageBuilder::new(16).build(&payload).unwrap();
        assert_eq!(image.data.len(), 116);
        assert_eq!(&image.data[0..4], &100u32.to_ne_bytes());
        let crc = crc16(&payload, 0, payload.len());
        assert_eq!(&image.data[4..6], &crc.to_ne_bytes());
        assert_eq!(&image.data[6..16], &[FILL; 10]);
        assert_eq!(image.payload(), &payload[..]);
    }

    #[test]
    fn identity_fields() {
        let identity = Identity {
            vendor_id: Some(0x0000_0319),
            product_code: Some(0x1234),
            ..Identity::default()
        };
        let image = ImageBuilder::new(32)
            .identity(identity)
            .build(&[1, 2, 3])
            .unwrap();
        assert_eq!(&image.data[8..12], &0x319u32.to_ne_bytes());
        assert_eq!(&image.data[12..16], &0x1234u32.to_ne_bytes());
        assert_eq!(&image.data[16..24], &[0xff; 8]);
        assert_eq!(&image.data[24..32], &[FILL; 8]);
        assert_eq!(image.header.revision, u32::MAX);
    }

    #[test_case(4, false, 8 ; "bytes without identity")]
    #[test_case(16, true, 24 ; "bytes with identity")]
    #[test_case(11, true, 24 ; "words with identity")]
    fn header_too_small(header_size: u32, identity: bool, needed: usize) {
        let mut builder = ImageBuilder::new(header_size);
        if identity {
            builder.identity(Identity {
                revision: Some(1),
                ..Identity::default()
            });
        }
        if header_size == 11 {
            builder.words(true);
        }
        match builder.build(&[0, 0]) {
            Err(BuildError::HeaderTooSmall { needed: n, .. }) => assert_eq!(n, needed),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn word_mode() {
        let lsb = [0x11, 0x22, 0x33];
        let msb = [0xaa, 0xbb, 0xcc];
        let image = ImageBuilder::new(8).build_split(&lsb, &msb).unwrap();
        // Eight words of header.
        assert_eq!(image.header_bytes, 16);
        assert_eq!(image.header.application_size, 3);
        assert_eq!(image.payload(), &[0x11, 0xaa, 0x22, 0xbb, 0x33, 0xcc]);
        assert_eq!(image.header.crc, crc16(image.payload(), 0, 6));

        assert!(matches!(
            interleave(&lsb, &msb[..2]),
            Err(BuildError::SizeMismatch { lsb: 3, msb: 2 })
        ));
        assert!(matches!(
            ImageBuilder::new(8).words(true).build(&[1, 2, 3]),
            Err(BuildError::OddLength(3))
        ));
    }

    #[test]
    fn random_fill_keeps_fields() {
        let payload = [7u8; 40];
        let a = ImageBuilder::new(64)
            .random_fill(true)
            .seed(3)
            .build(&payload)
            .unwrap();
        let b = ImageBuilder::new(64)
            .random_fill(true)
            .seed(3)
            .build(&payload)
            .unwrap();
        assert_eq!(a.data, b.data);
        assert_eq!(&a.data[0..4], &40u32.to_ne_bytes());
        assert_eq!(a.header.crc, crc16(&payload, 0, 40));
        assert!(a.data[8..64].iter().any(|&b| b != FILL));
    }

    #[test]
    fn header_only_and_empty() {
        let image = ImageBuilder::new(16)
            .header_only(true)
            .build(&[5; 20])
            .unwrap();
        assert_eq!(image.data.len(), 16);
        assert_eq!(image.header.application_size, 20);
        assert!(image.payload().is_empty());
        assert!(matches!(
            ImageBuilder::default().build(&[]),
            Err(BuildError::Empty)
        ));
    }
}
