//! CRC-16/CCITT.
//!
//! Polynomial x^16 + x^12 + x^5 + 1 (0x1021), MSB first, no reflection, no
//! final xor.  The image builder and the device validator must produce the
//! same value for the same bytes, so both go through this module.

use crc::{Crc, Digest, CRC_16_XMODEM};

/// Start value used for image checksums.
pub const CRC_START_VALUE: u16 = 0;

static CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC over the first `length` bytes of `buffer`, seeded with `start`.
/// `length` is clamped to the buffer.
pub fn crc16(buffer: &[u8], start: u16, length: usize) -> u16 {
    let length = length.min(buffer.len());
    let mut digest = CCITT.digest_with_initial(start);
    digest.update(&buffer[..length]);
    digest.finalize()
}

/// Incremental form of [`crc16`], for data that is read in pieces.
pub struct Crc16 {
    digest: Digest<'static, u16>,
}

impl Crc16 {
    pub fn new(start: u16) -> Crc16 {
        Crc16 {
            digest: CCITT.digest_with_initial(start),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }

    pub fn finalize(self) -> u16 {
        self.digest.finalize()
    }
}
