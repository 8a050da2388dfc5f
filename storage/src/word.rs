//! Word models.
//!
//! Most parts address flash by the byte.  Some DSPs address memory in 16-bit
//! words, so one address holds two bytes and every size in the image header,
//! the domain table and the sector map counts words.  The word model is the
//! one place that conversion lives.

/// How many bytes sit behind one flash address.
pub trait WordModel {
    /// Bytes per address unit.
    const UNIT: usize;

    /// Byte length of `units` address units.
    fn bytes(units: u32) -> Option<usize> {
        (units as usize).checked_mul(Self::UNIT)
    }

    /// Address units covered by `bytes`.  `None` if `bytes` is not a whole
    /// number of units or does not fit an address.
    fn units(bytes: usize) -> Option<u32> {
        if bytes % Self::UNIT != 0 {
            return None;
        }
        u32::try_from(bytes / Self::UNIT).ok()
    }
}

/// One byte per address.
#[derive(Debug, Default, Copy, Clone)]
pub struct ByteAddressed;

impl WordModel for ByteAddressed {
    const UNIT: usize = 1;
}

/// One little-endian 16-bit word per address.  The low byte of each word
/// comes first in the byte stream.
#[derive(Debug, Default, Copy, Clone)]
pub struct WordAddressed;

impl WordModel for WordAddressed {
    const UNIT: usize = 2;
}
