//! Storage types.
//!
//! The low-level flash layer.  A device exposes its flash through
//! [`FlashDriver`]: synchronous erase-one-sector and program-one-unit
//! primitives, addressed through a static [`SectorMap`].  This is the only
//! layer that knows about the flash controller; everything above it works in
//! terms of addresses, sectors and program units.
//!
//! Addresses are in the target's address units, which are not necessarily
//! bytes.  The [`WordModel`] of the driver says how many bytes live behind one
//! address.  Data passed in and out is always bytes.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

use core::fmt;

mod sector;
mod word;

#[cfg(feature = "embedded-storage")]
pub mod nor;

pub use sector::{FlashSector, SectorMap};
pub use word::{ByteAddressed, WordAddressed, WordModel};

/// A flash address, in address units of the target.
pub type FlashAddr = u32;

/// The value every byte of a freshly erased sector reads back as.
pub const ERASED: u8 = 0xff;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    NotAligned,
    OutOfBounds,
    NotWritten,
    NotErased,
    /// The address is not covered by any sector of the map.
    NoSector,
    /// The controller reported a failure, with its status code.
    Hardware(u16),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotAligned => write!(f, "access is not aligned"),
            Error::OutOfBounds => write!(f, "access is out of bounds"),
            Error::NotWritten => write!(f, "flash has not been written"),
            Error::NotErased => write!(f, "flash is not erased"),
            Error::NoSector => write!(f, "address is not in any sector"),
            Error::Hardware(code) => write!(f, "flash controller failure 0x{:x}", code),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// Read only interface into flash.
pub trait ReadFlash {
    /// How the target maps addresses onto bytes.
    type Word: WordModel;

    /// Read `bytes.len()` bytes, starting at `address`.  The length must be a
    /// whole number of address units.
    fn read(&mut self, address: FlashAddr, bytes: &mut [u8]) -> Result<()>;
}

/// Flash that can be erased and programmed.
///
/// Both primitives are synchronous: the call returns only once the controller
/// has finished, and the caller is stalled for the duration.  Waiting on the
/// controller's ready flag happens inside the driver and nowhere else.
pub trait FlashDriver: ReadFlash {
    /// Number of bytes committed by a single `program` call.
    fn program_size(&self) -> usize;

    /// The erase layout of the device.
    fn sectors(&self) -> SectorMap<'_>;

    /// Erase the sector that starts at `address`.
    fn erase_sector(&mut self, address: FlashAddr) -> Result<()>;

    /// Program exactly `program_size()` bytes at `address`.
    fn program(&mut self, address: FlashAddr, bytes: &[u8]) -> Result<()>;

    /// Does every byte of the sector containing `address` read as erased?
    fn sector_is_erased(&mut self, address: FlashAddr) -> Result<bool> {
        let sector = self.sectors().sector_for(address).ok_or(Error::NoSector)?;
        let unit = <Self::Word as WordModel>::UNIT;
        let total = <Self::Word as WordModel>::bytes(sector.size).ok_or(Error::OutOfBounds)?;

        let mut buffer = [0u8; 64];
        let mut pos = 0;
        while pos < total {
            let todo = (total - pos).min(buffer.len());
            let buf = &mut buffer[..todo];
            let address = sector.base + (pos / unit) as FlashAddr;
            self.read(address, buf)?;
            if buf.iter().any(|&b| b != ERASED) {
                return Ok(false);
            }
            pos += todo;
        }
        Ok(true)
    }
}

/// Validate a read of `length` bytes at `address` against a sector map.
pub fn check_read<W: WordModel>(map: &SectorMap<'_>, address: FlashAddr, length: usize) -> Result<()> {
    if length % W::UNIT != 0 {
        return Err(Error::NotAligned);
    }
    let units = W::units(length).ok_or(Error::OutOfBounds)?;
    if map.contains_range(address, units) {
        Ok(())
    } else {
        Err(Error::OutOfBounds)
    }
}

/// Validate a sector erase.  The address must be the base of a sector.
pub fn check_erase<T: FlashDriver>(flash: &T, address: FlashAddr) -> Result<FlashSector> {
    let sector = flash.sectors().sector_for(address).ok_or(Error::NoSector)?;
    if sector.base != address {
        return Err(Error::NotAligned);
    }
    Ok(sector)
}

/// Validate a program operation.  The data must be one program unit, placed
/// on a program unit boundary within its sector.
pub fn check_program<T: FlashDriver>(flash: &T, address: FlashAddr, length: usize) -> Result<()> {
    let size = flash.program_size();
    if length != size {
        return Err(Error::NotAligned);
    }
    let sector = flash.sectors().sector_for(address).ok_or(Error::NoSector)?;
    let offset = <T::Word as WordModel>::bytes(address - sector.base).ok_or(Error::OutOfBounds)?;
    if offset % size != 0 {
        return Err(Error::NotAligned);
    }
    let units = <T::Word as WordModel>::units(length).ok_or(Error::NotAligned)?;
    if !flash.sectors().contains_range(address, units) {
        return Err(Error::OutOfBounds);
    }
    Ok(())
}
