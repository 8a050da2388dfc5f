//! Bridge from embedded-storage.
//!
//! HAL crates expose their flash banks through
//! `embedded_storage::nor_flash::NorFlash`, which knows a single erase size
//! and works in byte offsets.  [`NorDriver`] adds the sector map and the
//! address translation so such a bank can back a programming session.

use core::marker::PhantomData;

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::{
    check_erase, check_program, Error, FlashAddr, FlashDriver, ReadFlash, Result, SectorMap,
    FlashSector, WordModel,
};

fn map_error<E: NorFlashError>(e: E) -> Error {
    match e.kind() {
        NorFlashErrorKind::NotAligned => Error::NotAligned,
        NorFlashErrorKind::OutOfBounds => Error::OutOfBounds,
        _ => Error::Hardware(0),
    }
}

/// A `NorFlash` bank whose offset 0 sits at address `base`.
pub struct NorDriver<'s, F, W> {
    flash: F,
    base: FlashAddr,
    sectors: &'s [FlashSector],
    program_size: usize,
    _word: PhantomData<W>,
}

impl<'s, F: NorFlash, W: WordModel> NorDriver<'s, F, W> {
    /// `program_size` must be a multiple of the bank's `WRITE_SIZE`.
    pub fn new(
        flash: F,
        base: FlashAddr,
        sectors: &'s [FlashSector],
        program_size: usize,
    ) -> Result<Self> {
        if program_size == 0 || program_size % F::WRITE_SIZE != 0 {
            return Err(Error::NotAligned);
        }
        SectorMap::new(sectors).validate()?;
        Ok(NorDriver {
            flash,
            base,
            sectors,
            program_size,
            _word: PhantomData,
        })
    }

    pub fn release(self) -> F {
        self.flash
    }

    fn offset(&self, address: FlashAddr) -> Result<u32> {
        let units = address.checked_sub(self.base).ok_or(Error::OutOfBounds)?;
        let bytes = W::bytes(units).ok_or(Error::OutOfBounds)?;
        u32::try_from(bytes).map_err(|_| Error::OutOfBounds)
    }
}

impl<'s, F: NorFlash, W: WordModel> ReadFlash for NorDriver<'s, F, W> {
    type Word = W;

    fn read(&mut self, address: FlashAddr, bytes: &mut [u8]) -> Result<()> {
        crate::check_read::<W>(&self.sectors(), address, bytes.len())?;
        let offset = self.offset(address)?;
        self.flash.read(offset, bytes).map_err(map_error)
    }
}

impl<'s, F: NorFlash, W: WordModel> FlashDriver for NorDriver<'s, F, W> {
    fn program_size(&self) -> usize {
        self.program_size
    }

    fn sectors(&self) -> SectorMap<'_> {
        SectorMap::new(self.sectors)
    }

    fn erase_sector(&mut self, address: FlashAddr) -> Result<()> {
        let sector = check_erase(self, address)?;
        let from = self.offset(sector.base)?;
        let len = W::bytes(sector.size)
            .and_then(|b| u32::try_from(b).ok())
            .ok_or(Error::OutOfBounds)?;
        let to = from.checked_add(len).ok_or(Error::OutOfBounds)?;
        log::debug!("nor erase 0x{:x}..0x{:x}", from, to);
        self.flash.erase(from, to).map_err(map_error)
    }

    fn program(&mut self, address: FlashAddr, bytes: &[u8]) -> Result<()> {
        check_program(self, address, bytes.len())?;
        let offset = self.offset(address)?;
        self.flash.write(offset, bytes).map_err(map_error)
    }
}

#[cfg(test)]
mod tests {
    use embedded_storage::nor_flash::{ErrorType, ReadNorFlash};

    use super::*;
    use crate::{ByteAddressed, WordAddressed};

    /// A RAM backed bank with 4K erase blocks.
    struct RamBank {
        data: std::vec::Vec<u8>,
    }

    impl RamBank {
        fn new(size: usize) -> RamBank {
            RamBank {
                data: std::vec![0xff; size],
            }
        }

        fn range(
            &self,
            offset: u32,
            len: usize,
        ) -> core::result::Result<core::ops::Range<usize>, NorFlashErrorKind> {
            let start = offset as usize;
            if start + len > self.data.len() {
                return Err(NorFlashErrorKind::OutOfBounds);
            }
            Ok(start..start + len)
        }
    }

    impl ErrorType for RamBank {
        type Error = NorFlashErrorKind;
    }

    impl ReadNorFlash for RamBank {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> core::result::Result<(), Self::Error> {
            let range = self.range(offset, bytes.len())?;
            bytes.copy_from_slice(&self.data[range]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.data.len()
        }
    }

    impl NorFlash for RamBank {
        const WRITE_SIZE: usize = 4;
        const ERASE_SIZE: usize = 0x1000;

        fn erase(&mut self, from: u32, to: u32) -> core::result::Result<(), Self::Error> {
            if from as usize % Self::ERASE_SIZE != 0 || to as usize % Self::ERASE_SIZE != 0 {
                return Err(NorFlashErrorKind::NotAligned);
            }
            let range = self.range(from, (to - from) as usize)?;
            self.data[range].fill(0xff);
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> core::result::Result<(), Self::Error> {
            let range = self.range(offset, bytes.len())?;
            for (dst, src) in self.data[range].iter_mut().zip(bytes) {
                *dst &= *src;
            }
            Ok(())
        }
    }

    static BYTE_SECTORS: [FlashSector; 2] = [
        FlashSector::new(0x1000_0000, 0x1000),
        FlashSector::new(0x1000_1000, 0x1000),
    ];

    // The same bank seen as 16-bit words.
    static WORD_SECTORS: [FlashSector; 2] = [
        FlashSector::new(0x8000, 0x800),
        FlashSector::new(0x8800, 0x800),
    ];

    #[test]
    fn byte_bank() {
        let mut nor: NorDriver<'_, _, ByteAddressed> =
            NorDriver::new(RamBank::new(0x2000), 0x1000_0000, &BYTE_SECTORS, 8).unwrap();
        assert!(nor.sector_is_erased(0x1000_1000).unwrap());

        nor.program(0x1000_1008, &[0x12; 8]).unwrap();
        assert!(!nor.sector_is_erased(0x1000_1000).unwrap());
        let mut buf = [0u8; 4];
        nor.read(0x1000_1006, &mut buf).unwrap();
        assert_eq!(buf, [0xff, 0xff, 0x12, 0x12]);

        nor.erase_sector(0x1000_1000).unwrap();
        assert!(nor.sector_is_erased(0x1000_1000).unwrap());
        assert_eq!(nor.erase_sector(0x1000_1004), Err(Error::NotAligned));
        assert_eq!(nor.read(0x0fff_ffff, &mut buf), Err(Error::OutOfBounds));

        let bank = nor.release();
        assert_eq!(bank.data[0x1008], 0xff);
    }

    #[test]
    fn word_bank() {
        let mut nor: NorDriver<'_, _, WordAddressed> =
            NorDriver::new(RamBank::new(0x2000), 0x8000, &WORD_SECTORS, 8).unwrap();

        // Word 0x8804 is byte offset 0x1008 in the bank.
        nor.program(0x8804, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let bank = nor.release();
        assert_eq!(&bank.data[0x1008..0x1010], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn program_size_matches_bank() {
        assert!(matches!(
            NorDriver::<'_, _, ByteAddressed>::new(RamBank::new(0x2000), 0, &BYTE_SECTORS, 6),
            Err(Error::NotAligned)
        ));
    }
}
