//! Simulated flash
//!
//! The NOR-type flashes used in microcontrollers differ quite a bit in terms
//! of capabilities provided.  This simulator attempts to capture the
//! diversity of these devices: uneven sector sizes, program units from a few
//! bytes up to a whole page, and parts that address flash in 16-bit words.
//!
//! The simulator is strict.  Programming a byte that is not erased is an
//! error, even where the real part would silently AND the bits together.  That
//! way, any write that was not preceded by an erase shows up in the tests.
//! Erase and program failures can be injected at chosen addresses.

use std::marker::PhantomData;

use anyhow::{anyhow, bail, Result};
use storage::{
    check_erase, check_program, check_read, ByteAddressed, Error, FlashAddr, FlashDriver,
    FlashSector, ReadFlash, SectorMap, WordModel, ERASED,
};

pub mod gen;
pub mod styles;

/// Status code reported for injected failures.
pub const INJECTED_FAILURE: u16 = 0xdead;

pub struct SimFlash<W = ByteAddressed> {
    base: FlashAddr,
    sectors: Vec<FlashSector>,
    program_size: usize,
    /// Contents, as bytes.
    data: Vec<u8>,

    fail_erase_at: Option<FlashAddr>,
    fail_program_at: Option<FlashAddr>,

    erases: Vec<FlashAddr>,
    programs: usize,

    word: PhantomData<W>,
}

impl<W: WordModel> SimFlash<W> {
    /// Build an erased flash over `sectors`.  The sectors must be contiguous.
    pub fn new(sectors: &[FlashSector], program_size: usize) -> Result<SimFlash<W>> {
        let map = SectorMap::new(sectors);
        map.validate().map_err(|e| anyhow!("invalid sector map: {}", e))?;

        let base = map.start().ok_or_else(|| anyhow!("no sectors"))?;
        let end = map.end().ok_or_else(|| anyhow!("no sectors"))?;
        if !map.contains_range(base, end - base) {
            bail!("sector map has holes");
        }
        if program_size == 0 || program_size % W::UNIT != 0 {
            bail!("program size {} does not fit the word size", program_size);
        }
        for sector in sectors {
            let bytes = W::bytes(sector.size).ok_or_else(|| anyhow!("sector too large"))?;
            if bytes % program_size != 0 {
                bail!(
                    "sector at 0x{:x} is not a multiple of the program size",
                    sector.base
                );
            }
        }

        let total = W::bytes(end - base).ok_or_else(|| anyhow!("flash too large"))?;
        Ok(SimFlash {
            base,
            sectors: sectors.to_vec(),
            program_size,
            data: vec![ERASED; total],
            fail_erase_at: None,
            fail_program_at: None,
            erases: Vec::new(),
            programs: 0,
            word: PhantomData,
        })
    }

    fn offset(&self, address: FlashAddr) -> Result<usize, Error> {
        let units = address.checked_sub(self.base).ok_or(Error::OutOfBounds)?;
        W::bytes(units).ok_or(Error::OutOfBounds)
    }

    /// Place data into the flash directly, as a debugger would.  No erase or
    /// alignment rules apply.
    pub fn install(&mut self, bytes: &[u8], address: FlashAddr) -> Result<()> {
        let pos = self.offset(address)?;
        let end = pos
            .checked_add(bytes.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| anyhow!("install of {} bytes at 0x{:x} does not fit", bytes.len(), address))?;
        self.data[pos..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Flip the bits of one byte, `byte` bytes after `address`.
    pub fn corrupt(&mut self, address: FlashAddr, byte: usize) -> Result<()> {
        let pos = self.offset(address)? + byte;
        let cell = self
            .data
            .get_mut(pos)
            .ok_or_else(|| anyhow!("corrupt outside of flash"))?;
        *cell ^= 0xff;
        Ok(())
    }

    /// The raw contents of `len` bytes at `address`.
    pub fn bytes_at(&self, address: FlashAddr, len: usize) -> Result<&[u8]> {
        let pos = self.offset(address)?;
        self.data
            .get(pos..pos + len)
            .ok_or_else(|| anyhow!("range outside of flash"))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Make the erase of the sector at `address` fail.
    pub fn fail_erase_at(&mut self, address: Option<FlashAddr>) {
        self.fail_erase_at = address;
    }

    /// Make programming the unit at `address` fail.
    pub fn fail_program_at(&mut self, address: Option<FlashAddr>) {
        self.fail_program_at = address;
    }

    /// Base addresses of every sector erased so far, in order.
    pub fn erases(&self) -> &[FlashAddr] {
        &self.erases
    }

    /// Number of program operations so far.
    pub fn programs(&self) -> usize {
        self.programs
    }
}

impl<W: WordModel> ReadFlash for SimFlash<W> {
    type Word = W;

    fn read(&mut self, address: FlashAddr, bytes: &mut [u8]) -> Result<(), Error> {
        check_read::<W>(&self.sectors(), address, bytes.len())?;
        let pos = self.offset(address)?;
        bytes.copy_from_slice(&self.data[pos..pos + bytes.len()]);
        Ok(())
    }
}

impl<W: WordModel> FlashDriver for SimFlash<W> {
    fn program_size(&self) -> usize {
        self.program_size
    }

    fn sectors(&self) -> SectorMap<'_> {
        SectorMap::new(&self.sectors)
    }

    fn erase_sector(&mut self, address: FlashAddr) -> Result<(), Error> {
        let sector = check_erase(self, address)?;
        if self.fail_erase_at == Some(address) {
            log::debug!("injected erase failure at 0x{:x}", address);
            return Err(Error::Hardware(INJECTED_FAILURE));
        }
        let pos = self.offset(address)?;
        let len = W::bytes(sector.size).ok_or(Error::OutOfBounds)?;
        self.data[pos..pos + len].fill(ERASED);
        self.erases.push(address);
        Ok(())
    }

    fn program(&mut self, address: FlashAddr, bytes: &[u8]) -> Result<(), Error> {
        check_program(self, address, bytes.len())?;
        if self.fail_program_at == Some(address) {
            log::debug!("injected program failure at 0x{:x}", address);
            return Err(Error::Hardware(INJECTED_FAILURE));
        }
        let pos = self.offset(address)?;
        let cells = &mut self.data[pos..pos + bytes.len()];
        if cells.iter().any(|&b| b != ERASED) {
            return Err(Error::NotErased);
        }
        cells.copy_from_slice(bytes);
        self.programs += 1;
        Ok(())
    }
}
