//! Flash styles
//!
//! Various microcontrollers have various types of flash memories available to them.

use anyhow::Result;
use storage::{FlashSector, WordModel};

use crate::SimFlash;

/// The configuration of a single flash area.
pub struct AreaLayout {
    pub name: &'static str,
    pub sectors: &'static [FlashSector],
    /// Bytes per program operation.
    pub program_size: usize,
    /// Address units per address, 2 for word-addressed parts.
    pub unit: usize,
}

impl AreaLayout {
    pub fn build<W: WordModel>(&self) -> Result<SimFlash<W>> {
        anyhow::ensure!(W::UNIT == self.unit, "{} needs a different word model", self.name);
        SimFlash::new(self.sectors, self.program_size)
    }

    pub fn base(&self) -> u32 {
        self.sectors[0].base
    }
}

/// STM32F4-style.
/// These devices have a fairly small number of sectors, growing from 16k at
/// the bottom of the bank to 128k.
pub static STM32F4: AreaLayout = AreaLayout {
    name: "stm32f4",
    sectors: &[
        FlashSector::new(0x0800_0000, 16 * 1024),
        FlashSector::new(0x0800_4000, 16 * 1024),
        FlashSector::new(0x0800_8000, 16 * 1024),
        FlashSector::new(0x0800_c000, 16 * 1024),
        FlashSector::new(0x0801_0000, 64 * 1024),
        FlashSector::new(0x0802_0000, 128 * 1024),
        FlashSector::new(0x0804_0000, 128 * 1024),
    ],
    program_size: 16,
    unit: 1,
};

/// K64-style.
/// These devices have small uniform sectors.
pub static K64: AreaLayout = AreaLayout {
    name: "k64",
    sectors: &K64_SECTORS,
    program_size: 8,
    unit: 1,
};

static K64_SECTORS: [FlashSector; 32] = {
    let mut sectors = [FlashSector::new(0, 0); 32];
    let mut i = 0;
    while i < sectors.len() {
        sectors[i] = FlashSector::new(i as u32 * 4096, 4096);
        i += 1;
    }
    sectors
};

/// Page-style devices.  Based on the LPC55S69, where the program unit is the
/// whole 512 byte page.
pub static LPC55: AreaLayout = AreaLayout {
    name: "lpc55",
    sectors: &LPC55_SECTORS,
    program_size: 512,
    unit: 1,
};

static LPC55_SECTORS: [FlashSector; 128] = {
    let mut sectors = [FlashSector::new(0, 0); 128];
    let mut i = 0;
    while i < sectors.len() {
        sectors[i] = FlashSector::new(0x1_0000 + i as u32 * 512, 512);
        i += 1;
    }
    sectors
};

/// Word addressed DSP flash, modelled on the TMS320F2838x.  Sizes are in
/// 16-bit words; one program operation writes 128 bits.
pub static F2838X: AreaLayout = AreaLayout {
    name: "f2838x",
    sectors: &[
        FlashSector::new(0x8_2000, 0x2000),
        FlashSector::new(0x8_4000, 0x2000),
        FlashSector::new(0x8_6000, 0x2000),
        FlashSector::new(0x8_8000, 0x8000),
        FlashSector::new(0x9_0000, 0x8000),
    ],
    program_size: 16,
    unit: 2,
};

/// All of the byte addressed flash devices.
pub static ALL_FLASHES: [&AreaLayout; 3] = [&STM32F4, &K64, &LPC55];

/// An iterator that returns each byte addressed device, freshly erased.
pub fn all_flashes() -> impl Iterator<Item = Result<(&'static AreaLayout, SimFlash)>> {
    ALL_FLASHES
        .iter()
        .map(|layout| -> Result<(&'static AreaLayout, SimFlash)> {
            Ok((*layout, layout.build()?))
        })
}
