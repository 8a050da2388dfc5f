//! Flash sector maps.
//!
//! Flash can only be erased in fixed blocks, and on many parts those blocks do
//! not all have the same size (a few small sectors at the bottom of a bank,
//! then large ones).  A sector map is the ordered list of these blocks.

use crate::{Error, FlashAddr, Result};

/// One erase unit: its base address and size, both in address units.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FlashSector {
    pub base: FlashAddr,
    pub size: u32,
}

impl FlashSector {
    pub const fn new(base: FlashAddr, size: u32) -> FlashSector {
        FlashSector { base, size }
    }

    pub fn contains(&self, address: FlashAddr) -> bool {
        address >= self.base && address - self.base < self.size
    }

    /// First address after the sector.  Only meaningful for validated maps.
    pub fn end(&self) -> FlashAddr {
        self.base.saturating_add(self.size)
    }
}

/// An ordered, non-overlapping set of sectors.
#[derive(Debug, Copy, Clone)]
pub struct SectorMap<'a> {
    sectors: &'a [FlashSector],
}

impl<'a> SectorMap<'a> {
    /// Wrap a sector table.  The table must be sorted by base address; call
    /// [`SectorMap::validate`] on tables that are not compile-time constants.
    pub const fn new(sectors: &'a [FlashSector]) -> SectorMap<'a> {
        SectorMap { sectors }
    }

    /// Check that the sectors are ascending, non-empty, non-overlapping and
    /// do not run off the end of the address space.
    pub fn validate(&self) -> Result<()> {
        let mut last_end: Option<FlashAddr> = None;
        for sector in self.sectors {
            if sector.size == 0 || sector.base.checked_add(sector.size).is_none() {
                log::warn!("bad sector at 0x{:x}", sector.base);
                return Err(Error::OutOfBounds);
            }
            if let Some(end) = last_end {
                if sector.base < end {
                    log::warn!("sector at 0x{:x} overlaps its predecessor", sector.base);
                    return Err(Error::OutOfBounds);
                }
            }
            last_end = Some(sector.base + sector.size);
        }
        Ok(())
    }

    /// The sector containing `address`.  A miss is an addressing error; the
    /// caller must not guess a size.
    pub fn sector_for(&self, address: FlashAddr) -> Option<FlashSector> {
        let idx = self.sectors.partition_point(|s| s.base <= address);
        if idx == 0 {
            return None;
        }
        let sector = self.sectors[idx - 1];
        if sector.contains(address) {
            Some(sector)
        } else {
            None
        }
    }

    /// Size of the sector containing `address`, or 0 on a miss.  Check for 0
    /// before stepping by the result.
    pub fn sector_size(&self, address: FlashAddr) -> u32 {
        self.sector_for(address).map(|s| s.size).unwrap_or(0)
    }

    /// Lowest address covered by the map.
    pub fn start(&self) -> Option<FlashAddr> {
        self.sectors.first().map(|s| s.base)
    }

    /// First address past the map.
    pub fn end(&self) -> Option<FlashAddr> {
        self.sectors.last().map(|s| s.end())
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a FlashSector> + 'a {
        self.sectors.iter()
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Is every address in `address .. address + units` inside some sector?
    /// Gaps between sectors count as outside.
    pub fn contains_range(&self, address: FlashAddr, units: u32) -> bool {
        if units == 0 {
            return true;
        }
        let last = match address.checked_add(units - 1) {
            Some(last) => last,
            None => return false,
        };
        let mut pos = address;
        loop {
            let sector = match self.sector_for(pos) {
                Some(s) => s,
                None => return false,
            };
            if last < sector.end() {
                return true;
            }
            if sector.end() <= pos {
                return false;
            }
            pos = sector.end();
        }
    }
}
