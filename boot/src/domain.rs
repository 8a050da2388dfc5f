//! Flash domains.
//!
//! A domain is one independently flashable region: an image header at its
//! base, followed by the application payload.  A device has a fixed table of
//! them (e.g. one per core), and every one must hold a valid image before the
//! application is started.

use core::fmt;

use storage::{FlashAddr, SectorMap, WordModel};

/// Domains are tracked in a 32-bit mask.
pub const MAX_DOMAINS: usize = 32;

/// One flashable region.  All values are in address units.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Domain {
    pub base: FlashAddr,
    pub size: u32,
    /// Size of the image header at the start of the domain.
    pub header_size: u32,
}

impl Domain {
    pub const fn new(base: FlashAddr, size: u32, header_size: u32) -> Domain {
        Domain {
            base,
            size,
            header_size,
        }
    }

    /// First address past the domain.
    pub fn end(&self) -> FlashAddr {
        self.base.saturating_add(self.size)
    }

    /// Address of the first payload unit, right after the header.
    pub fn payload_start(&self) -> FlashAddr {
        self.base.saturating_add(self.header_size)
    }

    /// Payload units available after the header.
    pub fn capacity(&self) -> u32 {
        self.size.saturating_sub(self.header_size)
    }

    pub fn contains(&self, address: FlashAddr) -> bool {
        address >= self.base && address - self.base < self.size
    }

    fn overlaps(&self, other: &Domain) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DomainError {
    /// The table is empty or has more than [`MAX_DOMAINS`] entries.
    Count(usize),
    /// Zero size, or the domain runs off the end of the address space.
    Size(usize),
    /// The header does not fit in the domain.
    Header(usize),
    /// Two domains share addresses.
    Overlap(usize, usize),
    /// The domain does not start and end on sector boundaries.
    NotSectorAligned(usize),
    /// There is no domain with this number.
    Unknown(usize),
    /// The domain is not a whole number of program units.
    ProgramUnit(usize),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::Count(n) => write!(f, "{} domains configured, need 1..={}", n, MAX_DOMAINS),
            DomainError::Size(i) => write!(f, "domain {} has an invalid size", i),
            DomainError::Header(i) => write!(f, "domain {} header does not fit", i),
            DomainError::Overlap(a, b) => write!(f, "domains {} and {} overlap", a, b),
            DomainError::NotSectorAligned(i) => {
                write!(f, "domain {} is not aligned to erase sectors", i)
            }
            DomainError::Unknown(i) => write!(f, "no domain {}", i),
            DomainError::ProgramUnit(i) => {
                write!(f, "domain {} is not a multiple of the program size", i)
            }
        }
    }
}

/// The validated, static list of domains of a device.
#[derive(Debug, Copy, Clone)]
pub struct DomainTable<'a> {
    domains: &'a [Domain],
}

impl<'a> DomainTable<'a> {
    pub fn new(domains: &'a [Domain]) -> Result<DomainTable<'a>, DomainError> {
        if domains.is_empty() || domains.len() > MAX_DOMAINS {
            return Err(DomainError::Count(domains.len()));
        }
        for (i, d) in domains.iter().enumerate() {
            if d.size == 0 || d.base.checked_add(d.size).is_none() {
                return Err(DomainError::Size(i));
            }
            if d.header_size > d.size {
                return Err(DomainError::Header(i));
            }
            for (j, other) in domains.iter().enumerate().skip(i + 1) {
                if d.overlaps(other) {
                    return Err(DomainError::Overlap(i, j));
                }
            }
        }
        Ok(DomainTable { domains })
    }

    /// Check that erasing a domain sector by sector never touches anything
    /// outside of it.
    pub fn check_layout(&self, sectors: &SectorMap<'_>) -> Result<(), DomainError> {
        for (i, d) in self.domains.iter().enumerate() {
            let first = sectors.sector_for(d.base);
            let last = sectors.sector_for(d.end() - 1);
            match (first, last) {
                (Some(first), Some(last)) if first.base == d.base && last.end() == d.end() => {}
                _ => return Err(DomainError::NotSectorAligned(i)),
            }
            if !sectors.contains_range(d.base, d.size) {
                return Err(DomainError::NotSectorAligned(i));
            }
        }
        Ok(())
    }

    /// Check that every domain holds a whole number of `program_size` byte
    /// units, so the last padded unit ends at the domain end.
    pub fn check_program_size<W: WordModel>(&self, program_size: usize) -> Result<(), DomainError> {
        for (i, d) in self.domains.iter().enumerate() {
            match W::bytes(d.size) {
                Some(bytes) if program_size != 0 && bytes % program_size == 0 => {}
                _ => return Err(DomainError::ProgramUnit(i)),
            }
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<&'a Domain, DomainError> {
        self.domains.get(index).ok_or(DomainError::Unknown(index))
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Domain> + 'a {
        self.domains.iter()
    }
}
