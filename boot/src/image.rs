//! Boot image support

use core::{cell::RefCell, fmt, mem::size_of};

use asraw::{AsMutRaw, AsRaw};
use storage::{FlashAddr, ReadFlash, WordModel};

use crate::crc::{Crc16, CRC_START_VALUE};
use crate::{Domain, DomainTable};

/// Smallest usable header: size, crc and the reserved half-word.
pub const HEADER_MIN_SIZE: usize = 8;

/// Header size needed to carry the identity fields.
pub const HEADER_IDENTITY_SIZE: usize = size_of::<ImageHeader>();

/// The header ("config block") at the start of every domain.  This is
/// intended to be interpreted as a C struct, in the native byte order.
/// Fields past the configured header size read as erased.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct ImageHeader {
    /// Size of the payload following the header, in address units.
    pub application_size: u32,
    /// CRC-16 of the payload.  The header is not covered.
    pub crc: u16,
    pub reserved: u16,
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision: u32,
    /// Free-form build or software version.
    pub build_version: u32,
}

impl AsRaw for ImageHeader {}
unsafe impl AsMutRaw for ImageHeader {}

impl Default for ImageHeader {
    fn default() -> Self {
        ImageHeader::blank()
    }
}

impl ImageHeader {
    /// A header as read from erased flash.
    pub const fn blank() -> ImageHeader {
        ImageHeader {
            application_size: u32::MAX,
            crc: u16::MAX,
            reserved: u16::MAX,
            vendor_id: u32::MAX,
            product_code: u32::MAX,
            revision: u32::MAX,
            build_version: u32::MAX,
        }
    }

    /// Does the mandatory part of the header still read as erased flash?
    pub fn is_blank(&self) -> bool {
        self.application_size == u32::MAX && self.crc == u16::MAX && self.reserved == u16::MAX
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConfigError {
    /// The configured header is smaller than [`HEADER_MIN_SIZE`].
    HeaderTooSmall { size: usize },
    /// The header does not fit inside the domain.
    HeaderOutsideDomain,
    /// The header reads as erased flash: no image was ever written.
    NoImage,
    /// Size or CRC is zero.
    NotConfigured,
    /// The stated payload does not fit after the header.
    TooLarge { size: u32, capacity: u32 },
    Flash(storage::Error),
}

impl From<storage::Error> for ConfigError {
    fn from(e: storage::Error) -> Self {
        ConfigError::Flash(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::HeaderTooSmall { size } => {
                write!(f, "header of {} bytes is smaller than {}", size, HEADER_MIN_SIZE)
            }
            ConfigError::HeaderOutsideDomain => write!(f, "header does not fit the domain"),
            ConfigError::NoImage => write!(f, "no image present"),
            ConfigError::NotConfigured => write!(f, "image is not configured"),
            ConfigError::TooLarge { size, capacity } => {
                write!(f, "application size 0x{:x} exceeds capacity 0x{:x}", size, capacity)
            }
            ConfigError::Flash(e) => write!(f, "flash: {}", e),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChecksumError {
    Config(ConfigError),
    Mismatch { stored: u16, computed: u16 },
    Flash(storage::Error),
}

impl From<ConfigError> for ChecksumError {
    fn from(e: ConfigError) -> Self {
        ChecksumError::Config(e)
    }
}

impl From<storage::Error> for ChecksumError {
    fn from(e: storage::Error) -> Self {
        ChecksumError::Flash(e)
    }
}

impl fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumError::Config(e) => write!(f, "{}", e),
            ChecksumError::Mismatch { stored, computed } => {
                write!(f, "crc mismatch: stored 0x{:04x}, computed 0x{:04x}", stored, computed)
            }
            ChecksumError::Flash(e) => write!(f, "flash: {}", e),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IdentityError {
    Config(ConfigError),
    /// The header is too small to hold identity fields.
    NoIdentity,
    Vendor { expected: u32, found: u32 },
    Product { expected: u32, found: u32 },
}

impl From<ConfigError> for IdentityError {
    fn from(e: ConfigError) -> Self {
        IdentityError::Config(e)
    }
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::Config(e) => write!(f, "{}", e),
            IdentityError::NoIdentity => write!(f, "header carries no identity"),
            IdentityError::Vendor { expected, found } => {
                write!(f, "vendor 0x{:08x}, expected 0x{:08x}", found, expected)
            }
            IdentityError::Product { expected, found } => {
                write!(f, "product 0x{:08x}, expected 0x{:08x}", found, expected)
            }
        }
    }
}

/// An image is the header plus payload residing in one domain.  This holds
/// on to a RefCell to the flash to bind the data to a particular flash.
pub struct Image<'f, F> {
    flash: &'f RefCell<F>,
    domain: Domain,
    pub header: ImageHeader,
    /// Header size in bytes.
    header_bytes: usize,
}

impl<'f, F: ReadFlash> Image<'f, F> {
    /// Read the header of `domain`.  This does not say anything about the
    /// image itself, not even whether one is present.
    pub fn from_flash(flash: &'f RefCell<F>, domain: &Domain) -> Result<Image<'f, F>, ConfigError> {
        let header_bytes =
            <F::Word as WordModel>::bytes(domain.header_size).ok_or(ConfigError::HeaderOutsideDomain)?;
        if header_bytes < HEADER_MIN_SIZE {
            return Err(ConfigError::HeaderTooSmall { size: header_bytes });
        }
        if domain.header_size > domain.size {
            return Err(ConfigError::HeaderOutsideDomain);
        }

        let mut header = ImageHeader::blank();
        let len = header_bytes.min(size_of::<ImageHeader>());
        flash
            .borrow_mut()
            .read(domain.base, &mut header.as_mut_raw()[..len])?;

        Ok(Image {
            flash,
            domain: *domain,
            header,
            header_bytes,
        })
    }

    /// Structural checks on the header.  Only a header that passes may have
    /// its checksum computed.
    pub fn check_configuration(&self) -> Result<(), ConfigError> {
        if self.header.is_blank() {
            return Err(ConfigError::NoImage);
        }
        if self.header.application_size == 0 || self.header.crc == 0 {
            return Err(ConfigError::NotConfigured);
        }
        let capacity = self.domain.capacity();
        if self.header.application_size > capacity {
            return Err(ConfigError::TooLarge {
                size: self.header.application_size,
                capacity,
            });
        }
        Ok(())
    }

    /// Check the configuration, then recompute the CRC over the payload and
    /// compare it with the stored one.
    pub fn check_checksum(&self) -> Result<(), ChecksumError> {
        self.check_configuration()?;
        let computed = self.calculate_crc()?;
        if computed != self.header.crc {
            log::warn!(
                "crc mismatch at 0x{:x}: stored 0x{:04x}, computed 0x{:04x}",
                self.domain.base,
                self.header.crc,
                computed
            );
            return Err(ChecksumError::Mismatch {
                stored: self.header.crc,
                computed,
            });
        }
        Ok(())
    }

    /// Refuse images built for another product, even if they are internally
    /// consistent.
    pub fn check_identity(&self, vendor: u32, product: u32) -> Result<(), IdentityError> {
        self.check_configuration()?;
        if self.header_bytes < HEADER_IDENTITY_SIZE {
            return Err(IdentityError::NoIdentity);
        }
        if self.header.vendor_id != vendor {
            return Err(IdentityError::Vendor {
                expected: vendor,
                found: self.header.vendor_id,
            });
        }
        if self.header.product_code != product {
            return Err(IdentityError::Product {
                expected: product,
                found: self.header.product_code,
            });
        }
        Ok(())
    }

    /// Compute the CRC of the payload, as stated by the header.
    fn calculate_crc(&self) -> Result<u16, ChecksumError> {
        let unit = <F::Word as WordModel>::UNIT;
        let total = <F::Word as WordModel>::bytes(self.header.application_size)
            .ok_or(ConfigError::TooLarge {
                size: self.header.application_size,
                capacity: self.domain.capacity(),
            })?;

        let mut digest = Crc16::new(CRC_START_VALUE);
        let mut buffer = [0u8; 128];
        let mut pos = 0;
        while pos < total {
            let todo = (total - pos).min(buffer.len());
            let buf = &mut buffer[0..todo];
            let address = self.payload_start() + (pos / unit) as FlashAddr;
            self.flash.borrow_mut().read(address, buf)?;
            digest.update(buf);
            pos += todo;
        }
        Ok(digest.finalize())
    }
}

impl<'f, F> Image<'f, F> {
    /// Address of the first payload unit, where the application starts.
    pub fn payload_start(&self) -> FlashAddr {
        self.domain.payload_start()
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }
}

pub fn check_configuration<F: ReadFlash>(
    flash: &RefCell<F>,
    domain: &Domain,
) -> Result<(), ConfigError> {
    Image::from_flash(flash, domain)?.check_configuration()
}

pub fn check_checksum<F: ReadFlash>(flash: &RefCell<F>, domain: &Domain) -> Result<(), ChecksumError> {
    Image::from_flash(flash, domain)?.check_checksum()
}

pub fn check_identity<F: ReadFlash>(
    flash: &RefCell<F>,
    domain: &Domain,
    vendor: u32,
    product: u32,
) -> Result<(), IdentityError> {
    Image::from_flash(flash, domain)?.check_identity(vendor, product)
}

/// Identity the application must carry to be started.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ExpectedIdentity {
    pub vendor_id: u32,
    pub product_code: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootFailure {
    Checksum(ChecksumError),
    Identity(IdentityError),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootDecision {
    /// Every domain holds a valid image.
    Boot,
    /// The first domain that failed, and why.
    StayInBootloader { domain: usize, reason: BootFailure },
}

impl BootDecision {
    pub fn is_boot(&self) -> bool {
        matches!(self, BootDecision::Boot)
    }
}

/// Decide whether the application may run.  Every domain must pass its
/// checksum; if an identity is expected, domain 0 must carry it as well.
pub fn boot_decision<F: ReadFlash>(
    flash: &RefCell<F>,
    domains: &DomainTable<'_>,
    expected: Option<ExpectedIdentity>,
) -> BootDecision {
    for (index, domain) in domains.iter().enumerate() {
        if let Err(e) = check_checksum(flash, domain) {
            log::info!("domain {}: {}", index, e);
            return BootDecision::StayInBootloader {
                domain: index,
                reason: BootFailure::Checksum(e),
            };
        }
    }

    if let Some(expected) = expected {
        if let Ok(domain) = domains.get(0) {
            if let Err(e) = check_identity(flash, domain, expected.vendor_id, expected.product_code) {
                log::info!("domain 0: {}", e);
                return BootDecision::StayInBootloader {
                    domain: 0,
                    reason: BootFailure::Identity(e),
                };
            }
        }
    }

    log::info!("all {} domains valid", domains.len());
    BootDecision::Boot
}
