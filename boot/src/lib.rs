//! This is a basic bootloader built for embedded rust.
//!
//! It covers the two halves of a firmware update:
//!
//! - [`ProgrammingSession`] takes the firmware stream in arbitrary-sized
//!   pieces and erases and programs it into one flash domain.
//! - [`Image`] reads the header at the start of a domain back and checks the
//!   CRC of the payload, which decides whether the application may be started.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod crc;
pub mod download;

mod config;
mod domain;
mod image;
mod notify;
mod session;

pub use config::{AbortPolicy, ErasePolicy, SessionConfig};
pub use domain::{Domain, DomainError, DomainTable, MAX_DOMAINS};
pub use image::{
    boot_decision, check_checksum, check_configuration, check_identity, BootDecision,
    BootFailure, ChecksumError, ConfigError, ExpectedIdentity, IdentityError, Image,
    ImageHeader, HEADER_IDENTITY_SIZE, HEADER_MIN_SIZE,
};
pub use notify::{Event, Notify};
pub use session::{Cycle, FlashState, ProgrammingSession, SessionError, UserState};
