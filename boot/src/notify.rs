//! Progress and failure notifications.
//!
//! The programming session reports what it does to an outside channel (on a
//! CANopen device, the EMCY producer).  It never formats or transmits these
//! itself; it only hands an [`Event`] to whatever implements [`Notify`].

use storage::{Error, FlashAddr};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Event {
    EraseStarted { address: FlashAddr },
    Erased { address: FlashAddr },
    EraseFailed { address: FlashAddr, error: Error },
    ProgramStarted { address: FlashAddr, size: usize },
    Programmed { address: FlashAddr, size: usize },
    ProgramFailed { address: FlashAddr, error: Error },
    /// An erase pass reached the end of the domain.
    DomainErased { domain: usize },
    /// `wait_end` started flushing the session.
    FlushStarted { aborting: bool },
    /// `wait_end` finished, successfully or not.
    FlushFinished,
}

impl Event {
    /// Numeric code carried on the notification channel.
    pub fn code(&self) -> u16 {
        match self {
            Event::FlushStarted { .. } => 0x00,
            Event::EraseStarted { .. } => 0x17,
            Event::Erased { .. } => 0x18,
            Event::EraseFailed { .. } => 0x19,
            Event::DomainErased { .. } => 0x1f,
            Event::ProgramStarted { .. } => 0x27,
            Event::Programmed { .. } => 0x28,
            Event::ProgramFailed { .. } => 0x29,
            Event::FlushFinished => 0x88,
        }
    }

    pub fn address(&self) -> Option<FlashAddr> {
        match *self {
            Event::EraseStarted { address }
            | Event::Erased { address }
            | Event::EraseFailed { address, .. }
            | Event::ProgramStarted { address, .. }
            | Event::Programmed { address, .. }
            | Event::ProgramFailed { address, .. } => Some(address),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Event::EraseFailed { .. } | Event::ProgramFailed { .. })
    }
}

pub trait Notify {
    fn notify(&mut self, event: Event);
}

/// Discard all notifications.
impl Notify for () {
    fn notify(&mut self, _event: Event) {}
}

impl<T: Notify + ?Sized> Notify for &mut T {
    fn notify(&mut self, event: Event) {
        (**self).notify(event)
    }
}

#[cfg(feature = "std")]
impl Notify for std::vec::Vec<Event> {
    fn notify(&mut self, event: Event) {
        self.push(event);
    }
}
