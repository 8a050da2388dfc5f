//! Domain download.
//!
//! The transport side of a firmware update.  A protocol layer (an SDO server,
//! say) announces the size of the file, then delivers it in segments of
//! whatever size its frames carry.  [`DomainDownload`] collects those into
//! chunks of `S` bytes, so the session always sees writes that are whole
//! address units, and checks the total against the announced size.

use core::fmt;

use heapless::Vec;
use storage::{FlashDriver, WordModel};

use crate::{Notify, ProgrammingSession, SessionError};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DownloadError {
    /// `segment` without a `start`.
    NotStarted,
    /// The announced size does not fit the domain.
    TooLarge { declared: usize, capacity: usize },
    /// More data than announced.
    Overrun { declared: usize, received: usize },
    /// The last segment arrived before all announced data did.
    SizeMismatch { declared: usize, received: usize },
    /// The staging size does not suit the session.
    Staging { size: usize },
    Session(SessionError),
}

impl From<SessionError> for DownloadError {
    fn from(e: SessionError) -> Self {
        DownloadError::Session(e)
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::NotStarted => write!(f, "no download started"),
            DownloadError::TooLarge { declared, capacity } => {
                write!(f, "{} bytes announced, domain holds {}", declared, capacity)
            }
            DownloadError::Overrun { declared, received } => {
                write!(f, "{} bytes received, only {} announced", received, declared)
            }
            DownloadError::SizeMismatch { declared, received } => {
                write!(f, "{} bytes received, {} announced", received, declared)
            }
            DownloadError::Staging { size } => write!(f, "bad staging size {}", size),
            DownloadError::Session(e) => write!(f, "{}", e),
        }
    }
}

pub struct DomainDownload<const S: usize> {
    staged: Vec<u8, S>,
    declared: usize,
    received: usize,
    active: bool,
}

impl<const S: usize> Default for DomainDownload<S> {
    fn default() -> Self {
        DomainDownload::new()
    }
}

impl<const S: usize> DomainDownload<S> {
    pub const fn new() -> DomainDownload<S> {
        DomainDownload {
            staged: Vec::new(),
            declared: 0,
            received: 0,
            active: false,
        }
    }

    /// Begin a download of `declared` bytes into `domain`.  This restarts the
    /// session on that domain.
    pub fn start<F, N, const B: usize>(
        &mut self,
        session: &mut ProgrammingSession<'_, F, N, B>,
        domain: usize,
        declared: usize,
    ) -> Result<(), DownloadError>
    where
        F: FlashDriver,
        N: Notify,
    {
        let unit = <F::Word as WordModel>::UNIT;
        if S == 0 || S % unit != 0 || S + session.flash().program_size() > B {
            return Err(DownloadError::Staging { size: S });
        }

        let size = session.domains().get(domain).map_err(SessionError::from)?.size;
        let capacity = <F::Word as WordModel>::bytes(size).unwrap_or(usize::MAX);
        if declared > capacity {
            return Err(DownloadError::TooLarge { declared, capacity });
        }

        session.flash_init(domain)?;
        self.staged.clear();
        self.declared = declared;
        self.received = 0;
        self.active = true;
        log::info!("download of {} bytes to domain {}", declared, domain);
        Ok(())
    }

    /// Take the next piece of the file.  On the `last` segment, everything is
    /// flushed to flash and the session is run to its end.
    pub fn segment<F, N, const B: usize>(
        &mut self,
        session: &mut ProgrammingSession<'_, F, N, B>,
        bytes: &[u8],
        last: bool,
    ) -> Result<(), DownloadError>
    where
        F: FlashDriver,
        N: Notify,
    {
        if !self.active {
            return Err(DownloadError::NotStarted);
        }
        let received = self.received + bytes.len();
        if received > self.declared {
            self.cancel(session);
            return Err(DownloadError::Overrun {
                declared: self.declared,
                received,
            });
        }
        self.received = received;

        let mut rest = bytes;
        while !rest.is_empty() {
            let room = S - self.staged.len();
            let (now, later) = rest.split_at(room.min(rest.len()));
            self.staged
                .extend_from_slice(now)
                .map_err(|_| DownloadError::Staging { size: S })?;
            rest = later;
            if self.staged.is_full() {
                self.flush(session)?;
            }
        }

        if last {
            self.active = false;
            if !self.staged.is_empty() {
                self.flush(session)?;
            }
            session.wait_end()?;
            if self.received != self.declared {
                return Err(DownloadError::SizeMismatch {
                    declared: self.declared,
                    received: self.received,
                });
            }
        }
        Ok(())
    }

    fn flush<F, N, const B: usize>(
        &mut self,
        session: &mut ProgrammingSession<'_, F, N, B>,
    ) -> Result<(), DownloadError>
    where
        F: FlashDriver,
        N: Notify,
    {
        let result = session.write(&self.staged, true);
        self.staged.clear();
        if let Err(e) = result {
            self.cancel(session);
            return Err(e.into());
        }
        Ok(())
    }

    /// Stop the download and the session behind it.
    fn cancel<F, N, const B: usize>(&mut self, session: &mut ProgrammingSession<'_, F, N, B>)
    where
        F: FlashDriver,
        N: Notify,
    {
        self.active = false;
        self.staged.clear();
        match session.abort() {
            Ok(()) => {
                if let Err(e) = session.wait_end() {
                    log::warn!("cancelled session: {}", e);
                }
            }
            Err(e) => log::warn!("cannot abort session: {}", e),
        }
        log::warn!("download cancelled after {} bytes", self.received);
    }

    pub fn declared(&self) -> usize {
        self.declared
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}
