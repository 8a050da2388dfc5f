//! The flash programming session.
//!
//! Firmware arrives in pieces of arbitrary size.  The session collects them
//! in a bounded buffer, erases the flash ahead of the write cursor, and
//! programs one program unit at a time.  All of the work happens in
//! [`ProgrammingSession::cyclic`], which does at most one erase or program
//! operation per call, so the owning task loop stays responsive.
//!
//! ```text
//! Init -> Wait <-> {Erase, Flash} -> End
//!           \--------------------> Error
//! ```

use core::fmt;

use heapless::Vec;
use storage::{FlashAddr, FlashDriver, WordModel, ERASED};

use crate::{AbortPolicy, Domain, DomainError, DomainTable, ErasePolicy, Event, Notify, SessionConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FlashState {
    Init,
    Wait,
    Erase,
    Flash,
    Error,
    End,
}

/// The coarse status reported to the protocol layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UserState {
    /// Idle, nothing pending.
    Ok,
    /// Erase or program activity in progress or pending.
    Running,
    Error,
}

/// Result of a single step of the state machine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Cycle {
    /// The session is still alive; call again.
    Running,
    /// The session reached `End`.
    End,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionError {
    /// The request is not allowed in this state.
    WrongState(FlashState),
    /// The write would land past the end of the domain.
    PastEnd,
    /// More data than the buffer can take in one call.
    ChunkTooLarge { size: usize, free: usize },
    /// The length is not a whole number of address units.
    Unaligned { size: usize, unit: usize },
    /// The buffer is still full, an abort is pending, or an erase pass may
    /// not be aborted.
    Busy,
    /// Writes need an erased domain first.
    NotErased,
    Domain(DomainError),
    /// The buffer capacity does not fit the program unit of the flash.
    BufferSize { capacity: usize, program_size: usize },
    /// The driver failed.  The session is now in `Error`.
    Flash { address: FlashAddr, error: storage::Error },
    /// The sector map has no sector at this address.
    NoSector(FlashAddr),
    /// The session is in `Error` and must be restarted with `flash_init`.
    Failed,
}

impl From<DomainError> for SessionError {
    fn from(e: DomainError) -> Self {
        SessionError::Domain(e)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::WrongState(state) => write!(f, "not allowed in state {:?}", state),
            SessionError::PastEnd => write!(f, "write past the end of the domain"),
            SessionError::ChunkTooLarge { size, free } => {
                write!(f, "chunk of {} bytes, only {} free", size, free)
            }
            SessionError::Unaligned { size, unit } => {
                write!(f, "length {} is not a multiple of {}", size, unit)
            }
            SessionError::Busy => write!(f, "busy"),
            SessionError::NotErased => write!(f, "domain has not been erased"),
            SessionError::Domain(e) => write!(f, "{}", e),
            SessionError::BufferSize {
                capacity,
                program_size,
            } => write!(
                f,
                "buffer of {} bytes does not fit program size {}",
                capacity, program_size
            ),
            SessionError::Flash { address, error } => {
                write!(f, "flash failure at 0x{:x}: {}", address, error)
            }
            SessionError::NoSector(address) => write!(f, "no sector at 0x{:x}", address),
            SessionError::Failed => write!(f, "session failed"),
        }
    }
}

/// One programming session over a flash device.
///
/// There is exactly one of these per flash device, owned by the task that
/// calls [`cyclic`](Self::cyclic).  `BUF` is the capacity of the flash
/// buffer in bytes.  It must be a multiple of the program unit, and at least
/// two units.
pub struct ProgrammingSession<'d, F, N, const BUF: usize>
where
    F: FlashDriver,
    N: Notify,
{
    flash: F,
    notify: N,
    domains: DomainTable<'d>,
    config: SessionConfig,

    state: FlashState,
    domain: usize,
    active: Domain,

    /// Program unit of the driver, in bytes and in address units.
    program_size: usize,
    program_units: u32,

    erase_active: bool,
    next_erase: FlashAddr,
    next_flash: FlashAddr,

    buffer: Vec<u8, BUF>,
    /// Bytes of `buffer` already programmed.
    write_idx: usize,
    /// At least one whole program unit is waiting in the buffer.
    buffer_full: bool,

    abort_requested: bool,
    end_requested: bool,
    /// Never trust an emptiness scan.  Stays set for the life of the engine.
    full_erase_required: bool,
    /// Bit per domain, set once an erase pass completed.
    erased: u32,
}

impl<'d, F, N, const BUF: usize> ProgrammingSession<'d, F, N, BUF>
where
    F: FlashDriver,
    N: Notify,
{
    pub fn new(
        flash: F,
        notify: N,
        domains: DomainTable<'d>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let program_size = flash.program_size();
        let bad_size = SessionError::BufferSize {
            capacity: BUF,
            program_size,
        };
        if program_size == 0 || BUF % program_size != 0 || BUF < 2 * program_size {
            return Err(bad_size);
        }
        let program_units = <F::Word as WordModel>::units(program_size).ok_or(bad_size)?;

        domains.check_layout(&flash.sectors())?;
        domains.check_program_size::<F::Word>(program_size)?;
        let active = *domains.get(0)?;

        Ok(ProgrammingSession {
            flash,
            notify,
            domains,
            config,
            state: FlashState::Init,
            domain: 0,
            active,
            program_size,
            program_units,
            erase_active: false,
            next_erase: 0,
            next_flash: 0,
            buffer: Vec::new(),
            write_idx: 0,
            buffer_full: false,
            abort_requested: false,
            end_requested: false,
            full_erase_required: false,
            erased: 0,
        })
    }

    /// Start a new session on `domain`, whatever state the previous one was
    /// in.  Afterwards the session waits for data, with both cursors at the
    /// domain base.
    pub fn flash_init(&mut self, domain: usize) -> Result<(), SessionError> {
        let active = *self.domains.get(domain)?;
        log::info!("flash init, domain {}", domain);

        self.domain = domain;
        self.active = active;
        self.erase_active = false;
        self.buffer.clear();
        self.write_idx = 0;
        self.buffer_full = false;
        self.abort_requested = false;
        self.end_requested = false;
        self.set_state(FlashState::Init);

        // Init never touches the flash.
        self.cyclic().map(|_| ())
    }

    /// Run one step of the state machine.
    pub fn cyclic(&mut self) -> Result<Cycle, SessionError> {
        match self.state {
            FlashState::Init => {
                let base = self.active.base;
                self.next_erase = base;
                self.next_flash = base;
                self.set_state(FlashState::Wait);
            }
            FlashState::Wait => self.step_wait()?,
            FlashState::Erase => self.step_erase()?,
            FlashState::Flash => self.step_flash(),
            FlashState::Error => return Err(SessionError::Failed),
            FlashState::End => return Ok(Cycle::End),
        }
        Ok(Cycle::Running)
    }

    fn step_wait(&mut self) -> Result<(), SessionError> {
        if self.abort_requested {
            self.abort_requested = false;
            if self.erase_active {
                log::warn!("erase pass aborted, full erase required from now on");
                self.erase_active = false;
                self.full_erase_required = true;
            }
            if !self.buffer.is_empty() {
                log::debug!("abort drops {} pending bytes", self.pending());
            }
            self.buffer.clear();
            self.write_idx = 0;
            self.buffer_full = false;
            self.set_state(FlashState::End);
            return Ok(());
        }

        let erase_required =
            self.config.erase == ErasePolicy::Lazy && self.next_flash >= self.next_erase;

        if self.end_requested && !self.buffer_full && !self.buffer.is_empty() {
            // Pad the last page to a whole program unit.
            let padded = self.write_idx + self.program_size;
            if self.buffer.resize(padded, ERASED).is_err() {
                return Err(self.fail(self.next_flash, storage::Error::OutOfBounds));
            }
            self.buffer_full = true;
        }

        if self.buffer_full && !erase_required {
            self.program_page()
        } else if self.erase_active || (self.buffer_full && erase_required) {
            self.erase_page()
        } else {
            if self.end_requested {
                self.end_requested = false;
                self.set_state(FlashState::End);
            }
            Ok(())
        }
    }

    fn program_page(&mut self) -> Result<(), SessionError> {
        let address = self.next_flash;
        let size = self.program_size;
        let page = &self.buffer[self.write_idx..self.write_idx + size];

        self.erased &= !(1 << self.domain);
        self.notify.notify(Event::ProgramStarted { address, size });
        log::debug!("program 0x{:x}", address);
        match self.flash.program(address, page) {
            Ok(()) => {
                self.notify.notify(Event::Programmed { address, size });
                self.set_state(FlashState::Flash);
                Ok(())
            }
            Err(error) => {
                self.notify.notify(Event::ProgramFailed { address, error });
                Err(self.fail(address, error))
            }
        }
    }

    fn erase_page(&mut self) -> Result<(), SessionError> {
        let address = self.next_erase;
        let sector = match self.flash.sectors().sector_for(address) {
            Some(sector) => sector,
            None => {
                log::warn!("no sector at 0x{:x}", address);
                self.set_state(FlashState::Error);
                return Err(SessionError::NoSector(address));
            }
        };

        if !self.full_erase_required {
            match self.flash.sector_is_erased(sector.base) {
                Ok(true) => {
                    log::debug!("sector 0x{:x} already erased", sector.base);
                    self.set_state(FlashState::Erase);
                    return Ok(());
                }
                Ok(false) => {}
                Err(error) => return Err(self.fail(sector.base, error)),
            }
        }

        self.notify.notify(Event::EraseStarted {
            address: sector.base,
        });
        log::debug!("erase 0x{:x}, 0x{:x} units", sector.base, sector.size);
        match self.flash.erase_sector(sector.base) {
            Ok(()) => {
                self.notify.notify(Event::Erased {
                    address: sector.base,
                });
                self.set_state(FlashState::Erase);
                Ok(())
            }
            Err(error) => {
                self.notify.notify(Event::EraseFailed {
                    address: sector.base,
                    error,
                });
                Err(self.fail(sector.base, error))
            }
        }
    }

    fn step_erase(&mut self) -> Result<(), SessionError> {
        // Sector sizes vary, so look it up again.
        let size = self.flash.sectors().sector_size(self.next_erase);
        if size == 0 {
            log::warn!("no sector at 0x{:x}", self.next_erase);
            self.set_state(FlashState::Error);
            return Err(SessionError::NoSector(self.next_erase));
        }
        self.next_erase = self.next_erase.saturating_add(size);

        if self.next_erase >= self.active.end() {
            self.erase_active = false;
            self.erased |= 1 << self.domain;
            log::info!("domain {} erased", self.domain);
            self.notify.notify(Event::DomainErased {
                domain: self.domain,
            });
        }
        self.set_state(FlashState::Wait);
        Ok(())
    }

    fn step_flash(&mut self) {
        self.next_flash = self.next_flash.saturating_add(self.program_units);
        self.write_idx += self.program_size;

        if self.buffer.len() <= self.write_idx {
            self.buffer.clear();
            self.write_idx = 0;
            self.buffer_full = false;
        } else {
            let remain = self.buffer.len() - self.write_idx;
            if remain < self.program_size {
                self.buffer.copy_within(self.write_idx.., 0);
                self.buffer.truncate(remain);
                self.write_idx = 0;
                self.buffer_full = false;
            }
        }

        if self.next_flash >= self.active.end() {
            self.set_state(FlashState::End);
        } else {
            self.set_state(FlashState::Wait);
        }
    }

    /// Hand data to the session.  Nothing is changed when the write is
    /// rejected.
    ///
    /// A write between `abort` and the end of the session fails with `Busy`.
    /// If the buffer is still full, a non-blocking call fails with `Busy`,
    /// and a blocking one runs the state machine until there is room.  A
    /// blocking call also waits for every whole program unit of the new data
    /// to be programmed before it returns.
    pub fn write(&mut self, data: &[u8], blocking: bool) -> Result<(), SessionError> {
        match self.state {
            FlashState::Init | FlashState::End | FlashState::Error => {
                return Err(SessionError::WrongState(self.state))
            }
            _ => {}
        }
        if self.abort_requested {
            return Err(SessionError::Busy);
        }

        let unit = <F::Word as WordModel>::UNIT;
        if data.len() % unit != 0 {
            return Err(SessionError::Unaligned {
                size: data.len(),
                unit,
            });
        }

        let domain = self.active;
        if self.config.erase == ErasePolicy::BeforeFlash
            && self.next_flash == domain.base
            && !self.is_domain_erased(self.domain)
        {
            return Err(SessionError::NotErased);
        }

        if self.buffer_full {
            if !blocking {
                return Err(SessionError::Busy);
            }
            self.drain()?;
        }

        if self.next_flash >= domain.end() {
            return Err(SessionError::PastEnd);
        }
        let room = <F::Word as WordModel>::bytes(domain.end() - self.next_flash)
            .ok_or(SessionError::PastEnd)?;
        if self.pending() + data.len() > room {
            return Err(SessionError::PastEnd);
        }

        let free = BUF - self.buffer.len();
        if data.len() > free {
            return Err(SessionError::ChunkTooLarge {
                size: data.len(),
                free,
            });
        }

        self.buffer
            .extend_from_slice(data)
            .map_err(|_| SessionError::ChunkTooLarge {
                size: data.len(),
                free,
            })?;
        self.buffer_full = self.buffer.len() >= self.program_size;

        if blocking {
            self.drain()?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), SessionError> {
        while self.buffer_full {
            if self.cyclic()? == Cycle::End {
                return Err(SessionError::WrongState(FlashState::End));
            }
        }
        Ok(())
    }

    /// Ask the session to stop at its next `Wait` step.  `wait_end` makes it
    /// take effect.
    pub fn abort(&mut self) -> Result<(), SessionError> {
        match self.state {
            FlashState::Init | FlashState::End | FlashState::Error => Ok(()),
            _ => {
                if self.config.abort == AbortPolicy::NotDuringErase && self.erase_active {
                    return Err(SessionError::Busy);
                }
                log::debug!("abort requested");
                self.abort_requested = true;
                Ok(())
            }
        }
    }

    /// Flush everything pending and run the session until it ends.
    ///
    /// This loops on the driver with no timeout.  A caller needing a bound
    /// must enforce it outside.
    pub fn wait_end(&mut self) -> Result<(), SessionError> {
        self.end_requested = true;
        self.notify.notify(Event::FlushStarted {
            aborting: self.abort_requested,
        });

        let result = loop {
            match self.cyclic() {
                Ok(Cycle::Running) => {}
                Ok(Cycle::End) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.notify.notify(Event::FlushFinished);
        match result {
            Ok(()) => log::info!("session on domain {} ended", self.domain),
            Err(e) => log::warn!("session on domain {} failed: {}", self.domain, e),
        }
        result
    }

    /// Stop whatever runs and erase all of `domain`.  With `blocking`, only
    /// return once the erase pass is complete.
    pub fn erase(&mut self, domain: usize, blocking: bool) -> Result<(), SessionError> {
        self.domains.get(domain)?;
        self.abort()?;
        if matches!(
            self.state,
            FlashState::Wait | FlashState::Erase | FlashState::Flash
        ) {
            if let Err(e) = self.wait_end() {
                log::warn!("previous session: {}", e);
            }
        }

        self.flash_init(domain)?;
        self.erase_active = true;
        log::info!("erase domain {}", domain);

        if blocking {
            while self.erase_active {
                if self.cyclic()? == Cycle::End {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Skip the emptiness scan for every later erase.  There is no way to
    /// clear this short of a restart.
    pub fn require_full_erase(&mut self) {
        self.full_erase_required = true;
    }

    pub fn state(&self) -> UserState {
        match self.state {
            FlashState::Init | FlashState::Wait | FlashState::End => {
                if self.erase_active || self.buffer_full {
                    UserState::Running
                } else {
                    UserState::Ok
                }
            }
            FlashState::Erase | FlashState::Flash => UserState::Running,
            FlashState::Error => UserState::Error,
        }
    }

    pub fn flash_state(&self) -> FlashState {
        self.state
    }

    pub fn next_erase(&self) -> FlashAddr {
        self.next_erase
    }

    pub fn next_flash(&self) -> FlashAddr {
        self.next_flash
    }

    /// Bytes accepted but not programmed yet.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.write_idx
    }

    pub fn is_domain_erased(&self, domain: usize) -> bool {
        domain < 32 && self.erased & (1 << domain) != 0
    }

    pub fn full_erase_required(&self) -> bool {
        self.full_erase_required
    }

    pub fn domains(&self) -> &DomainTable<'d> {
        &self.domains
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn notifier(&self) -> &N {
        &self.notify
    }

    /// Give back the flash and the notification sink.
    pub fn release(self) -> (F, N) {
        (self.flash, self.notify)
    }

    fn fail(&mut self, address: FlashAddr, error: storage::Error) -> SessionError {
        log::warn!("flash failure at 0x{:x}: {}", address, error);
        self.set_state(FlashState::Error);
        SessionError::Flash { address, error }
    }

    fn set_state(&mut self, state: FlashState) {
        if self.state != state {
            log::trace!(
                "{:?} -> {:?}, flash 0x{:x}, erase 0x{:x}{}",
                self.state,
                state,
                self.next_flash,
                self.next_erase,
                if self.erase_active { " (erasing)" } else { "" }
            );
        }
        self.state = state;
    }
}
