//! Session configuration.
//!
//! These are deployment choices.  They are fixed when the session is created
//! and cannot change while it runs.

/// When flash pages are erased.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum ErasePolicy {
    /// Erase each sector just before the write cursor first enters it.
    #[default]
    Lazy,
    /// Require an explicit erase pass over the whole domain before the first
    /// write is accepted.
    BeforeFlash,
}

/// Whether an abort may interrupt a running erase pass.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum AbortPolicy {
    #[default]
    Allowed,
    /// `abort` reports busy while an erase pass is in progress.
    NotDuringErase,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct SessionConfig {
    pub erase: ErasePolicy,
    pub abort: AbortPolicy,
}

impl SessionConfig {
    pub fn new() -> SessionConfig {
        SessionConfig::default()
    }

    pub fn erase_policy(mut self, erase: ErasePolicy) -> Self {
        self.erase = erase;
        self
    }

    pub fn abort_policy(mut self, abort: AbortPolicy) -> Self {
        self.abort = abort;
        self
    }
}
