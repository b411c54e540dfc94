//! Scan session lifecycle
//!
//! This module sequences device commands for one opened scanner: option
//! handling, start-up (reserve, ready polling, window, calibration, scan),
//! the hand-off to the reader task, and teardown on completion, failure
//! or cancellation.

pub(crate) mod scan_session;

pub use scan_session::ScanSession;

/// Scan session state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Open and ready to start
    #[default]
    Idle,
    /// Options changed since the last frame
    Configuring,
    /// Start-up command sequence in progress
    Started,
    /// Reader task running
    Scanning,
    /// Reader task finished, reaping it
    Draining,
    /// Cancellation in progress
    Cancelling,
}

impl SessionState {
    /// Whether options may be changed and a frame started
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Configuring)
    }
}
