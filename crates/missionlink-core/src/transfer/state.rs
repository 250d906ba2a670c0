//! Transfer state, steps and step timers.

use std::fmt;
use tokio::time::Instant;

/// Engine state as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// No transfer in flight; the mission may be edited
    Idle,
    /// Upload in flight
    WriteInProgress,
    /// Download in flight
    ReadInProgress,
}

impl TransferState {
    /// Check if the mission may be edited (no transfer in flight)
    #[must_use]
    pub fn can_edit(self) -> bool {
        self == Self::Idle
    }

    /// Check if a transfer is in flight
    #[must_use]
    pub fn in_progress(self) -> bool {
        !self.can_edit()
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::WriteInProgress => write!(f, "write"),
            Self::ReadInProgress => write!(f, "read"),
        }
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// Upload to the vehicle
    Write,
    /// Download from the vehicle
    Read,
}

impl TransferKind {
    /// State the engine is in while a transfer of this kind runs
    #[must_use]
    pub fn state(self) -> TransferState {
        match self {
            Self::Write => TransferState::WriteInProgress,
            Self::Read => TransferState::ReadInProgress,
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// One request/response unit with its own timeout and retry counter
///
/// A step is named after the message the engine sent and is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Write: item count announced, waiting for the first request
    AnnounceCount,
    /// Write: item sent, waiting for the next request or the final ack
    SendItem(u16),
    /// Read: list requested, waiting for the count
    RequestList,
    /// Read: item requested, waiting for the item
    RequestItem(u16),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnnounceCount => write!(f, "item count announcement"),
            Self::SendItem(seq) => write!(f, "item {seq}"),
            Self::RequestList => write!(f, "item list request"),
            Self::RequestItem(seq) => write!(f, "request for item {seq}"),
        }
    }
}

/// Identifies one arming of the step timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

/// The armed response timer of the active step
///
/// Re-arming or finishing the step replaces the timer; a timeout delivered
/// with an old id is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTimer {
    /// Timer identity
    pub id: TimerId,
    /// When the step times out
    pub deadline: Instant,
}

/// Snapshot of an in-flight transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Transfer direction
    pub kind: TransferKind,
    /// Step waiting for a response
    pub step: Step,
    /// Times the current step has been sent
    pub attempts: u32,
    /// Items sent (write) or received (read) so far
    pub done: u16,
    /// Items in the transfer; unknown on a read until the count arrives
    pub total: Option<u16>,
    /// When the current step times out
    pub deadline: Instant,
}
