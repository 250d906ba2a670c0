//! Error types for MissionLink.
//!
//! Transfer failures are grouped by the recovery they allow:
//!
//! - **Timeout** (`AckTimeout`, `LinkLost`): no response within budget after
//!   every retry was spent, or the link went away.
//! - **Sequencing** (`ItemMismatch`): the vehicle asked for or returned the
//!   wrong index. The two ends disagree on position, so the transfer stops.
//! - **Rejection** (`Vehicle`): the vehicle answered with an explicit error.
//! - **Completeness** (`MissingRequests`): the vehicle claimed success without
//!   requesting every item.
//! - **Usage** (`InvalidState`, `InvalidConfig`): a transfer was started
//!   while another one is still running, or the engine was built with an
//!   unusable configuration. Returned to the caller, never reported to the
//!   observer.

use crate::message::MissionResult;
use crate::transfer::{Step, TransferKind, TransferState};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Errors that abort (or refuse to start) a mission transfer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The vehicle did not answer a step within the retry budget
    #[error("no response from vehicle to {step} after {attempts} attempt(s)")]
    AckTimeout {
        /// Step that went unanswered
        step: Step,
        /// Number of times the step was sent
        attempts: u32,
    },

    /// The link closed while a step was waiting for its response
    #[error("link to vehicle lost while waiting on {step}")]
    LinkLost {
        /// Step that was outstanding
        step: Step,
    },

    /// The vehicle requested or returned an index other than the expected one
    #[error("item sequence mismatch during {kind}: expected item {expected}, vehicle used {received}")]
    ItemMismatch {
        /// Direction of the aborted transfer
        kind: TransferKind,
        /// Index the engine was waiting for
        expected: u16,
        /// Index carried by the vehicle's message
        received: u16,
    },

    /// The vehicle rejected the transfer
    #[error("vehicle returned error during {kind}: {result}")]
    Vehicle {
        /// Direction of the aborted transfer
        kind: TransferKind,
        /// Result code supplied by the vehicle
        result: MissionResult,
    },

    /// The vehicle accepted an upload without requesting every item
    #[error("vehicle accepted mission after requesting {requested} of {expected} item(s)")]
    MissingRequests {
        /// Distinct indices the vehicle asked for
        requested: u16,
        /// Items announced
        expected: u16,
    },

    /// Failure inside MissionLink itself
    #[error("internal error: {0}")]
    Internal(Cow<'static, str>),

    /// A transfer was started while the engine was not idle
    #[error("cannot start transfer: {0} in progress")]
    InvalidState(TransferState),

    /// The transfer configuration cannot be used
    #[error("invalid transfer configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

/// Error classification reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Response timeout (including link loss)
    AckTimeout,
    /// Sequence index mismatch
    ItemMismatch,
    /// Explicit rejection from the vehicle
    Vehicle,
    /// Upload acknowledged without all items requested
    MissingRequests,
    /// Internal failure
    Internal,
    /// Transfer already in progress
    InvalidState,
    /// Unusable configuration
    InvalidConfig,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AckTimeout => "AckTimeoutError",
            Self::ItemMismatch => "ItemMismatchError",
            Self::Vehicle => "VehicleError",
            Self::MissingRequests => "MissingRequestsError",
            Self::Internal => "InternalError",
            Self::InvalidState => "InvalidStateError",
            Self::InvalidConfig => "InvalidConfigError",
        };
        f.write_str(name)
    }
}

impl TransferError {
    /// Classification of this error
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AckTimeout { .. } | Self::LinkLost { .. } => ErrorCode::AckTimeout,
            Self::ItemMismatch { .. } => ErrorCode::ItemMismatch,
            Self::Vehicle { .. } => ErrorCode::Vehicle,
            Self::MissingRequests { .. } => ErrorCode::MissingRequests,
            Self::Internal(_) => ErrorCode::Internal,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
        }
    }

    /// Returns true if starting the same transfer again may succeed
    ///
    /// Only timeouts qualify. Sequencing, rejection and completeness errors
    /// will repeat against the same vehicle.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AckTimeout { .. } | Self::LinkLost { .. })
    }

    /// Create an internal error with static context (zero allocation)
    #[must_use]
    pub const fn internal(context: &'static str) -> Self {
        Self::Internal(Cow::Borrowed(context))
    }
}

/// Errors building a [`MissionItemSet`](crate::MissionItemSet)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MissionError {
    /// An item's index does not match its position
    #[error("item at position {position} has sequence {seq}")]
    OutOfSequence {
        /// Position in the supplied list
        position: usize,
        /// Sequence index carried by the item
        seq: u16,
    },

    /// More items than a 16-bit sequence index can address
    #[error("mission holds {0} items, limit is 65535")]
    TooManyItems(usize),
}

/// Errors sending on a [`MessageChannel`](crate::MessageChannel)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The peer side of the link is gone
    #[error("link closed")]
    Closed,
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;
