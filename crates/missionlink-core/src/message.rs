//! Protocol message vocabulary.
//!
//! Messages are described by purpose, not by encoding. The same enum is used
//! in both directions; the table below lists who sends what.
//!
//! ```text
//! Ground (engine)                       Vehicle (peer)
//!     |                                      |
//!     |-- AnnounceCount(N) ---------------->|   write
//!     |<--------------- RequestItem(0) -----|
//!     |-- ItemPayload(0) ------------------>|
//!     |   ...                                |
//!     |<--------------- FinalAck(result) ---|
//!     |                                      |
//!     |-- RequestList --------------------->|   read
//!     |<--------------- CountResponse(N) ---|
//!     |-- RequestItem(0) ------------------>|
//!     |<--------------- ItemPayload(0) -----|
//!     |   ...                                |
//! ```
//!
//! `ErrorAck` may replace any vehicle response.

use crate::mission::MissionItem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Upload is starting with `count` items
    AnnounceCount {
        /// Number of items that will be sent
        count: u16,
    },
    /// Ask the vehicle for its item count
    RequestList,
    /// Vehicle's answer to `RequestList`
    CountResponse {
        /// Number of items stored on the vehicle
        count: u16,
    },
    /// Ask the other side for one item
    RequestItem {
        /// Requested sequence index
        seq: u16,
    },
    /// One item, in answer to `RequestItem`
    ItemPayload(MissionItem),
    /// Vehicle's verdict at the end of an upload
    FinalAck {
        /// Accepted, or the reason for rejection
        result: MissionResult,
    },
    /// Vehicle rejected a request instead of answering it
    ErrorAck {
        /// Reason for the rejection
        reason: MissionResult,
    },
}

impl Message {
    /// Short name used in logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AnnounceCount { .. } => "AnnounceCount",
            Self::RequestList => "RequestList",
            Self::CountResponse { .. } => "CountResponse",
            Self::RequestItem { .. } => "RequestItem",
            Self::ItemPayload(_) => "ItemPayload",
            Self::FinalAck { .. } => "FinalAck",
            Self::ErrorAck { .. } => "ErrorAck",
        }
    }
}

/// Vehicle result codes for acknowledgements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissionResult {
    /// Mission accepted
    Accepted,
    /// Generic error
    Error,
    /// Coordinate frame not supported
    UnsupportedFrame,
    /// Command not supported
    Unsupported,
    /// Mission does not fit in vehicle storage
    NoSpace,
    /// A parameter is out of range
    Invalid,
    /// Item received out of sequence
    InvalidSequence,
    /// Vehicle is not accepting missions
    Denied,
}

impl MissionResult {
    /// Check if this result means success
    #[must_use]
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

impl fmt::Display for MissionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Accepted => "accepted",
            Self::Error => "unspecified error",
            Self::UnsupportedFrame => "coordinate frame is not supported",
            Self::Unsupported => "command is not supported",
            Self::NoSpace => "not enough space for the mission",
            Self::Invalid => "one of the parameters has an invalid value",
            Self::InvalidSequence => "item received out of sequence",
            Self::Denied => "not accepting any mission commands",
        };
        f.write_str(text)
    }
}
