//! Mission transfer layer.
//!
//! Provides the upload/download state machines, their retry policy, and the
//! state vocabulary shared with observers.

pub mod engine;
pub mod state;

pub use engine::{MessageChannel, TransferEngine};
pub use state::{Step, StepTimer, TimerId, TransferKind, TransferProgress, TransferState};
