//! # MissionLink Core
//!
//! Reliable transfer of mission item lists between a ground controller and a
//! vehicle over a lossy request/response link.
//!
//! This crate provides:
//! - Upload (write) and download (read) state machines
//! - Per-step timeout and retry policy
//! - Error classification and observer notifications
//! - A tokio driver that serializes messages, timers and commands
//! - A simulated vehicle with injectable failures
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  begin_write / begin_read   ┌──────────────────────┐
//! │ EngineHandle │ ──────────────────────────▶ │    engine task       │
//! └──────────────┘                             │  ┌────────────────┐  │
//!                                              │  │ TransferEngine │  │
//! ┌──────────────┐   state / progress / done   │  └───────┬────────┘  │
//! │   Observer   │ ◀────────────────────────── │     step timer       │
//! └──────────────┘                             └──────────┬───────────┘
//!                                                         │ Message
//!                                              ┌──────────▼───────────┐
//!                                              │  MessageChannel ⇄    │
//!                                              │  vehicle (peer)      │
//!                                              └──────────────────────┘
//! ```
//!
//! At most one transfer is in flight per engine. A failed transfer leaves
//! the committed mission untouched.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod driver;
pub mod error;
pub mod message;
pub mod mission;
pub mod observer;
pub mod sim;
pub mod transfer;

pub use config::{DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_RETRIES, TransferConfig};
pub use driver::{EngineHandle, EngineSnapshot};
pub use error::{ErrorCode, LinkError, MissionError, Result, TransferError};
pub use message::{Message, MissionResult};
pub use mission::{ItemPayload, MissionItem, MissionItemSet};
pub use observer::{ChannelObserver, EventLog, TransferEvent, TransferObserver};
pub use sim::{FailureMode, LinkModel, Loopback, SimVehicle};
pub use transfer::{
    MessageChannel, Step, StepTimer, TimerId, TransferEngine, TransferKind, TransferProgress,
    TransferState,
};
