//! Transfer notifications.
//!
//! The engine calls its observer synchronously while handling the event that
//! caused the notification. Observers that may block should use
//! [`ChannelObserver`] and consume [`TransferEvent`]s on their own task.

use crate::error::{ErrorCode, TransferError};
use crate::transfer::{TransferKind, TransferState};
use tokio::sync::mpsc;

/// Receives state, progress, completion and error notifications
pub trait TransferObserver: Send {
    /// The engine moved between `Idle` and an in-progress state
    fn on_state_changed(&mut self, old: TransferState, new: TransferState);

    /// Another item was sent (write) or received (read)
    fn on_progress(&mut self, _kind: TransferKind, _done: u16, _total: u16) {}

    /// The transfer finished and its items are now the committed mission
    fn on_complete(&mut self, kind: TransferKind, item_count: u16);

    /// The transfer was aborted
    fn on_error(&mut self, kind: TransferKind, error: &TransferError);
}

/// Owned form of an observer notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// See [`TransferObserver::on_state_changed`]
    StateChanged {
        /// Previous state
        old: TransferState,
        /// New state
        new: TransferState,
    },
    /// See [`TransferObserver::on_progress`]
    Progress {
        /// Transfer direction
        kind: TransferKind,
        /// Items done so far
        done: u16,
        /// Items in the transfer
        total: u16,
    },
    /// See [`TransferObserver::on_complete`]
    Completed {
        /// Transfer direction
        kind: TransferKind,
        /// Items in the committed mission
        item_count: u16,
    },
    /// See [`TransferObserver::on_error`]
    Failed {
        /// Transfer direction
        kind: TransferKind,
        /// Error classification
        code: ErrorCode,
        /// Human-readable description
        detail: String,
        /// Whether starting the transfer again may succeed
        transient: bool,
    },
}

impl TransferEvent {
    /// Check if this event ends a transfer
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Forwards every notification as a [`TransferEvent`] over a tokio channel
///
/// The channel is unbounded so the engine never waits on a slow consumer and
/// no event is dropped while the receiver is alive.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiver for its events
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: TransferEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Transfer event receiver dropped");
        }
    }
}

impl TransferObserver for ChannelObserver {
    fn on_state_changed(&mut self, old: TransferState, new: TransferState) {
        self.forward(TransferEvent::StateChanged { old, new });
    }

    fn on_progress(&mut self, kind: TransferKind, done: u16, total: u16) {
        self.forward(TransferEvent::Progress { kind, done, total });
    }

    fn on_complete(&mut self, kind: TransferKind, item_count: u16) {
        self.forward(TransferEvent::Completed { kind, item_count });
    }

    fn on_error(&mut self, kind: TransferKind, error: &TransferError) {
        self.forward(TransferEvent::Failed {
            kind,
            code: error.code(),
            detail: error.to_string(),
            transient: error.is_transient(),
        });
    }
}

/// Records notifications in memory
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<TransferEvent>,
}

impl EventLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first
    #[must_use]
    pub fn events(&self) -> &[TransferEvent] {
        &self.events
    }

    /// Remove and return all recorded events
    pub fn take(&mut self) -> Vec<TransferEvent> {
        std::mem::take(&mut self.events)
    }

    /// Number of completion notifications
    #[must_use]
    pub fn completions(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, TransferEvent::Completed { .. }))
            .count()
    }

    /// Error codes reported, in order
    #[must_use]
    pub fn errors(&self) -> Vec<ErrorCode> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TransferEvent::Failed { code, .. } => Some(*code),
                _ => None,
            })
            .collect()
    }

    /// State changes reported, in order
    #[must_use]
    pub fn state_changes(&self) -> Vec<(TransferState, TransferState)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TransferEvent::StateChanged { old, new } => Some((*old, *new)),
                _ => None,
            })
            .collect()
    }
}

impl TransferObserver for EventLog {
    fn on_state_changed(&mut self, old: TransferState, new: TransferState) {
        self.events.push(TransferEvent::StateChanged { old, new });
    }

    fn on_progress(&mut self, kind: TransferKind, done: u16, total: u16) {
        self.events.push(TransferEvent::Progress { kind, done, total });
    }

    fn on_complete(&mut self, kind: TransferKind, item_count: u16) {
        self.events.push(TransferEvent::Completed { kind, item_count });
    }

    fn on_error(&mut self, kind: TransferKind, error: &TransferError) {
        self.events.push(TransferEvent::Failed {
            kind,
            code: error.code(),
            detail: error.to_string(),
            transient: error.is_transient(),
        });
    }
}
