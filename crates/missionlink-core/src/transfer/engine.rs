//! Mission transfer engine.
//!
//! The engine is a synchronous state machine. It is driven by three inputs,
//! each taking `&mut self` so there is exactly one writer of transfer state:
//!
//! - [`TransferEngine::handle_message`] for messages from the vehicle,
//! - [`TransferEngine::handle_timeout`] when the armed [`StepTimer`] expires,
//! - [`TransferEngine::link_lost`] when the transport goes away.
//!
//! The engine never sleeps. Whoever drives it (the tokio task in
//! [`crate::driver`], or a test loop) waits on [`TransferEngine::armed_timer`]
//! and reports expiry back with the timer's id.
//!
//! # Retry policy
//!
//! Every outbound message that expects a reply starts a step with its own
//! attempt counter. When the step times out it is resent unchanged until it
//! has been sent `max_retries + 1` times; the next timeout aborts the
//! transfer with `AckTimeoutError`. Only the current step is ever resent.

use crate::config::TransferConfig;
use crate::error::{LinkError, Result, TransferError};
use crate::message::Message;
use crate::mission::{MissionItem, MissionItemSet};
use crate::observer::TransferObserver;
use crate::transfer::state::{
    Step, StepTimer, TimerId, TransferKind, TransferProgress, TransferState,
};
use std::borrow::Cow;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Outbound half of the link to the vehicle
pub trait MessageChannel: Send {
    /// Queue a message for delivery
    ///
    /// # Errors
    ///
    /// Returns a `LinkError` if the link can no longer carry messages. The
    /// engine treats this as loss of the link.
    fn send(&mut self, message: Message) -> std::result::Result<(), LinkError>;
}

impl MessageChannel for VecDeque<Message> {
    fn send(&mut self, message: Message) -> std::result::Result<(), LinkError> {
        self.push_back(message);
        Ok(())
    }
}

impl MessageChannel for mpsc::UnboundedSender<Message> {
    fn send(&mut self, message: Message) -> std::result::Result<(), LinkError> {
        mpsc::UnboundedSender::send(self, message).map_err(|_| LinkError::Closed)
    }
}

/// Upload bookkeeping
#[derive(Debug)]
struct WriteTransfer {
    items: MissionItemSet,
    /// Highest index sent so far + 1
    next_seq: u16,
}

/// Download bookkeeping
#[derive(Debug)]
enum ReadTransfer {
    AwaitingCount,
    Items {
        count: u16,
        received: Vec<MissionItem>,
    },
}

#[derive(Debug)]
enum Transfer {
    Idle,
    Write(WriteTransfer),
    Read(ReadTransfer),
}

impl Transfer {
    fn kind(&self) -> Option<TransferKind> {
        match self {
            Self::Idle => None,
            Self::Write(_) => Some(TransferKind::Write),
            Self::Read(_) => Some(TransferKind::Read),
        }
    }
}

/// The step waiting for a response, with the message to resend and its timer
#[derive(Debug)]
struct ActiveStep {
    step: Step,
    message: Message,
    attempts: u32,
    timer: StepTimer,
}

/// What a message handler decided
enum Outcome {
    Continue(Transfer),
    Complete(TransferKind, MissionItemSet),
    Abort(TransferKind, TransferError),
}

/// Mission item transfer engine for one vehicle link
pub struct TransferEngine<C, O> {
    config: TransferConfig,
    channel: C,
    observer: O,
    transfer: Transfer,
    active: Option<ActiveStep>,
    mission: MissionItemSet,
    next_timer_id: u64,
}

impl<C: MessageChannel, O: TransferObserver> TransferEngine<C, O> {
    /// Create an idle engine with an empty committed mission
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidConfig` if `config` fails validation.
    pub fn new(config: TransferConfig, channel: C, observer: O) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            channel,
            observer,
            transfer: Transfer::Idle,
            active: None,
            mission: MissionItemSet::new(),
            next_timer_id: 0,
        })
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.transfer
            .kind()
            .map_or(TransferState::Idle, TransferKind::state)
    }

    /// Check if the committed mission may be edited
    #[must_use]
    pub fn can_edit(&self) -> bool {
        self.state().can_edit()
    }

    /// The committed mission (last successful transfer)
    #[must_use]
    pub fn mission_items(&self) -> &MissionItemSet {
        &self.mission
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Outbound channel
    #[must_use]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Mutable outbound channel
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Observer
    #[must_use]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutable observer
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Timer of the step currently waiting for a response
    #[must_use]
    pub fn armed_timer(&self) -> Option<StepTimer> {
        self.active.as_ref().map(|active| active.timer)
    }

    /// Snapshot of the in-flight transfer
    #[must_use]
    pub fn progress(&self) -> Option<TransferProgress> {
        let active = self.active.as_ref()?;
        let (kind, done, total) = match &self.transfer {
            Transfer::Idle => return None,
            Transfer::Write(write) => (
                TransferKind::Write,
                write.next_seq,
                Some(write.items.count()),
            ),
            Transfer::Read(ReadTransfer::AwaitingCount) => (TransferKind::Read, 0, None),
            Transfer::Read(ReadTransfer::Items { count, received }) => {
                (TransferKind::Read, seq_of(received.len()), Some(*count))
            }
        };
        Some(TransferProgress {
            kind,
            step: active.step,
            attempts: active.attempts,
            done,
            total,
            deadline: active.timer.deadline,
        })
    }

    /// Start uploading `items` to the vehicle
    ///
    /// The observer sees the state change before this returns. Completion and
    /// failure are reported to the observer only.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidState` if a transfer is already in
    /// flight. Nothing changes and the observer is not notified.
    pub fn begin_write(&mut self, items: MissionItemSet) -> Result<()> {
        self.ensure_idle()?;

        let count = items.count();
        tracing::info!("Starting mission write of {} items", count);

        self.enter(Transfer::Write(WriteTransfer { items, next_seq: 0 }));
        if let Err(error) = self.start_step(Step::AnnounceCount, Message::AnnounceCount { count })
        {
            self.fail(TransferKind::Write, error);
        }
        Ok(())
    }

    /// Start downloading the vehicle's mission
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidState` if a transfer is already in
    /// flight.
    pub fn begin_read(&mut self) -> Result<()> {
        self.ensure_idle()?;

        tracing::info!("Starting mission read");

        self.enter(Transfer::Read(ReadTransfer::AwaitingCount));
        if let Err(error) = self.start_step(Step::RequestList, Message::RequestList) {
            self.fail(TransferKind::Read, error);
        }
        Ok(())
    }

    /// Process a message from the vehicle
    pub fn handle_message(&mut self, message: Message) {
        tracing::trace!("Received {:?}", message);

        let transfer = std::mem::replace(&mut self.transfer, Transfer::Idle);
        let outcome = match transfer {
            Transfer::Idle => {
                tracing::debug!("Ignoring unexpected {} while idle", message.name());
                return;
            }
            Transfer::Write(write) => self.on_write_message(write, message),
            Transfer::Read(read) => self.on_read_message(read, message),
        };
        self.apply(outcome);
    }

    /// Process expiry of the timer identified by `id`
    ///
    /// Ignored unless `id` belongs to the currently armed timer.
    pub fn handle_timeout(&mut self, id: TimerId) {
        let mut active = match self.active.take() {
            Some(active) if active.timer.id == id => active,
            other => {
                tracing::trace!("Ignoring stale timer {:?}", id);
                self.active = other;
                return;
            }
        };
        let Some(kind) = self.transfer.kind() else {
            return;
        };

        if active.attempts >= self.config.max_attempts() {
            self.fail(
                kind,
                TransferError::AckTimeout {
                    step: active.step,
                    attempts: active.attempts,
                },
            );
            return;
        }

        tracing::warn!(
            "No response to {}, resending (attempt {} of {})",
            active.step,
            active.attempts + 1,
            self.config.max_attempts()
        );
        if self.channel.send(active.message.clone()).is_err() {
            self.fail(kind, TransferError::LinkLost { step: active.step });
            return;
        }
        active.attempts += 1;
        active.timer = self.arm_timer();
        self.active = Some(active);
    }

    /// The transport to the vehicle went away
    ///
    /// Aborts an in-flight transfer as a timeout of its current step.
    pub fn link_lost(&mut self) {
        let Some(kind) = self.transfer.kind() else {
            tracing::debug!("Link lost while idle");
            return;
        };
        let error = match self.active.take() {
            Some(active) => TransferError::LinkLost { step: active.step },
            None => TransferError::internal("transfer in flight without an active step"),
        };
        self.fail(kind, error);
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state() {
            TransferState::Idle => Ok(()),
            state => {
                tracing::warn!("Rejecting transfer request: {} in progress", state);
                Err(TransferError::InvalidState(state))
            }
        }
    }

    fn enter(&mut self, transfer: Transfer) {
        let old = self.state();
        self.transfer = transfer;
        let new = self.state();
        tracing::debug!("Transfer state transition: {:?} -> {:?}", old, new);
        self.observer.on_state_changed(old, new);
    }

    fn on_write_message(&mut self, mut write: WriteTransfer, message: Message) -> Outcome {
        let kind = TransferKind::Write;
        let count = write.items.count();

        match message {
            Message::RequestItem { seq } => {
                if seq != write.next_seq || seq >= count {
                    return Outcome::Abort(
                        kind,
                        TransferError::ItemMismatch {
                            kind,
                            expected: write.next_seq,
                            received: seq,
                        },
                    );
                }
                let Some(item) = write.items.get(seq).copied() else {
                    return Outcome::Abort(kind, TransferError::internal("requested item missing"));
                };

                tracing::debug!("Vehicle requested item {} of {}", seq, count);
                write.next_seq = seq + 1;
                self.observer.on_progress(kind, write.next_seq, count);

                match self.start_step(Step::SendItem(seq), Message::ItemPayload(item)) {
                    Ok(()) => Outcome::Continue(Transfer::Write(write)),
                    Err(error) => Outcome::Abort(kind, error),
                }
            }
            Message::FinalAck { result } if !result.is_accepted() => {
                Outcome::Abort(kind, TransferError::Vehicle { kind, result })
            }
            Message::FinalAck { .. } if write.next_seq < count => Outcome::Abort(
                kind,
                TransferError::MissingRequests {
                    requested: write.next_seq,
                    expected: count,
                },
            ),
            Message::FinalAck { .. } => Outcome::Complete(kind, write.items),
            Message::ErrorAck { reason } => Outcome::Abort(
                kind,
                TransferError::Vehicle {
                    kind,
                    result: reason,
                },
            ),
            other => {
                tracing::debug!("Ignoring unexpected {} during write", other.name());
                Outcome::Continue(Transfer::Write(write))
            }
        }
    }

    fn on_read_message(&mut self, read: ReadTransfer, message: Message) -> Outcome {
        let kind = TransferKind::Read;

        match (read, message) {
            (ReadTransfer::AwaitingCount, Message::CountResponse { count }) => {
                tracing::debug!("Vehicle reports {} items", count);
                self.request_next_item(count, Vec::with_capacity(usize::from(count)))
            }
            (ReadTransfer::Items { count, mut received }, Message::ItemPayload(item)) => {
                let expected = seq_of(received.len());
                if item.seq != expected {
                    return Outcome::Abort(
                        kind,
                        TransferError::ItemMismatch {
                            kind,
                            expected,
                            received: item.seq,
                        },
                    );
                }
                received.push(item);
                self.observer.on_progress(kind, seq_of(received.len()), count);
                self.request_next_item(count, received)
            }
            (_, Message::ErrorAck { reason }) => Outcome::Abort(
                kind,
                TransferError::Vehicle {
                    kind,
                    result: reason,
                },
            ),
            (read, other) => {
                tracing::debug!("Ignoring unexpected {} during read", other.name());
                Outcome::Continue(Transfer::Read(read))
            }
        }
    }

    fn request_next_item(&mut self, count: u16, received: Vec<MissionItem>) -> Outcome {
        let kind = TransferKind::Read;

        if received.len() >= usize::from(count) {
            return match MissionItemSet::from_items(received) {
                Ok(items) => Outcome::Complete(kind, items),
                Err(error) => Outcome::Abort(kind, TransferError::Internal(Cow::Owned(error.to_string()))),
            };
        }

        let seq = seq_of(received.len());
        match self.start_step(Step::RequestItem(seq), Message::RequestItem { seq }) {
            Ok(()) => Outcome::Continue(Transfer::Read(ReadTransfer::Items { count, received })),
            Err(error) => Outcome::Abort(kind, error),
        }
    }

    fn apply(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Continue(transfer) => self.transfer = transfer,
            Outcome::Complete(kind, items) => self.complete(kind, items),
            Outcome::Abort(kind, error) => self.fail(kind, error),
        }
    }

    /// Send the first attempt of a new step, replacing any armed timer
    fn start_step(&mut self, step: Step, message: Message) -> Result<()> {
        self.active = None;
        tracing::trace!("Sending {:?} for {}", message, step);
        if let Err(error) = self.channel.send(message.clone()) {
            tracing::warn!("Failed to send {}: {}", message.name(), error);
            return Err(TransferError::LinkLost { step });
        }
        let timer = self.arm_timer();
        self.active = Some(ActiveStep {
            step,
            message,
            attempts: 1,
            timer,
        });
        Ok(())
    }

    fn arm_timer(&mut self) -> StepTimer {
        self.next_timer_id += 1;
        StepTimer {
            id: TimerId(self.next_timer_id),
            deadline: Instant::now() + self.config.ack_timeout,
        }
    }

    fn complete(&mut self, kind: TransferKind, items: MissionItemSet) {
        self.active = None;
        self.transfer = Transfer::Idle;
        let count = items.count();
        self.mission = items;

        tracing::info!("Mission {} complete: {} items", kind, count);
        self.observer.on_state_changed(kind.state(), TransferState::Idle);
        self.observer.on_complete(kind, count);
    }

    fn fail(&mut self, kind: TransferKind, error: TransferError) {
        self.active = None;
        self.transfer = Transfer::Idle;

        tracing::warn!("Mission {} aborted ({}): {}", kind, error.code(), error);
        self.observer.on_state_changed(kind.state(), TransferState::Idle);
        self.observer.on_error(kind, &error);
    }
}

/// Index of the item at position `len` of a transfer
///
/// Transfers never exceed `u16::MAX` items, so positions always fit.
#[allow(clippy::cast_possible_truncation)]
fn seq_of(len: usize) -> u16 {
    len as u16
}
