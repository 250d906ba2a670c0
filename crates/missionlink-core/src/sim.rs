//! Simulated vehicle for tests, benchmarks and the CLI.
//!
//! [`SimVehicle`] answers the engine's messages the way a well-behaved
//! autopilot would, except where a [`FailureMode`] tells it to stay silent,
//! use the wrong index or reject the step. [`LinkModel`] adds seeded message
//! loss and latency between the two ends.
//!
//! Two harnesses connect an engine to a vehicle:
//!
//! - [`Loopback`]: synchronous, fires timers immediately when the link goes
//!   quiet. Deterministic and fast.
//! - [`spawn_vehicle`]: a tokio task that serves an [`EngineHandle`] over
//!   channels, for exercising the real driver.
//!
//! [`EngineHandle`]: crate::driver::EngineHandle

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::message::{Message, MissionResult};
use crate::mission::{MissionItem, MissionItemSet};
use crate::observer::{EventLog, TransferObserver};
use crate::transfer::TransferEngine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Misbehaviour the simulated vehicle can be told to exhibit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FailureMode {
    /// Answer everything correctly
    #[default]
    None,
    /// Ignore the item list request
    ReadRequestListNoResponse,
    /// Ignore the request for item 0
    ReadRequest0NoResponse,
    /// Ignore the request for item 1
    ReadRequest1NoResponse,
    /// Return item 1 when item 0 is requested
    ReadRequest0IncorrectSequence,
    /// Return item 0 when item 1 is requested
    ReadRequest1IncorrectSequence,
    /// Reject the request for item 0
    ReadRequest0ErrorAck,
    /// Reject the request for item 1
    ReadRequest1ErrorAck,
    /// Never request item 0
    WriteRequest0NoResponse,
    /// Never request item 1
    WriteRequest1NoResponse,
    /// Request item 1 first
    WriteRequest0IncorrectSequence,
    /// Request item 0 again instead of item 1
    WriteRequest1IncorrectSequence,
    /// Reject the count announcement instead of requesting item 0
    WriteRequest0ErrorAck,
    /// Reject item 0 instead of requesting item 1
    WriteRequest1ErrorAck,
    /// Never send the final acknowledgement
    WriteFinalAckNoResponse,
    /// Send a failing final acknowledgement
    WriteFinalAckErrorAck,
    /// Accept the mission after requesting only item 0
    WriteFinalAckMissingRequests,
}

impl FailureMode {
    /// Every failure mode, `None` first
    pub const ALL: [Self; 17] = [
        Self::None,
        Self::ReadRequestListNoResponse,
        Self::ReadRequest0NoResponse,
        Self::ReadRequest1NoResponse,
        Self::ReadRequest0IncorrectSequence,
        Self::ReadRequest1IncorrectSequence,
        Self::ReadRequest0ErrorAck,
        Self::ReadRequest1ErrorAck,
        Self::WriteRequest0NoResponse,
        Self::WriteRequest1NoResponse,
        Self::WriteRequest0IncorrectSequence,
        Self::WriteRequest1IncorrectSequence,
        Self::WriteRequest0ErrorAck,
        Self::WriteRequest1ErrorAck,
        Self::WriteFinalAckNoResponse,
        Self::WriteFinalAckErrorAck,
        Self::WriteFinalAckMissingRequests,
    ];

    /// Name used on the command line and in config files
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ReadRequestListNoResponse => "read-request-list-no-response",
            Self::ReadRequest0NoResponse => "read-request0-no-response",
            Self::ReadRequest1NoResponse => "read-request1-no-response",
            Self::ReadRequest0IncorrectSequence => "read-request0-incorrect-sequence",
            Self::ReadRequest1IncorrectSequence => "read-request1-incorrect-sequence",
            Self::ReadRequest0ErrorAck => "read-request0-error-ack",
            Self::ReadRequest1ErrorAck => "read-request1-error-ack",
            Self::WriteRequest0NoResponse => "write-request0-no-response",
            Self::WriteRequest1NoResponse => "write-request1-no-response",
            Self::WriteRequest0IncorrectSequence => "write-request0-incorrect-sequence",
            Self::WriteRequest1IncorrectSequence => "write-request1-incorrect-sequence",
            Self::WriteRequest0ErrorAck => "write-request0-error-ack",
            Self::WriteRequest1ErrorAck => "write-request1-error-ack",
            Self::WriteFinalAckNoResponse => "write-final-ack-no-response",
            Self::WriteFinalAckErrorAck => "write-final-ack-error-ack",
            Self::WriteFinalAckMissingRequests => "write-final-ack-missing-requests",
        }
    }

    /// Check if this mode affects uploads
    #[must_use]
    pub fn is_write(self) -> bool {
        self.name().starts_with("write-")
    }

    /// Check if this mode affects downloads
    #[must_use]
    pub fn is_read(self) -> bool {
        self.name().starts_with("read-")
    }

    /// Check if this mode only withholds a response
    ///
    /// These are the modes a retry can recover from.
    #[must_use]
    pub fn is_no_response(self) -> bool {
        matches!(
            self,
            Self::ReadRequestListNoResponse
                | Self::ReadRequest0NoResponse
                | Self::ReadRequest1NoResponse
                | Self::WriteRequest0NoResponse
                | Self::WriteRequest1NoResponse
                | Self::WriteFinalAckNoResponse
        )
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown failure mode name
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown failure mode '{0}'")]
pub struct ParseFailureModeError(String);

impl FromStr for FailureMode {
    type Err = ParseFailureModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseFailureModeError(s.to_string()))
    }
}

/// Upload the vehicle is receiving
#[derive(Debug)]
struct PendingWrite {
    count: u16,
    received: Vec<MissionItem>,
}

/// Vehicle end of the mission protocol
#[derive(Debug, Default)]
pub struct SimVehicle {
    mission: MissionItemSet,
    write: Option<PendingWrite>,
    failure_mode: FailureMode,
    fail_first_time_only: bool,
    received: Vec<Message>,
}

impl SimVehicle {
    /// Vehicle with no mission and no failure mode
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Vehicle that already stores `mission`
    #[must_use]
    pub fn with_mission(mission: MissionItemSet) -> Self {
        Self {
            mission,
            ..Self::default()
        }
    }

    /// Select a failure mode
    ///
    /// With `fail_first_time_only` the vehicle misbehaves once and then
    /// answers correctly.
    pub fn set_failure_mode(&mut self, mode: FailureMode, fail_first_time_only: bool) {
        self.failure_mode = mode;
        self.fail_first_time_only = fail_first_time_only;
    }

    /// Current failure mode
    #[must_use]
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Clear the failure mode and any upload in progress; keep the mission
    pub fn reset(&mut self) {
        self.failure_mode = FailureMode::None;
        self.fail_first_time_only = false;
        self.write = None;
    }

    /// Mission stored on the vehicle
    #[must_use]
    pub fn mission(&self) -> &MissionItemSet {
        &self.mission
    }

    /// Every message delivered to the vehicle, oldest first
    #[must_use]
    pub fn received(&self) -> &[Message] {
        &self.received
    }

    /// Number of delivered messages matching `predicate`
    pub fn count_received(&self, predicate: impl Fn(&Message) -> bool) -> usize {
        self.received.iter().filter(|message| predicate(message)).count()
    }

    /// Final acknowledgement sent outside any upload
    #[must_use]
    pub fn unexpected_final_ack(result: MissionResult) -> Message {
        Message::FinalAck { result }
    }

    /// Item sent outside any download
    #[must_use]
    pub fn unexpected_item() -> Message {
        Message::ItemPayload(MissionItem::new(0, Default::default()))
    }

    /// Item request sent outside any upload
    #[must_use]
    pub fn unexpected_request() -> Message {
        Message::RequestItem { seq: 0 }
    }

    /// Process one message from the engine and produce the reply, if any
    pub fn handle(&mut self, message: Message) -> Option<Message> {
        tracing::trace!("Vehicle received {:?}", message);
        self.received.push(message.clone());

        match message {
            Message::AnnounceCount { count } => {
                self.write = Some(PendingWrite {
                    count,
                    received: Vec::with_capacity(usize::from(count)),
                });
                self.next_write_response()
            }
            Message::ItemPayload(item) => self.on_item(item),
            Message::RequestList => {
                if self.trigger(FailureMode::ReadRequestListNoResponse) {
                    return None;
                }
                Some(Message::CountResponse {
                    count: self.mission.count(),
                })
            }
            Message::RequestItem { seq } => self.on_item_request(seq),
            other => {
                tracing::debug!("Vehicle ignoring {}", other.name());
                None
            }
        }
    }

    fn on_item(&mut self, item: MissionItem) -> Option<Message> {
        let Some(write) = self.write.as_mut() else {
            tracing::debug!("Vehicle ignoring item {} outside an upload", item.seq);
            return None;
        };
        let expected = write.received.len();

        match usize::from(item.seq) {
            seq if seq == expected && seq < usize::from(write.count) => {
                write.received.push(item);
                self.next_write_response()
            }
            // Resent after a lost reply: repeat what should follow it.
            seq if seq < expected => self.next_write_response(),
            _ => Some(Message::ErrorAck {
                reason: MissionResult::InvalidSequence,
            }),
        }
    }

    /// Reply that moves the current upload forward
    fn next_write_response(&mut self) -> Option<Message> {
        let (count, next) = {
            let write = self.write.as_ref()?;
            (write.count, write.received.len())
        };

        if next >= usize::from(count) {
            if self.trigger(FailureMode::WriteFinalAckNoResponse) {
                return None;
            }
            if self.trigger(FailureMode::WriteFinalAckErrorAck) {
                return Some(Message::FinalAck {
                    result: MissionResult::Error,
                });
            }
            self.commit_write();
            return Some(Message::FinalAck {
                result: MissionResult::Accepted,
            });
        }

        match next {
            0 => {
                if self.trigger(FailureMode::WriteRequest0NoResponse) {
                    return None;
                }
                if self.trigger(FailureMode::WriteRequest0IncorrectSequence) {
                    return Some(Message::RequestItem { seq: 1 });
                }
                if self.trigger(FailureMode::WriteRequest0ErrorAck) {
                    return Some(Message::ErrorAck {
                        reason: MissionResult::Error,
                    });
                }
            }
            1 => {
                if self.trigger(FailureMode::WriteRequest1NoResponse) {
                    return None;
                }
                if self.trigger(FailureMode::WriteRequest1IncorrectSequence) {
                    return Some(Message::RequestItem { seq: 0 });
                }
                if self.trigger(FailureMode::WriteRequest1ErrorAck) {
                    return Some(Message::ErrorAck {
                        reason: MissionResult::Error,
                    });
                }
                if self.trigger(FailureMode::WriteFinalAckMissingRequests) {
                    return Some(Message::FinalAck {
                        result: MissionResult::Accepted,
                    });
                }
            }
            _ => {}
        }

        u16::try_from(next)
            .ok()
            .map(|seq| Message::RequestItem { seq })
    }

    fn commit_write(&mut self) {
        let Some(write) = self.write.as_ref() else {
            return;
        };
        match MissionItemSet::from_items(write.received.clone()) {
            Ok(mission) => {
                tracing::debug!("Vehicle stored {} items", mission.count());
                self.mission = mission;
            }
            Err(error) => tracing::warn!("Vehicle discarded upload: {}", error),
        }
    }

    fn on_item_request(&mut self, seq: u16) -> Option<Message> {
        let (no_response, incorrect, error_ack, wrong_seq) = match seq {
            0 => (
                FailureMode::ReadRequest0NoResponse,
                FailureMode::ReadRequest0IncorrectSequence,
                FailureMode::ReadRequest0ErrorAck,
                1,
            ),
            1 => (
                FailureMode::ReadRequest1NoResponse,
                FailureMode::ReadRequest1IncorrectSequence,
                FailureMode::ReadRequest1ErrorAck,
                0,
            ),
            _ => (
                FailureMode::None,
                FailureMode::None,
                FailureMode::None,
                seq,
            ),
        };

        let Some(item) = self.mission.get(seq).copied() else {
            return Some(Message::ErrorAck {
                reason: MissionResult::InvalidSequence,
            });
        };
        if self.trigger(no_response) {
            return None;
        }
        if self.trigger(incorrect) {
            return Some(Message::ItemPayload(MissionItem::new(wrong_seq, item.payload)));
        }
        if self.trigger(error_ack) {
            return Some(Message::ErrorAck {
                reason: MissionResult::Error,
            });
        }
        Some(Message::ItemPayload(item))
    }

    /// Check if `mode` is active, consuming it in fail-once mode
    fn trigger(&mut self, mode: FailureMode) -> bool {
        if mode == FailureMode::None || self.failure_mode != mode {
            return false;
        }
        tracing::debug!("Vehicle injecting failure: {}", mode);
        if self.fail_first_time_only {
            self.failure_mode = FailureMode::None;
        }
        true
    }
}

/// Message loss and latency between engine and vehicle
#[derive(Debug, Clone)]
pub struct LinkModel {
    loss: f64,
    latency: Duration,
    rng: StdRng,
}

impl Default for LinkModel {
    fn default() -> Self {
        Self::perfect()
    }
}

impl LinkModel {
    /// Lossless link with no latency
    #[must_use]
    pub fn perfect() -> Self {
        Self::lossy(0.0, 0)
    }

    /// Link dropping each message with probability `loss`
    ///
    /// `loss` is clamped to `0.0..=1.0`; NaN means no loss. The same seed
    /// always drops the same messages.
    #[must_use]
    pub fn lossy(loss: f64, seed: u64) -> Self {
        let loss = if loss.is_nan() { 0.0 } else { loss.clamp(0.0, 1.0) };
        Self {
            loss,
            latency: Duration::ZERO,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Set one-way latency (async harness only)
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Loss probability
    #[must_use]
    pub fn loss(&self) -> f64 {
        self.loss
    }

    /// One-way latency
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Decide whether the next message gets through
    pub fn deliver(&mut self) -> bool {
        self.loss == 0.0 || !self.rng.gen_bool(self.loss)
    }
}

/// Engine and vehicle wired back to back in one thread
pub struct Loopback<O = EventLog> {
    /// Engine under test
    pub engine: TransferEngine<VecDeque<Message>, O>,
    /// Simulated vehicle
    pub vehicle: SimVehicle,
    /// Link between them
    pub link: LinkModel,
}

impl Loopback<EventLog> {
    /// Loopback recording notifications in an [`EventLog`]
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidConfig` if `config` fails validation.
    pub fn new(config: TransferConfig, vehicle: SimVehicle) -> Result<Self, TransferError> {
        Self::with_observer(config, vehicle, EventLog::new())
    }
}

impl<O: TransferObserver> Loopback<O> {
    /// Loopback with a custom observer
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidConfig` if `config` fails validation.
    pub fn with_observer(
        config: TransferConfig,
        vehicle: SimVehicle,
        observer: O,
    ) -> Result<Self, TransferError> {
        Ok(Self {
            engine: TransferEngine::new(config, VecDeque::new(), observer)?,
            vehicle,
            link: LinkModel::perfect(),
        })
    }

    /// Replace the link model
    #[must_use]
    pub fn with_link(mut self, link: LinkModel) -> Self {
        self.link = link;
        self
    }

    /// Exchange messages until the engine is idle
    ///
    /// Whenever no message is in transit the armed timer fires at once.
    /// Returns the number of timeouts fired.
    pub fn run(&mut self) -> usize {
        let mut timeouts = 0;
        loop {
            while let Some(message) = self.engine.channel_mut().pop_front() {
                if !self.link.deliver() {
                    tracing::trace!("Link dropped {}", message.name());
                    continue;
                }
                let Some(reply) = self.vehicle.handle(message) else {
                    continue;
                };
                if self.link.deliver() {
                    self.engine.handle_message(reply);
                } else {
                    tracing::trace!("Link dropped {}", reply.name());
                }
            }

            if !self.engine.state().in_progress() {
                return timeouts;
            }
            let Some(timer) = self.engine.armed_timer() else {
                return timeouts;
            };
            timeouts += 1;
            self.engine.handle_timeout(timer.id);
        }
    }
}

/// Serve `vehicle` on a tokio task
///
/// Reads engine messages from `from_engine` and sends replies to
/// `to_engine`. The task ends, returning the vehicle, when either channel
/// closes.
pub fn spawn_vehicle(
    mut vehicle: SimVehicle,
    mut link: LinkModel,
    mut from_engine: mpsc::UnboundedReceiver<Message>,
    to_engine: mpsc::Sender<Message>,
) -> JoinHandle<SimVehicle> {
    tokio::spawn(async move {
        while let Some(message) = from_engine.recv().await {
            if !link.deliver() {
                tracing::trace!("Link dropped {}", message.name());
                continue;
            }
            if !link.latency().is_zero() {
                tokio::time::sleep(link.latency()).await;
            }
            let Some(reply) = vehicle.handle(message) else {
                continue;
            };
            if !link.deliver() {
                tracing::trace!("Link dropped {}", reply.name());
                continue;
            }
            if to_engine.send(reply).await.is_err() {
                tracing::debug!("Engine side of link closed");
                break;
            }
        }
        vehicle
    })
}
