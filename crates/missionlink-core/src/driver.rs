//! Async driver owning a [`TransferEngine`] on a tokio task.
//!
//! The task is the engine's only writer. Commands from [`EngineHandle`],
//! inbound messages and step timer expiry are serialized through one
//! `select!` loop, so a timer can never race a response for the same step.

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::message::Message;
use crate::mission::MissionItemSet;
use crate::observer::TransferObserver;
use crate::transfer::{
    MessageChannel, Step, StepTimer, TransferEngine, TransferProgress, TransferState,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Capacity of the command queue
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    /// Transfer state
    pub state: TransferState,
    /// Committed mission
    pub mission: MissionItemSet,
    /// In-flight transfer, if any
    pub progress: Option<TransferProgress>,
}

impl EngineSnapshot {
    /// Check if the mission may be edited
    #[must_use]
    pub fn can_edit(&self) -> bool {
        self.state.can_edit()
    }
}

enum Command {
    BeginWrite {
        items: MissionItemSet,
        reply: oneshot::Sender<Result<()>>,
    },
    BeginRead {
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
}

/// Handle to an engine running on its own task
///
/// Completion and failure of transfers are reported to the observer given to
/// [`EngineHandle::spawn`]; the `begin_*` methods only report whether the
/// transfer started.
#[derive(Debug)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Spawn an engine task
    ///
    /// Outbound messages go to `channel`, vehicle messages are read from
    /// `inbound`. When `inbound` closes the link is considered lost and
    /// later transfers are refused.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidConfig` if `config` fails validation.
    /// No task is spawned in that case.
    pub fn spawn<C, O>(
        config: TransferConfig,
        channel: C,
        inbound: mpsc::Receiver<Message>,
        observer: O,
    ) -> Result<Self>
    where
        C: MessageChannel + 'static,
        O: TransferObserver + 'static,
    {
        let engine = TransferEngine::new(config, channel, observer)?;
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let task = tokio::spawn(run(engine, command_rx, inbound));
        Ok(Self { commands, task })
    }

    /// Start an upload
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidState` if a transfer is in flight,
    /// `TransferError::LinkLost` if the vehicle link has already closed, or
    /// `TransferError::Internal` if the engine task has stopped.
    pub async fn begin_write(&self, items: MissionItemSet) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::BeginWrite { items, reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Start a download
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidState` if a transfer is in flight,
    /// `TransferError::LinkLost` if the vehicle link has already closed, or
    /// `TransferError::Internal` if the engine task has stopped.
    pub async fn begin_read(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::BeginRead { reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Current engine state
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Internal` if the engine task has stopped.
    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    /// Stop the engine task and wait for it to exit
    ///
    /// An in-flight transfer is dropped without notification.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Internal` if the task panicked.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.commands);
        self.task
            .await
            .map_err(|_| TransferError::internal("engine task panicked"))
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| stopped())
    }
}

const fn stopped() -> TransferError {
    TransferError::internal("engine task stopped")
}

async fn run<C, O>(
    mut engine: TransferEngine<C, O>,
    mut commands: mpsc::Receiver<Command>,
    mut inbound: mpsc::Receiver<Message>,
) where
    C: MessageChannel,
    O: TransferObserver,
{
    let mut link_open = true;
    tracing::debug!("Engine task started");

    loop {
        let timer = engine.armed_timer();
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut engine, command, link_open),
                None => break,
            },
            message = inbound.recv(), if link_open => match message {
                Some(message) => engine.handle_message(message),
                None => {
                    tracing::warn!("Vehicle link closed");
                    link_open = false;
                    engine.link_lost();
                }
            },
            () = wait_for(timer) => {
                if let Some(timer) = timer {
                    engine.handle_timeout(timer.id);
                }
            }
        }
    }

    tracing::debug!("Engine task stopped");
}

fn handle_command<C, O>(engine: &mut TransferEngine<C, O>, command: Command, link_open: bool)
where
    C: MessageChannel,
    O: TransferObserver,
{
    match command {
        Command::BeginWrite { items, reply } => {
            let result = if link_open {
                engine.begin_write(items)
            } else {
                Err(link_down(Step::AnnounceCount))
            };
            let _ = reply.send(result);
        }
        Command::BeginRead { reply } => {
            let result = if link_open {
                engine.begin_read()
            } else {
                Err(link_down(Step::RequestList))
            };
            let _ = reply.send(result);
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(EngineSnapshot {
                state: engine.state(),
                mission: engine.mission_items().clone(),
                progress: engine.progress(),
            });
        }
    }
}

/// Refusal for a transfer whose first step could never be answered
fn link_down(step: Step) -> TransferError {
    tracing::warn!("Refusing transfer, vehicle link is closed");
    TransferError::LinkLost { step }
}

/// Resolve when `timer` expires; never if no timer is armed
async fn wait_for(timer: Option<StepTimer>) {
    match timer {
        Some(timer) => tokio::time::sleep_until(timer.deadline).await,
        None => std::future::pending().await,
    }
}
