//! Async driver for a [`PlaybackSession`]
//!
//! **Architecture:** one tokio task per session. Each loop iteration runs a
//! single tick, then waits for whichever comes first:
//! - the sleep the tick asked for
//! - a demuxer wakeup (data arrived for a waiting stream)
//! - a control command on the mpsc channel
//!
//! The task ends when the session reaches a terminal state and returns the
//! final [`PlaybackStats`].

use super::seek::SeekRequest;
use super::session::{PlaybackSession, PlaybackStats};
use crate::error::{Error, Result};
use crate::events::{SessionCommand, StepDirection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, trace};

/// Command queue depth per session
pub const COMMAND_CHANNEL_CAPACITY: usize = 32;

fn sleep_duration(seconds: f64, max: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds.min(max))
    } else {
        Duration::ZERO
    }
}

/// Tick `session` until it reaches a terminal state
///
/// Closing the command channel does not stop playback; send
/// [`SessionCommand::Stop`] for that.
pub async fn run(
    mut session: PlaybackSession,
    mut commands: mpsc::Receiver<SessionCommand>,
) -> Result<PlaybackStats> {
    info!("Session runner started");
    let wakeup = session.wakeup_handle();
    let max_sleep = session.options().wakeup_period;
    let mut commands_open = true;

    loop {
        let sleep = session.tick()?;
        if session.state().is_terminal() {
            break;
        }
        trace!("Sleeping {:.3}s", sleep);

        tokio::select! {
            _ = tokio::time::sleep(sleep_duration(sleep, max_sleep)) => {}
            _ = wakeup.notified() => {
                trace!("Woken up by demuxer");
            }
            command = commands.recv(), if commands_open => match command {
                Some(command) => {
                    debug!("Session command: {:?}", command);
                    session.handle_command(command)?;
                }
                None => {
                    debug!("Command channel closed; playing on");
                    commands_open = false;
                }
            },
        }
    }

    let stats = session.stats();
    info!(
        "Session runner finished: {} ({} frames shown, {} dropped)",
        stats.state, stats.shown_frames, stats.dropped_frames
    );
    Ok(stats)
}

/// Control handle of a session running on its own task
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<Result<PlaybackStats>>,
}

impl SessionHandle {
    /// Move `session` onto a new tokio task
    pub fn spawn(session: PlaybackSession) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let task = tokio::spawn(run(session, rx));
        Self { commands, task }
    }

    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::InvalidState("session runner has exited".to_string()))
    }

    pub async fn seek(&self, request: SeekRequest) -> Result<()> {
        self.send(SessionCommand::Seek(request)).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(SessionCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(SessionCommand::Resume).await
    }

    pub async fn step(&self, direction: StepDirection) -> Result<()> {
        self.send(SessionCommand::StepFrame(direction)).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(SessionCommand::Stop).await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end
    ///
    /// Cancel-safe; must not be awaited again once it has returned.
    pub async fn join(&mut self) -> Result<PlaybackStats> {
        (&mut self.task)
            .await
            .map_err(|e| Error::InvalidState(format!("session task failed: {}", e)))?
    }
}
