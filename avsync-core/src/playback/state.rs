//! Session state machines
//!
//! Two explicit state objects replace loose flags:
//!
//! - [`PlayerState`]: lifecycle of the file (running, segment end, end of
//!   file, stopped, failed)
//! - [`SessionPhase`]: where playback stands after a start or seek
//!   (restarting, syncing audio, playing)
//!
//! Both carry their transition table; [`StateMachine::transition`] rejects
//! anything not in it.

use crate::error::{Error, Result};
use avsync_common::events::SessionState;
use serde::Serialize;
use tracing::debug;

/// Why a file stopped with an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PlaybackFailure {
    /// The audio device accepted nothing for longer than the stall timeout
    OutputStalled,
    /// An output reported a fatal error
    Output(String),
}

impl std::fmt::Display for PlaybackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackFailure::OutputStalled => write!(f, "output stalled"),
            PlaybackFailure::Output(reason) => write!(f, "output failed: {}", reason),
        }
    }
}

/// Lifecycle of a playback session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Running,
    /// A timeline part finished; reported for one tick before continuing
    AtEndOfSegment,
    EndOfFile,
    /// Stopped on request or by a stop condition
    Stopped,
    Error(PlaybackFailure),
}

impl PlayerState {
    /// No further ticks will do anything
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlayerState::EndOfFile | PlayerState::Stopped | PlayerState::Error(_)
        )
    }

    /// Event-level view of the state
    pub fn as_session_state(&self) -> SessionState {
        match self {
            PlayerState::Running => SessionState::Running,
            PlayerState::AtEndOfSegment => SessionState::AtEndOfSegment,
            PlayerState::EndOfFile => SessionState::EndOfFile,
            PlayerState::Stopped => SessionState::Stopped,
            PlayerState::Error(_) => SessionState::Error,
        }
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::Error(failure) => write!(f, "error ({})", failure),
            other => write!(f, "{}", other.as_session_state()),
        }
    }
}

/// Progress of playback after a start or seek
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Decoders were reset; waiting for the first frame to show
    Restarting,
    /// First video frame shown; audio start is being aligned to it
    SyncingAudio,
    Playing,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Restarting => write!(f, "restarting"),
            SessionPhase::SyncingAudio => write!(f, "syncing_audio"),
            SessionPhase::Playing => write!(f, "playing"),
        }
    }
}

/// A state enum with a first-class transition table
pub trait StateMachine: Clone + PartialEq + std::fmt::Display {
    fn can_transition_to(&self, next: &Self) -> bool;

    /// Move to `next`; staying in the same state is always allowed
    fn transition(&mut self, next: Self) -> Result<()> {
        if *self == next {
            return Ok(());
        }
        if !self.can_transition_to(&next) {
            return Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        debug!("State {} -> {}", self, next);
        *self = next;
        Ok(())
    }
}

impl StateMachine for PlayerState {
    fn can_transition_to(&self, next: &Self) -> bool {
        use PlayerState::*;
        match (self, next) {
            (Running, AtEndOfSegment | EndOfFile | Stopped | Error(_)) => true,
            (AtEndOfSegment, Running | EndOfFile | Stopped | Error(_)) => true,
            (EndOfFile, Stopped) => true,
            (Error(_), Stopped) => true,
            _ => false,
        }
    }
}

impl StateMachine for SessionPhase {
    fn can_transition_to(&self, next: &Self) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Restarting, SyncingAudio | Playing) | (SyncingAudio, Playing | Restarting) | (Playing, Restarting)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_state_table() {
        let mut state = PlayerState::Running;
        state.transition(PlayerState::AtEndOfSegment).unwrap();
        state.transition(PlayerState::Running).unwrap();
        state.transition(PlayerState::EndOfFile).unwrap();
        assert!(state.is_terminal());

        let err = state.transition(PlayerState::Running).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(state, PlayerState::EndOfFile);
    }

    #[test]
    fn test_error_state_only_stops() {
        let mut state = PlayerState::Error(PlaybackFailure::OutputStalled);
        assert!(!state.can_transition_to(&PlayerState::Running));
        state.transition(PlayerState::Stopped).unwrap();
    }

    #[test]
    fn test_phase_table() {
        let mut phase = SessionPhase::Restarting;
        assert!(phase.transition(SessionPhase::Restarting).is_ok());
        phase.transition(SessionPhase::SyncingAudio).unwrap();
        phase.transition(SessionPhase::Playing).unwrap();
        assert!(phase.transition(SessionPhase::SyncingAudio).is_err());
        phase.transition(SessionPhase::Restarting).unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PlayerState::AtEndOfSegment.to_string(), "at_end_of_segment");
        assert_eq!(
            PlayerState::Error(PlaybackFailure::OutputStalled).to_string(),
            "error (output stalled)"
        );
        assert_eq!(SessionPhase::SyncingAudio.to_string(), "syncing_audio");
    }
}
