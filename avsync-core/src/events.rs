//! Event plumbing for a playback session
//!
//! # Architecture
//!
//! - **EventBus** (tokio::broadcast): diagnostics published upward
//! - **Command channel** (tokio::mpsc): control requests into the runner
//!
//! This module re-exports the shared event types from avsync-common and
//! defines the session-scoped emitter and the internal command type.

use crate::playback::seek::SeekRequest;
use uuid::Uuid;

// ========================================
// Re-exports from avsync-common
// ========================================

pub use avsync_common::events::{EventBus, PlayerEvent, SessionState, StreamKind};

// ========================================
// Session-scoped emitter
// ========================================

/// Emits events stamped with one session's id
///
/// All emission is lossy: the core never depends on anyone listening.
#[derive(Clone)]
pub struct EventSink {
    bus: Option<EventBus>,
    session_id: Uuid,
}

impl EventSink {
    pub fn new(bus: EventBus, session_id: Uuid) -> Self {
        Self {
            bus: Some(bus),
            session_id,
        }
    }

    /// Sink that drops everything
    pub fn disabled() -> Self {
        Self {
            bus: None,
            session_id: Uuid::nil(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Build and emit an event; the closure receives the session id and timestamp
    pub fn emit_with<F>(&self, build: F)
    where
        F: FnOnce(Uuid, chrono::DateTime<chrono::Utc>) -> PlayerEvent,
    {
        if let Some(bus) = &self.bus {
            bus.emit_lossy(build(self.session_id, chrono::Utc::now()));
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("session_id", &self.session_id)
            .field("enabled", &self.bus.is_some())
            .finish()
    }
}

// ========================================
// Commands (runner input)
// ========================================

/// Direction of a single-frame step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Forward,
    Backward,
}

/// Control requests delivered to the runner over mpsc
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Seek(SeekRequest),
    /// Flush decoders and restart from the current position
    Reset,
    Pause,
    Resume,
    StepFrame(StepDirection),
    Stop,
}
