//! Event system shared by the decode-and-sync core and its hosts
//!
//! Events are diagnostics published upward: the core never waits on a
//! subscriber and never reads events back. Every event carries the
//! session it belongs to and a wall-clock timestamp.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

type Timestamp = chrono::DateTime<chrono::Utc>;

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// Coarse session state as seen from outside the core
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    AtEndOfSegment,
    EndOfFile,
    Stopped,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Running => write!(f, "running"),
            SessionState::AtEndOfSegment => write!(f, "at_end_of_segment"),
            SessionState::EndOfFile => write!(f, "end_of_file"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

/// Events published by a playback session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// A decoder driver was initialized for a stream
    DecoderSelected {
        session_id: Uuid,
        stream: StreamKind,
        codec: String,
        /// Driver family ("symphonia", "passthrough", ...)
        family: String,
        decoder: String,
        timestamp: Timestamp,
    },

    /// Every candidate failed; the stream plays silent/blank
    DecoderUnavailable {
        session_id: Uuid,
        stream: StreamKind,
        codec: String,
        timestamp: Timestamp,
    },

    /// A seek was handed to the demuxer
    SeekStarted {
        session_id: Uuid,
        /// Absolute demuxer target in seconds
        target: f64,
        exact: bool,
        timestamp: Timestamp,
    },

    /// A seek could not be performed; playback continues where it was
    SeekFailed {
        session_id: Uuid,
        reason: String,
        timestamp: Timestamp,
    },

    /// First frame after a seek or start has been presented
    PlaybackRestarted {
        session_id: Uuid,
        pts: Option<f64>,
        timestamp: Timestamp,
    },

    /// The active timeline part finished
    SegmentEnded {
        session_id: Uuid,
        part_index: usize,
        timestamp: Timestamp,
    },

    /// Video frames were dropped to catch up with audio
    FramesDropped {
        session_id: Uuid,
        /// Total dropped so far in this session
        total: u64,
        timestamp: Timestamp,
    },

    /// Audio and video drifted apart while frames were being dropped
    AvDesync {
        session_id: Uuid,
        av_difference: f64,
        dropped_frames: u64,
        timestamp: Timestamp,
    },

    /// Step-backward could not find the previous frame
    BackstepFailed {
        session_id: Uuid,
        timestamp: Timestamp,
    },

    /// Session state transition
    StateChanged {
        session_id: Uuid,
        old_state: SessionState,
        new_state: SessionState,
        timestamp: Timestamp,
    },

    /// Fatal error for this file (the process keeps running)
    PlaybackFailed {
        session_id: Uuid,
        reason: String,
        timestamp: Timestamp,
    },
}

impl PlayerEvent {
    /// Session this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            PlayerEvent::DecoderSelected { session_id, .. }
            | PlayerEvent::DecoderUnavailable { session_id, .. }
            | PlayerEvent::SeekStarted { session_id, .. }
            | PlayerEvent::SeekFailed { session_id, .. }
            | PlayerEvent::PlaybackRestarted { session_id, .. }
            | PlayerEvent::SegmentEnded { session_id, .. }
            | PlayerEvent::FramesDropped { session_id, .. }
            | PlayerEvent::AvDesync { session_id, .. }
            | PlayerEvent::BackstepFailed { session_id, .. }
            | PlayerEvent::StateChanged { session_id, .. }
            | PlayerEvent::PlaybackFailed { session_id, .. } => *session_id,
        }
    }

    /// Event type name as it appears in the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::DecoderSelected { .. } => "DecoderSelected",
            PlayerEvent::DecoderUnavailable { .. } => "DecoderUnavailable",
            PlayerEvent::SeekStarted { .. } => "SeekStarted",
            PlayerEvent::SeekFailed { .. } => "SeekFailed",
            PlayerEvent::PlaybackRestarted { .. } => "PlaybackRestarted",
            PlayerEvent::SegmentEnded { .. } => "SegmentEnded",
            PlayerEvent::FramesDropped { .. } => "FramesDropped",
            PlayerEvent::AvDesync { .. } => "AvDesync",
            PlayerEvent::BackstepFailed { .. } => "BackstepFailed",
            PlayerEvent::StateChanged { .. } => "StateChanged",
            PlayerEvent::PlaybackFailed { .. } => "PlaybackFailed",
        }
    }

    /// Serialize to a single JSON line
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Broadcast distribution of [`PlayerEvent`]s
///
/// Uses tokio::broadcast internally:
/// - Publishing never blocks; slow subscribers lag instead
/// - Any number of subscribers
/// - Subscribers clean up on drop
///
/// # Examples
///
/// ```
/// use avsync_common::events::{EventBus, PlayerEvent};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(PlayerEvent::BackstepFailed {
///     session_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(PlayerEvent::BackstepFailed { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
