//! Video framedrop admission control
//!
//! Before a video packet is decoded the controller compares how much audio
//! the device still has queued with how far ahead of the video that audio
//! was written. When video lags by more than 100 ms (plus one frame per
//! frame already dropped in a row) the packet is decoded but discarded.
//! Audio is never dropped.

use crate::decode::DropMode;
use serde::Serialize;
use tracing::trace;

/// Lateness tolerated before dropping starts (seconds)
pub const DROP_THRESHOLD: f64 = 0.1;

/// Inputs to one framedrop decision
#[derive(Debug, Clone, Copy)]
pub struct DropInputs {
    /// Audio is playing on a timed device and has not reached end of stream
    pub audio_active: bool,
    /// Device delay scaled by playback speed
    pub audio_device_delay: f64,
    /// The sync clock's audio write delay
    pub audio_write_delay: f64,
    /// Nominal frame duration
    pub frame_time: f64,
    pub paused: bool,
    pub restarting: bool,
}

/// Drop counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FramedropStats {
    /// Drops since the last seek
    pub late_frames: u64,
    /// Drops over the whole session
    pub total: u64,
}

/// Decides per video packet whether to decode-but-discard
#[derive(Debug, Clone)]
pub struct FramedropController {
    enabled: bool,
    /// Consecutive drops; widens the threshold so bursts stay short
    in_a_row: u64,
    stats: FramedropStats,
}

impl FramedropController {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            in_a_row: 0,
            stats: FramedropStats::default(),
        }
    }

    pub fn check(&mut self, inputs: &DropInputs) -> DropMode {
        if !self.enabled || !inputs.audio_active {
            return DropMode::None;
        }
        let lateness = inputs.audio_device_delay - inputs.audio_write_delay;
        let limit = -(self.in_a_row as f64) * inputs.frame_time - DROP_THRESHOLD;
        if lateness < limit && !inputs.paused && !inputs.restarting {
            self.in_a_row += 1;
            self.stats.late_frames += 1;
            self.stats.total += 1;
            trace!("Dropping video frame (late by {:.3}s, {} in a row)", -lateness, self.in_a_row);
            DropMode::Standard
        } else {
            self.in_a_row = 0;
            DropMode::None
        }
    }

    pub fn stats(&self) -> FramedropStats {
        self.stats
    }

    /// Clear per-seek counters
    pub fn reset(&mut self) {
        self.in_a_row = 0;
        self.stats.late_frames = 0;
    }
}
