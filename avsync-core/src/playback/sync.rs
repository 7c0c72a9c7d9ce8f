//! Audio/video sync clock
//!
//! Audio is the reference. [`SyncState::audio_write_delay`] is how far the
//! audio written to the device runs ahead of the video frame being
//! scheduled: it grows with every audio write and shrinks by one frame
//! duration per video frame. Once per frame, [`SyncState::adjust`] nudges
//! it toward the measured A/V offset by 10% of the error, bounded by a
//! per-frame cap. Large errors are slewed away at the cap rate; once 10% of
//! the error fits under the cap the loop decays geometrically.

use avsync_common::timing::Pts;
use serde::Serialize;
use tracing::trace;

/// Fraction of the measured error corrected per video frame
pub const CORRECTION_GAIN: f64 = 0.1;

/// Largest correction allowed for one frame
///
/// A tenth of the frame duration, raised to the user cap when one is set.
pub fn correction_cap(frame_time: f64, user_cap: Option<f64>) -> f64 {
    (frame_time * CORRECTION_GAIN).max(user_cap.unwrap_or(0.0))
}

/// Drift-control state, mutated once per scheduler tick
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncState {
    /// Audio written ahead of the scheduled video frame (seconds)
    pub audio_write_delay: f64,
    /// Playing-position A/V difference for diagnostics
    pub last_av_difference: Pts,
    /// Sum of all corrections since the last seek
    pub total_drift_correction: f64,
    /// Seconds until the loaded video frame is due; may go negative
    pub time_frame: f64,
    /// How long the last video flip took
    pub last_flip_duration: f64,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for audio accepted by the device
    pub fn on_audio_written(&mut self, seconds: f64) {
        self.audio_write_delay += seconds;
    }

    /// Account for a new video frame taking over the display slot
    pub fn on_video_frame(&mut self, frame_time: f64) {
        self.audio_write_delay -= frame_time;
    }

    /// Apply one damped correction; returns the change applied
    ///
    /// `written_audio_pts` is the timestamp of the end of the audio handed
    /// to the device, `audio_delay` the desired audio offset.
    pub fn adjust(
        &mut self,
        written_audio_pts: f64,
        video_pts: f64,
        frame_time: f64,
        audio_delay: f64,
        user_cap: Option<f64>,
    ) -> f64 {
        let audio_pos = written_audio_pts - self.audio_write_delay;
        let av_delay = audio_pos - video_pts + self.last_flip_duration - audio_delay;
        let cap = correction_cap(frame_time, user_cap);
        let change = (av_delay * CORRECTION_GAIN).clamp(-cap, cap);
        self.audio_write_delay += change;
        self.total_drift_correction += change;
        trace!(
            "A/V delay {:+.4}, correction {:+.4} (cap {:.4})",
            av_delay,
            change,
            cap
        );
        change
    }

    /// Recompute the playing-position difference
    ///
    /// `playing_audio_pts` is the timestamp currently audible.
    pub fn update_av_difference(&mut self, playing_audio_pts: Pts, video_pts: Pts, audio_delay: f64, speed: f64) {
        self.last_av_difference = match (playing_audio_pts, video_pts) {
            (Some(a), Some(v)) => {
                let mut diff = a - v - audio_delay;
                if self.time_frame > 0.0 {
                    diff += self.time_frame * speed;
                }
                Some(diff)
            }
            _ => None,
        };
    }

    /// Forget positional state after a seek
    pub fn reset(&mut self) {
        self.audio_write_delay = 0.0;
        self.time_frame = 0.0;
        self.total_drift_correction = 0.0;
    }
}
