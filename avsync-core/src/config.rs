//! Player options
//!
//! Every tunable of the core lives in [`PlayerOptions`]. All fields have
//! built-in defaults, so an empty `[player]` table (or no config file at all)
//! yields a fully working configuration.
//!
//! The empirically tuned constants of the PTS heuristics and the audio
//! resync are grouped into [`PtsTuning`] and [`AudioSyncTuning`]. They are
//! kept configurable but should rarely need touching.

use crate::error::{Error, Result};
use avsync_common::config::TomlConfig;
use serde::{Deserialize, Serialize};

/// When a seek becomes an exact (hr) seek
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HrSeekPolicy {
    /// Only absolute seeks are exact unless the request asks otherwise
    #[default]
    Absolute,
    /// Every seek is exact
    Always,
    /// Only explicitly exact requests
    Never,
}

/// Which PTS source the video decoder trusts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PtsAssociationMode {
    /// Pick by heuristic and switch on evidence
    #[default]
    Auto,
    /// Trust the codec's reordered output timestamps
    Reordered,
    /// Trust timestamps sorted from input order
    Sorted,
}

/// PTS-determination heuristic constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtsTuning {
    /// Mode flips when `active_problems >= other * ratio + margin`
    pub hysteresis_ratio: f64,
    pub hysteresis_margin: f64,
    /// Backward steps up to this size are reordering jitter (seconds)
    pub jitter_threshold: f64,
    /// Forward jumps of at least this size are discontinuities (seconds)
    pub discontinuity_threshold: f64,
    /// Capacity of the sorted-pts queue
    pub sorted_queue_capacity: usize,
}

impl Default for PtsTuning {
    fn default() -> Self {
        Self {
            hysteresis_ratio: 1.5,
            hysteresis_margin: 2.0,
            jitter_threshold: 0.5,
            discontinuity_threshold: 60.0,
            sorted_queue_capacity: 32,
        }
    }
}

/// Audio resync constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSyncTuning {
    /// Interpolated audio pts within this distance of a packet pts snaps to it
    pub pts_snap: f64,
    /// Start-sync differences larger than this are broken timestamps (seconds)
    pub broken_pts_cutoff: f64,
    /// Buffered audio below this counts as drained at EOF (seconds)
    pub eof_tolerance: f64,
    /// Minimum discard chunk while skipping decoded audio (bytes)
    pub min_discard_bytes: usize,
}

impl Default for AudioSyncTuning {
    fn default() -> Self {
        Self {
            pts_snap: 0.001,
            broken_pts_cutoff: 300.0,
            eof_tolerance: 0.05,
            min_discard_bytes: 20_000,
        }
    }
}

/// All options of the decode-and-sync core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    /// Playback speed multiplier
    pub speed: f64,
    /// User audio delay in seconds (positive delays audio)
    pub audio_delay: f64,
    /// Upper bound for a single sync correction; frame-time based when unset
    pub max_pts_correction: Option<f64>,
    /// Drop late video frames to catch up with audio
    pub framedrop: bool,
    pub hr_seek: HrSeekPolicy,
    /// Extra seconds to seek the demuxer back for exact seeks
    pub hr_seek_demuxer_offset: f64,
    /// Align audio start to video after seeks
    pub initial_audio_sync: bool,
    /// Do not wait for buffered audio to drain at end of file
    pub gapless_audio: bool,
    /// Use timestamps at all (off = frame-rate driven timing)
    pub correct_pts: bool,
    pub pts_association_mode: PtsAssociationMode,
    /// Smoothing factor for device-reported audio delay (0 = off)
    pub autosync: u32,
    /// Default periodic wakeup interval (seconds)
    pub wakeup_period: f64,
    /// Pause on the last frame instead of ending
    pub keep_open: bool,
    /// Stop at this timestamp
    pub play_end: Option<f64>,
    /// Stop after this many shown video frames
    pub max_frames: Option<u64>,
    /// Frame rate assumed when the container gives none
    pub fallback_fps: f64,
    /// Seconds without output progress before the file fails
    pub output_stall_timeout: f64,
    /// Audio decoder preference list (`family`, `family:decoder`, `-family`)
    pub audio_decoders: Vec<String>,
    /// Video decoder preference list
    pub video_decoders: Vec<String>,
    pub pts_tuning: PtsTuning,
    pub audio_sync_tuning: AudioSyncTuning,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            audio_delay: 0.0,
            max_pts_correction: None,
            framedrop: true,
            hr_seek: HrSeekPolicy::Absolute,
            hr_seek_demuxer_offset: 0.0,
            initial_audio_sync: true,
            gapless_audio: false,
            correct_pts: true,
            pts_association_mode: PtsAssociationMode::Auto,
            autosync: 0,
            wakeup_period: 0.5,
            keep_open: false,
            play_end: None,
            max_frames: None,
            fallback_fps: 25.0,
            output_stall_timeout: 10.0,
            audio_decoders: Vec::new(),
            video_decoders: Vec::new(),
            pts_tuning: PtsTuning::default(),
            audio_sync_tuning: AudioSyncTuning::default(),
        }
    }
}

impl PlayerOptions {
    /// Extract options from the `[player]` table of a loaded config
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let options: PlayerOptions = config.player_section()?;
        options.validate()?;
        Ok(options)
    }

    /// Reject values the scheduler cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(Error::Config(format!("speed must be > 0, got {}", self.speed)));
        }
        if !(self.fallback_fps.is_finite() && self.fallback_fps > 0.0) {
            return Err(Error::Config(format!(
                "fallback_fps must be > 0, got {}",
                self.fallback_fps
            )));
        }
        if self.wakeup_period.is_nan() || self.wakeup_period <= 0.0 {
            return Err(Error::Config(format!(
                "wakeup_period must be > 0, got {}",
                self.wakeup_period
            )));
        }
        if self.output_stall_timeout < 0.0 || self.hr_seek_demuxer_offset < 0.0 {
            return Err(Error::Config(
                "output_stall_timeout and hr_seek_demuxer_offset must not be negative".to_string(),
            ));
        }
        if let Some(cap) = self.max_pts_correction {
            if cap < 0.0 {
                return Err(Error::Config(format!(
                    "max_pts_correction must not be negative, got {}",
                    cap
                )));
            }
        }
        let t = &self.pts_tuning;
        if t.hysteresis_ratio < 1.0 || t.hysteresis_margin < 0.0 || t.sorted_queue_capacity == 0 {
            return Err(Error::Config("invalid pts_tuning values".to_string()));
        }
        Ok(())
    }

    /// Frame duration implied by the fallback frame rate
    pub fn fallback_frame_time(&self) -> f64 {
        1.0 / self.fallback_fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = PlayerOptions::default();
        options.validate().unwrap();
        assert_eq!(options.pts_tuning.hysteresis_ratio, 1.5);
        assert_eq!(options.audio_sync_tuning.broken_pts_cutoff, 300.0);
        assert!((options.fallback_frame_time() - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_partial_table_keeps_other_defaults() {
        let config = TomlConfig::parse(
            "[player]\nspeed = 2.0\nhr_seek = \"always\"\n[player.pts_tuning]\njitter_threshold = 0.25\n",
        )
        .unwrap();
        let options = PlayerOptions::from_toml(&config).unwrap();
        assert_eq!(options.speed, 2.0);
        assert_eq!(options.hr_seek, HrSeekPolicy::Always);
        assert_eq!(options.pts_tuning.jitter_threshold, 0.25);
        assert_eq!(options.pts_tuning.hysteresis_margin, 2.0);
        assert!(options.framedrop);
    }

    #[test]
    fn test_invalid_speed_rejected() {
        let options = PlayerOptions {
            speed: 0.0,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_negative_correction_cap_rejected() {
        let options = PlayerOptions {
            max_pts_correction: Some(-0.1),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
