//! Presentation timestamp recovery
//!
//! **Video** ([`PtsRecovery`]): every decoded frame has two candidate
//! timestamps. The *reordered* one comes out of the codec alongside the
//! frame. The *sorted* one is the smallest packet timestamp not yet
//! assigned to a frame, which recovers presentation order from
//! decode-order input. Each source accumulates a problem count whenever it
//! goes backwards. The trusted source (association mode) starts from a
//! static guess and flips only once its problem count reaches
//! `other * ratio + margin`.
//!
//! A second stage ([`PtsRecovery::fix_monotonic`]) runs on frames about to
//! be shown: small backward steps are jitter and are pinned to the previous
//! timestamp, large backward steps and huge forward jumps are timestamp
//! resets and restart the running clock.
//!
//! **Audio** ([`AudioPtsClock`]): the last packet timestamp plus the bytes
//! decoded since, divided by the byte rate.

use crate::config::{PlayerOptions, PtsAssociationMode, PtsTuning};
use crate::media::StreamParams;
use avsync_common::timing::{self, Pts};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Ring size of the observed-timestamp histories
const HISTORY_LEN: usize = 8;

/// Frames before the broken-packet-pts verdict is final
const BROKEN_PTS_PROBE_FRAMES: i32 = 10;

/// Timestamp source the video decoder currently trusts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssocMode {
    Reordered,
    Sorted,
}

impl AssocMode {
    fn other(self) -> Self {
        match self {
            AssocMode::Reordered => AssocMode::Sorted,
            AssocMode::Sorted => AssocMode::Reordered,
        }
    }
}

impl std::fmt::Display for AssocMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssocMode::Reordered => write!(f, "reordered"),
            AssocMode::Sorted => write!(f, "sorted"),
        }
    }
}

/// Timestamp assigned to a decoded frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampedPts {
    pub pts: f64,
    /// Made up from the frame rate because no source had a value
    pub interpolated: bool,
}

/// Timing of a frame about to be shown
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    pub pts: f64,
    /// Time since the previously shown frame
    pub frame_time: f64,
    /// The running clock was reset at this frame
    pub discontinuity: bool,
}

/// Anomaly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PtsStats {
    pub reordered_problems: u32,
    pub sorted_problems: u32,
    pub interpolated: u64,
    pub jitter_corrections: u64,
    pub discontinuities: u64,
    pub mode_switches: u32,
}

impl PtsStats {
    /// Total anomalies worth reporting
    pub fn anomalies(&self) -> u64 {
        self.reordered_problems as u64
            + self.sorted_problems as u64
            + self.jitter_corrections
            + self.discontinuities
    }
}

fn push_history(ring: &mut VecDeque<f64>, pts: f64) {
    if ring.len() == HISTORY_LEN {
        ring.pop_front();
    }
    ring.push_back(pts);
}

/// Per-video-stream timestamp recovery
#[derive(Debug, Clone)]
pub struct PtsRecovery {
    tuning: PtsTuning,
    user_mode: PtsAssociationMode,
    correct_pts: bool,
    container_pts: bool,
    frame_time: f64,

    mode: Option<AssocMode>,
    /// Pending packet timestamps, ascending
    sorted_queue: Vec<f64>,
    reordered_history: VecDeque<f64>,
    sorted_history: VecDeque<f64>,
    last_reordered: Pts,
    last_sorted: Pts,

    first_packet_pts: Pts,
    last_packet_missing_pts: bool,
    decoded_pts: Pts,
    last_pts: Pts,
    /// Negative while probing, 0 = fine, 1 = broken
    broken_packet_pts: i32,

    stats: PtsStats,
}

impl PtsRecovery {
    pub fn new(params: &StreamParams, options: &PlayerOptions) -> Self {
        let fps = params.fps.filter(|f| *f > 0.0).unwrap_or(options.fallback_fps);
        Self {
            tuning: options.pts_tuning.clone(),
            user_mode: options.pts_association_mode,
            correct_pts: options.correct_pts,
            container_pts: params.presentation_timestamps,
            frame_time: 1.0 / fps,
            mode: None,
            sorted_queue: Vec::new(),
            reordered_history: VecDeque::with_capacity(HISTORY_LEN),
            sorted_history: VecDeque::with_capacity(HISTORY_LEN),
            last_reordered: None,
            last_sorted: None,
            first_packet_pts: None,
            last_packet_missing_pts: false,
            decoded_pts: None,
            last_pts: None,
            broken_packet_pts: -BROKEN_PTS_PROBE_FRAMES,
            stats: PtsStats::default(),
        }
    }

    /// Nominal frame duration used for interpolation
    pub fn frame_time(&self) -> f64 {
        self.frame_time
    }

    /// Update the nominal frame rate (container fps changed mid-stream)
    pub fn set_fps(&mut self, fps: f64) {
        if fps > 0.0 {
            self.frame_time = 1.0 / fps;
        }
    }

    pub fn mode(&self) -> Option<AssocMode> {
        self.mode
    }

    pub fn stats(&self) -> PtsStats {
        self.stats
    }

    /// `None` while still probing
    pub fn has_broken_packet_pts(&self) -> Option<bool> {
        match self.broken_packet_pts {
            n if n < 0 => None,
            0 => Some(false),
            _ => Some(true),
        }
    }

    /// Last timestamp accepted by [`Self::fix_monotonic`]
    pub fn last_pts(&self) -> Pts {
        self.last_pts
    }

    /// Register the timestamp of a packet sent to the decoder
    pub fn packet_in(&mut self, pts: Pts) {
        self.last_packet_missing_pts = pts.is_none();
        let Some(pts) = pts else {
            return;
        };
        if self.first_packet_pts.is_none() {
            self.first_packet_pts = Some(pts);
        }
        if self.sorted_queue.len() >= self.tuning.sorted_queue_capacity {
            warn!("Too many buffered video pts, dropping {:.3}", pts);
            return;
        }
        let at = self.sorted_queue.partition_point(|p| *p <= pts);
        self.sorted_queue.insert(at, pts);
    }

    /// Choose the timestamp of a decoded frame
    ///
    /// `reordered` is the timestamp the codec emitted with the frame.
    pub fn stamp(&mut self, reordered: Pts) -> StampedPts {
        let sorted = if self.sorted_queue.is_empty() {
            None
        } else {
            Some(self.sorted_queue.remove(0))
        };

        if let Some(r) = reordered {
            if self.last_reordered.is_some_and(|last| r < last) {
                self.stats.reordered_problems += 1;
            }
            self.last_reordered = Some(r);
            push_history(&mut self.reordered_history, r);
        }
        if let Some(s) = sorted {
            if self.last_sorted.is_some_and(|last| s <= last) {
                self.stats.sorted_problems += 1;
            }
            self.last_sorted = Some(s);
            push_history(&mut self.sorted_history, s);
        }

        self.update_mode(reordered);

        let chosen = if self.correct_pts {
            match self.mode {
                Some(AssocMode::Reordered) => reordered,
                _ => sorted,
            }
        } else {
            None
        };

        let stamped = match chosen {
            Some(pts) => StampedPts {
                pts,
                interpolated: false,
            },
            None => {
                self.stats.interpolated += 1;
                let pts = match self.decoded_pts {
                    Some(prev) => prev + self.frame_time,
                    None => self.first_packet_pts.unwrap_or(0.0),
                };
                StampedPts {
                    pts,
                    interpolated: true,
                }
            }
        };

        if self.broken_packet_pts < 0 {
            self.broken_packet_pts += 1;
        }
        if self.stats.reordered_problems > 0 || self.last_packet_missing_pts {
            self.broken_packet_pts = 1;
        }

        self.decoded_pts = Some(stamped.pts);
        stamped
    }

    fn update_mode(&mut self, reordered: Pts) {
        let user = match self.user_mode {
            PtsAssociationMode::Reordered => Some(AssocMode::Reordered),
            PtsAssociationMode::Sorted => Some(AssocMode::Sorted),
            PtsAssociationMode::Auto => None,
        };
        if let Some(mode) = user {
            self.mode = Some(mode);
            return;
        }

        let Some(mode) = self.mode else {
            let initial = if self.container_pts && reordered.is_some() {
                AssocMode::Reordered
            } else {
                AssocMode::Sorted
            };
            debug!("Initial pts association mode: {}", initial);
            self.mode = Some(initial);
            return;
        };

        let (active, other) = match mode {
            AssocMode::Reordered => (self.stats.reordered_problems, self.stats.sorted_problems),
            AssocMode::Sorted => (self.stats.sorted_problems, self.stats.reordered_problems),
        };
        if active as f64 >= other as f64 * self.tuning.hysteresis_ratio + self.tuning.hysteresis_margin {
            let next = mode.other();
            debug!(
                "Switching pts association mode to {} ({} vs {} problems)",
                next, active, other
            );
            self.stats.mode_switches += 1;
            self.mode = Some(next);
        }
    }

    /// Enforce monotonic presentation for a frame about to be shown
    pub fn fix_monotonic(&mut self, pts: f64) -> FrameTiming {
        let mut pts = pts;
        let mut discontinuity = false;
        match self.last_pts {
            None => {
                self.last_pts = Some(pts);
            }
            Some(last) if last > pts => {
                if last - pts > self.tuning.jitter_threshold {
                    warn!(
                        "Decreasing video pts: {} < {}, treating as reset",
                        timing::format_pts(Some(pts)),
                        timing::format_pts(Some(last))
                    );
                    self.last_pts = Some(pts);
                    self.stats.discontinuities += 1;
                    discontinuity = true;
                } else {
                    debug!("Video pts jitter: {:.3} < {:.3}", pts, last);
                    pts = last;
                    self.stats.jitter_corrections += 1;
                }
            }
            Some(last) if pts >= last + self.tuning.discontinuity_threshold => {
                warn!(
                    "Jump in video pts: {} -> {}",
                    timing::format_pts(Some(last)),
                    timing::format_pts(Some(pts))
                );
                self.last_pts = Some(pts);
                self.stats.discontinuities += 1;
                discontinuity = true;
            }
            Some(_) => {}
        }
        let frame_time = pts - self.last_pts.unwrap_or(pts);
        self.last_pts = Some(pts);
        FrameTiming {
            pts,
            frame_time,
            discontinuity,
        }
    }

    /// Forget all per-position state (after a seek)
    ///
    /// The association mode and problem counters survive: they describe
    /// the stream, not the position.
    pub fn reset(&mut self) {
        self.sorted_queue.clear();
        self.last_reordered = None;
        self.last_sorted = None;
        self.first_packet_pts = None;
        self.decoded_pts = None;
        self.last_pts = None;
    }
}

/// Running end-of-decoded-audio clock
#[derive(Debug, Clone, Default)]
pub struct AudioPtsClock {
    base: Pts,
    bytes_since_base: usize,
    bytes_per_second: f64,
    snap: f64,
}

impl AudioPtsClock {
    pub fn new(snap: f64) -> Self {
        Self {
            snap,
            ..Default::default()
        }
    }

    /// Timestamp of the end of everything decoded so far
    pub fn current(&self) -> Pts {
        self.base
            .map(|b| b + timing::bytes_to_seconds(self.bytes_since_base, self.bytes_per_second))
    }

    /// Account for one decoded chunk and return its start timestamp
    ///
    /// A chunk carrying a timestamp rebases the clock unless the timestamp
    /// is within the snap distance of the interpolated position.
    pub fn on_decoded(&mut self, pts: Pts, bytes: usize, bytes_per_second: f64) -> Pts {
        if bytes_per_second > 0.0 && bytes_per_second != self.bytes_per_second {
            // Format change: fold elapsed bytes into the base first
            self.base = self.current();
            self.bytes_since_base = 0;
            self.bytes_per_second = bytes_per_second;
        }
        if let Some(p) = pts {
            let keep = self.current().is_some_and(|cur| (cur - p).abs() < self.snap);
            if !keep {
                self.base = Some(p);
                self.bytes_since_base = 0;
            }
        }
        let start = self.current();
        self.bytes_since_base += bytes;
        start
    }

    pub fn reset(&mut self) {
        self.base = None;
        self.bytes_since_base = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recovery(fps: Option<f64>) -> PtsRecovery {
        let params = StreamParams::video("rawvideo", 2, 2, fps);
        PtsRecovery::new(&params, &PlayerOptions::default())
    }

    fn decode(rec: &mut PtsRecovery, pts: Pts) -> f64 {
        rec.packet_in(pts);
        rec.stamp(pts).pts
    }

    #[test]
    fn test_gap_is_interpolated_at_fallback_rate() {
        let mut rec = recovery(None);
        let out: Vec<f64> = [Some(0.0), Some(0.04), None, Some(0.12)]
            .into_iter()
            .map(|p| decode(&mut rec, p))
            .collect();
        let expected = [0.0, 0.04, 0.08, 0.12];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{:?}", out);
        }
        assert_eq!(rec.stats().interpolated, 1);
        assert_eq!(rec.has_broken_packet_pts(), Some(true));
    }

    #[test]
    fn test_no_pts_at_all_starts_at_zero() {
        let mut rec = recovery(Some(50.0));
        assert_eq!(decode(&mut rec, None), 0.0);
        assert!((decode(&mut rec, None) - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_sorted_mode_reorders_decode_order_input() {
        // Decode order I P B B with pts 0, 0.12, 0.04, 0.08; codec gives none
        let mut rec = recovery(None);
        rec.container_pts = false;
        for p in [0.0, 0.12, 0.04, 0.08] {
            rec.packet_in(Some(p));
        }
        let out: Vec<f64> = (0..4).map(|_| rec.stamp(None).pts).collect();
        assert_eq!(out, vec![0.0, 0.04, 0.08, 0.12]);
        assert_eq!(rec.mode(), Some(AssocMode::Sorted));
    }

    #[test]
    fn test_mode_flips_only_past_hysteresis() {
        let mut rec = recovery(None);
        // Codec output goes backwards repeatedly while sorted input is clean
        let reordered = [0.0, 0.2, 0.1, 0.3, 0.2, 0.4, 0.3, 0.5];
        for (i, r) in reordered.iter().enumerate() {
            rec.packet_in(Some(i as f64 * 0.1));
            rec.stamp(Some(*r));
            let problems = rec.stats().reordered_problems;
            if problems < 2 {
                assert_eq!(rec.mode(), Some(AssocMode::Reordered));
            }
        }
        // 0 sorted problems: flip happens at 2 reordered problems
        assert_eq!(rec.mode(), Some(AssocMode::Sorted));
        assert_eq!(rec.stats().mode_switches, 1);
    }

    #[test]
    fn test_user_mode_overrides_heuristic() {
        let params = StreamParams::video("rawvideo", 2, 2, None);
        let options = PlayerOptions {
            pts_association_mode: PtsAssociationMode::Sorted,
            ..Default::default()
        };
        let mut rec = PtsRecovery::new(&params, &options);
        rec.packet_in(Some(1.0));
        assert_eq!(rec.stamp(Some(5.0)).pts, 1.0);
        assert_eq!(rec.mode(), Some(AssocMode::Sorted));
    }

    #[test]
    fn test_small_backward_step_is_jitter() {
        let mut rec = recovery(None);
        rec.fix_monotonic(1.0);
        let t = rec.fix_monotonic(0.7);
        assert_eq!(t.pts, 1.0);
        assert_eq!(t.frame_time, 0.0);
        assert!(!t.discontinuity);
        assert_eq!(rec.stats().jitter_corrections, 1);
    }

    #[test]
    fn test_large_backward_step_is_reset() {
        let mut rec = recovery(None);
        rec.fix_monotonic(10.0);
        let t = rec.fix_monotonic(2.0);
        assert_eq!(t.pts, 2.0);
        assert_eq!(t.frame_time, 0.0);
        assert!(t.discontinuity);
        let next = rec.fix_monotonic(2.04);
        assert!((next.frame_time - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_huge_forward_jump_is_reset() {
        let mut rec = recovery(None);
        rec.fix_monotonic(1.0);
        let t = rec.fix_monotonic(100.0);
        assert!(t.discontinuity);
        assert_eq!(t.frame_time, 0.0);
        let normal = rec.fix_monotonic(100.5);
        assert!(!normal.discontinuity);
    }

    #[test]
    fn test_reset_keeps_mode() {
        let mut rec = recovery(None);
        decode(&mut rec, Some(0.0));
        let mode = rec.mode();
        rec.fix_monotonic(0.0);
        rec.reset();
        assert_eq!(rec.mode(), mode);
        assert_eq!(rec.last_pts(), None);
    }

    #[test]
    fn test_audio_clock_interpolates_between_packets() {
        let mut clock = AudioPtsClock::new(0.001);
        // 1000 bytes/s
        assert_eq!(clock.on_decoded(Some(2.0), 500, 1000.0), Some(2.0));
        assert_eq!(clock.on_decoded(None, 250, 1000.0), Some(2.5));
        assert_eq!(clock.current(), Some(2.75));
    }

    #[test]
    fn test_audio_clock_snaps_close_timestamps() {
        let mut clock = AudioPtsClock::new(0.001);
        clock.on_decoded(Some(0.0), 1000, 1000.0);
        // 1.0004 is within the snap: interpolated 1.0 is kept
        assert_eq!(clock.on_decoded(Some(1.0004), 1000, 1000.0), Some(1.0));
        // Far away: rebase
        assert_eq!(clock.on_decoded(Some(5.0), 1000, 1000.0), Some(5.0));
        clock.reset();
        assert_eq!(clock.current(), None);
    }
}
