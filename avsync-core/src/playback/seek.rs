//! Seek requests, coalescing and backstep bookkeeping
//!
//! **Architecture:**
//! - [`SeekRequest`]: target (absolute, relative or fraction of the
//!   duration), optional direction, and exactness
//! - [`SeekQueue`]: at most one pending request. Relative requests
//!   accumulate into it, absolute and factor requests replace it
//! - [`PtsHistory`]: ring of recently decoded video timestamps tagged with
//!   a seek epoch, used to find "the frame before this one"
//! - [`BackstepState`] and [`HrSeekWindow`]: per-session flags of an
//!   in-flight backstep and exact seek

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Frames up to this far before an exact-seek target still count as "at" it
///
/// Container timestamps are rounded (often to whole milliseconds), so a
/// frame a few milliseconds before the target is the frame at the target.
/// It is decoded and shown; every earlier frame is hidden.
pub const HRSEEK_TOLERANCE: f64 = 0.005;

/// How far back a backstep first seeks to index frames
pub const BACKSTEP_LOOKBACK: f64 = 1.0;

/// Lookback used for the single retry when the first one was too short
pub const BACKSTEP_WIDE_LOOKBACK: f64 = 5.0;

/// Indexing seeks aim this far past the current frame so it gets decoded
pub const BACKSTEP_INDEX_MARGIN: f64 = 10.0;

/// Seeks arriving this soon after the last one wait for a frame to show
pub const SEEK_BURST_WINDOW: f64 = 0.3;

/// Timestamps kept for backstep
pub const PTS_HISTORY_LEN: usize = 100;

/// Where to seek
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SeekTarget {
    /// Timeline time in seconds
    Absolute(f64),
    /// Offset from the current position
    Relative(f64),
    /// Fraction of the duration (0.0 - 1.0)
    Factor(f64),
}

impl SeekTarget {
    pub fn amount(&self) -> f64 {
        match self {
            SeekTarget::Absolute(v) | SeekTarget::Relative(v) | SeekTarget::Factor(v) => *v,
        }
    }
}

/// How precisely to land on the target; ordered from loosest to strictest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekExactness {
    /// Keyframe precision is fine
    Approximate,
    /// Let the `hr_seek` policy decide
    #[default]
    Default,
    /// Land exactly on the target
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekDirection {
    Forward,
    Backward,
}

/// A seek request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeekRequest {
    pub target: SeekTarget,
    #[serde(default)]
    pub exactness: SeekExactness,
    #[serde(default)]
    pub direction: Option<SeekDirection>,
}

impl SeekRequest {
    pub fn absolute(pts: f64) -> Self {
        Self::new(SeekTarget::Absolute(pts))
    }

    pub fn relative(delta: f64) -> Self {
        Self::new(SeekTarget::Relative(delta))
    }

    pub fn factor(fraction: f64) -> Self {
        Self::new(SeekTarget::Factor(fraction))
    }

    fn new(target: SeekTarget) -> Self {
        Self {
            target,
            exactness: SeekExactness::Default,
            direction: None,
        }
    }

    pub fn with_exactness(mut self, exactness: SeekExactness) -> Self {
        self.exactness = exactness;
        self
    }

    pub fn exact(self) -> Self {
        self.with_exactness(SeekExactness::Exact)
    }
}

/// Single-slot seek queue with coalescing
#[derive(Debug, Clone, Default)]
pub struct SeekQueue {
    pending: Option<SeekRequest>,
}

impl SeekQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn peek(&self) -> Option<&SeekRequest> {
        self.pending.as_ref()
    }

    /// Merge a request into the pending one
    pub fn queue(&mut self, request: SeekRequest) {
        match request.target {
            SeekTarget::Relative(delta) => {
                let Some(pending) = self.pending.as_mut() else {
                    if delta != 0.0 {
                        self.pending = Some(request);
                    }
                    return;
                };
                pending.exactness = pending.exactness.max(request.exactness);
                match &mut pending.target {
                    // A fraction cannot absorb a time offset
                    SeekTarget::Factor(_) => {}
                    SeekTarget::Absolute(t) => *t += delta,
                    SeekTarget::Relative(d) => {
                        *d += delta;
                        if *d == 0.0 {
                            debug!("Relative seeks cancelled out");
                            self.pending = None;
                        }
                    }
                }
            }
            SeekTarget::Absolute(_) | SeekTarget::Factor(_) => {
                self.pending = Some(request);
            }
        }
    }

    pub fn take(&mut self) -> Option<SeekRequest> {
        self.pending.take()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

/// Exact-seek state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HrSeekWindow {
    /// Frames before this timestamp are never shown
    pub target: f64,
    /// Packets before the target are decoded with [`crate::decode::DropMode::HrSeekOnly`]
    pub framedrop: bool,
}

impl HrSeekWindow {
    pub fn new(target: f64) -> Self {
        Self {
            target,
            framedrop: true,
        }
    }

    /// Frame at `pts` is before the target
    pub fn hides(&self, pts: f64) -> bool {
        pts < self.target - HRSEEK_TOLERANCE
    }

    /// Packet at `pts` reaches the target; stop dropping from here on
    pub fn note_packet(&mut self, pts: Option<f64>) {
        if pts.is_some_and(|p| p >= self.target - HRSEEK_TOLERANCE) {
            self.framedrop = false;
        }
    }
}

/// Recently decoded video timestamps, newest first
///
/// Every entry carries the seek epoch it was decoded in. Two neighbouring
/// entries are only known to be consecutive frames if they share an epoch.
#[derive(Debug, Clone)]
pub struct PtsHistory {
    entries: VecDeque<(f64, u64)>,
    epoch: u64,
}

impl Default for PtsHistory {
    fn default() -> Self {
        Self {
            entries: VecDeque::with_capacity(PTS_HISTORY_LEN),
            epoch: 1,
        }
    }
}

impl PtsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Start a new epoch (seek, or a frame that breaks continuity)
    pub fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    /// Restore an epoch (non-user seeks keep continuity)
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Record a decoded frame
    ///
    /// Frames without a timestamp, and frames decoded while an exact seek
    /// is still skipping packets, break continuity instead.
    pub fn add(&mut self, pts: Option<f64>, hrseek_framedrop: bool) {
        let Some(pts) = pts.filter(|_| !hrseek_framedrop) else {
            self.bump_epoch();
            return;
        };
        if self.entries.len() >= PTS_HISTORY_LEN {
            self.entries.pop_back();
        }
        self.entries.push_front((pts, self.epoch));
    }

    /// Timestamp of the frame decoded just before the frame at `pts`
    pub fn find_previous(&self, pts: f64) -> Option<f64> {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .find(|((p, epoch), (_, prev_epoch))| *p == pts && *epoch != 0 && epoch == prev_epoch)
            .map(|(_, (prev, _))| *prev)
    }

    /// Newest timestamp, if it belongs to the current epoch
    pub fn last_frame_pts(&self) -> Option<f64> {
        self.entries
            .front()
            .filter(|(_, epoch)| *epoch == self.epoch)
            .map(|(pts, _)| *pts)
    }
}

/// In-flight backstep
#[derive(Debug, Clone, Copy, Default)]
pub struct BackstepState {
    pub active: bool,
    /// Epoch when the step was requested
    pub start_epoch: u64,
    /// The wider lookback has been tried
    pub widened: bool,
}

impl BackstepState {
    pub fn start(&mut self, epoch: u64) {
        self.active = true;
        self.start_epoch = epoch;
        self.widened = false;
    }
}
