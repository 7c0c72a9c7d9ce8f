//! Timeline of parts (ordered chapters)
//!
//! A timeline stitches ranges of one or more source files into a single
//! presentation. Part `i` covers timeline time `[start_i, start_{i+1})` and
//! plays source `source` from `source_start` on. Packet timestamps of the
//! active part are shifted by [`Timeline::video_offset`] so that decoded
//! frames carry timeline time.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One contiguous range of a source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelinePart {
    /// Timeline time at which the part begins
    pub start: f64,
    /// Source time played at `start`
    pub source_start: f64,
    /// Index into the session's source list
    pub source: usize,
}

/// Ordered list of parts plus the end of the last one
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    parts: Vec<TimelinePart>,
    end: f64,
}

impl Timeline {
    /// Parts must be non-empty with strictly increasing starts before `end`
    pub fn new(parts: Vec<TimelinePart>, end: f64) -> Result<Self> {
        if parts.is_empty() {
            return Err(Error::Config("timeline has no parts".to_string()));
        }
        let increasing = parts.windows(2).all(|w| w[0].start < w[1].start);
        let last_start = parts.last().map_or(0.0, |p| p.start);
        if !increasing || end <= last_start {
            return Err(Error::Config(
                "timeline parts must start in increasing order before the end".to_string(),
            ));
        }
        Ok(Self { parts, end })
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn part(&self, index: usize) -> Option<&TimelinePart> {
        self.parts.get(index)
    }

    /// Timeline time at which part `index` ends
    pub fn part_end(&self, index: usize) -> f64 {
        self.parts.get(index + 1).map_or(self.end, |next| next.start)
    }

    pub fn duration(&self) -> f64 {
        self.end
    }

    /// Part containing `pts` and the matching source time
    ///
    /// Negative times map into the first part; times at or past the end
    /// have no part.
    pub fn locate(&self, pts: f64) -> Option<(usize, f64)> {
        let pts = pts.max(0.0);
        if pts >= self.end {
            return None;
        }
        let index = self
            .parts
            .iter()
            .rposition(|p| p.start <= pts)
            .unwrap_or(0);
        let part = &self.parts[index];
        Some((index, part.source_start + (pts - part.start).max(0.0)))
    }

    /// Amount added to source timestamps of part `index`
    pub fn video_offset(&self, index: usize) -> f64 {
        self.parts
            .get(index)
            .map_or(0.0, |p| p.start - p.source_start)
    }
}
