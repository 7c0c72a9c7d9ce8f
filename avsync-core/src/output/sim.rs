//! Simulated outputs
//!
//! **SimAudioOutput:** a device FIFO (ringbuf) that drains at the format's
//! byte rate against a [`Clock`]. Delay, free space and underruns behave
//! like a real device without touching hardware.
//!
//! **SimVideoOutput:** records every presented frame with the clock time it
//! was shown at.
//!
//! Both expose their logs through shared handles so a test can inspect
//! them after the output has been moved into a session.

use super::{AudioOutput, VideoOutput, WriteFlags};
use crate::error::{Error, Result};
use crate::media::{AudioFormat, Frame};
use crate::playback::clock::Clock;
use ringbuf::{traits::*, HeapRb};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// What the simulated audio device did
#[derive(Debug, Clone, Default)]
pub struct AudioLog {
    pub written_bytes: u64,
    pub played_bytes: u64,
    pub underruns: u64,
    pub final_chunks: u32,
    /// Clock time of the first accepted write
    pub first_write_at: Option<f64>,
    /// Every accepted byte, in order
    pub data: Vec<u8>,
}

/// Ring-buffered audio device
pub struct SimAudioOutput {
    format: AudioFormat,
    buffer: HeapRb<u8>,
    clock: Arc<dyn Clock>,
    last_update: f64,
    paused: bool,
    stalled: bool,
    untimed: bool,
    latency: f64,
    log: Arc<Mutex<AudioLog>>,
}

impl SimAudioOutput {
    /// Device holding `buffer_seconds` of audio
    pub fn new(format: AudioFormat, buffer_seconds: f64, clock: Arc<dyn Clock>) -> Self {
        let frames = (buffer_seconds * format.sample_rate as f64).ceil().max(1.0) as usize;
        let capacity = frames * format.bytes_per_frame();
        debug!(
            "Creating simulated audio output: {} Hz, {} ch, {} bytes",
            format.sample_rate, format.channels, capacity
        );
        let now = clock.now();
        Self {
            format,
            buffer: HeapRb::new(capacity),
            clock,
            last_update: now,
            paused: false,
            stalled: false,
            untimed: false,
            latency: 0.0,
            log: Arc::new(Mutex::new(AudioLog::default())),
        }
    }

    /// Fixed extra latency reported on top of the buffered data
    pub fn with_latency(mut self, latency: f64) -> Self {
        self.latency = latency;
        self
    }

    /// Consume data instantly, like a null device
    pub fn with_untimed(mut self, untimed: bool) -> Self {
        self.untimed = untimed;
        self
    }

    /// Refuse every write (simulated hung device)
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    pub fn log_handle(&self) -> Arc<Mutex<AudioLog>> {
        Arc::clone(&self.log)
    }

    fn bytes_per_second(&self) -> f64 {
        self.format.bytes_per_second()
    }

    /// Bytes the device would have played since the last update
    fn pending_drain(&self) -> usize {
        if self.paused || self.untimed {
            return 0;
        }
        let elapsed = (self.clock.now() - self.last_update).max(0.0);
        let bytes = (elapsed * self.bytes_per_second()) as usize;
        let unit = self.format.bytes_per_frame();
        bytes / unit * unit
    }

    /// Apply elapsed playback to the FIFO
    fn settle(&mut self) {
        let now = self.clock.now();
        if self.paused {
            self.last_update = now;
            return;
        }
        let demand = self.pending_drain();
        let occupied = self.buffer.occupied_len();
        let drained = if self.untimed { occupied } else { demand.min(occupied) };
        self.buffer.skip(drained);
        if let Ok(mut log) = self.log.lock() {
            log.played_bytes += drained as u64;
            if demand > occupied && log.written_bytes > 0 && log.final_chunks == 0 {
                log.underruns += 1;
                trace!("Simulated audio underrun ({} of {} bytes)", occupied, demand);
            }
        }
        if drained < demand || self.untimed {
            // Ran dry: the device clock restarts with the next write
            self.last_update = now;
        } else {
            self.last_update += drained as f64 / self.bytes_per_second();
        }
    }
}

impl AudioOutput for SimAudioOutput {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn write(&mut self, samples: &[u8], frames: usize, flags: WriteFlags) -> Result<usize> {
        self.settle();
        if self.stalled {
            return Ok(0);
        }
        let unit = self.format.bytes_per_frame();
        let wanted = (frames * unit).min(samples.len());
        let room = self.buffer.vacant_len() / unit * unit;
        let bytes = wanted.min(room);
        let pushed = self.buffer.push_slice(&samples[..bytes]);
        if let Ok(mut log) = self.log.lock() {
            if pushed > 0 && log.first_write_at.is_none() {
                log.first_write_at = Some(self.clock.now());
            }
            log.written_bytes += pushed as u64;
            log.data.extend_from_slice(&samples[..pushed]);
            if flags.final_chunk {
                log.final_chunks += 1;
            }
        }
        if self.untimed {
            self.settle();
        }
        Ok(pushed / unit)
    }

    fn delay(&self) -> f64 {
        if self.untimed {
            return 0.0;
        }
        let occupied = self.buffer.occupied_len();
        let remaining = occupied - self.pending_drain().min(occupied);
        remaining as f64 / self.bytes_per_second() + self.latency
    }

    fn free_space(&self) -> usize {
        if self.stalled {
            return 0;
        }
        let occupied = self.buffer.occupied_len();
        self.buffer.vacant_len() + self.pending_drain().min(occupied)
    }

    fn reset(&mut self) {
        self.settle();
        let dropped = self.buffer.clear();
        debug!("Simulated audio output reset ({} bytes dropped)", dropped);
    }

    fn pause(&mut self) {
        self.settle();
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
        self.last_update = self.clock.now();
    }

    fn untimed(&self) -> bool {
        self.untimed
    }
}

/// One frame shown by the simulated display
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentedFrame {
    pub pts: f64,
    /// Clock time of presentation
    pub at: f64,
}

/// Recording video display
pub struct SimVideoOutput {
    clock: Arc<dyn Clock>,
    queued: Option<(Frame, f64)>,
    log: Arc<Mutex<Vec<PresentedFrame>>>,
}

impl SimVideoOutput {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            queued: None,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log_handle(&self) -> Arc<Mutex<Vec<PresentedFrame>>> {
        Arc::clone(&self.log)
    }
}

impl VideoOutput for SimVideoOutput {
    fn queue_frame(&mut self, frame: Frame, pts_hint: f64) {
        if self.queued.is_some() {
            warn!("Video output replaced an unpresented frame");
        }
        self.queued = Some((frame, pts_hint));
    }

    fn has_queued_frame(&self) -> bool {
        self.queued.is_some()
    }

    fn present(&mut self) -> Result<()> {
        let (_frame, pts) = self
            .queued
            .take()
            .ok_or_else(|| Error::Output("present without a queued frame".to_string()))?;
        let at = self.clock.now();
        trace!("Presenting frame pts={:.3} at {:.3}", pts, at);
        if let Ok(mut log) = self.log.lock() {
            log.push(PresentedFrame { pts, at });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.queued = None;
    }
}
