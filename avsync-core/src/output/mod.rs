//! Output boundary
//!
//! The core pushes finished audio bytes and video frames into these traits
//! and never renders anything itself.

pub mod sim;

use crate::error::Result;
use crate::media::{AudioFormat, Frame};

/// Flags for [`AudioOutput::write`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteFlags {
    /// Last data before end of stream; the device should play out partial periods
    pub final_chunk: bool,
}

/// Audio device
pub trait AudioOutput: Send {
    /// Format the device was opened with
    fn format(&self) -> AudioFormat;

    /// Write up to `frames` sample frames from `samples`; returns frames accepted
    fn write(&mut self, samples: &[u8], frames: usize, flags: WriteFlags) -> Result<usize>;

    /// Seconds until a sample written now becomes audible
    fn delay(&self) -> f64;

    /// Bytes the device can accept right now
    fn free_space(&self) -> usize;

    /// Drop everything buffered
    fn reset(&mut self);

    fn pause(&mut self) {}

    fn resume(&mut self) {}

    /// Device consumes data instantly (no real timing)
    fn untimed(&self) -> bool {
        false
    }
}

/// Video display
pub trait VideoOutput: Send {
    /// Load the next frame to show; `pts_hint` is its presentation time
    fn queue_frame(&mut self, frame: Frame, pts_hint: f64);

    /// A loaded frame is waiting for [`VideoOutput::present`]
    fn has_queued_frame(&self) -> bool;

    /// Show the loaded frame
    fn present(&mut self) -> Result<()>;

    fn reset(&mut self);
}
