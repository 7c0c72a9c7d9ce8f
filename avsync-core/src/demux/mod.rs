//! Demuxer boundary
//!
//! The core consumes packets through the [`Demuxer`] trait and never
//! parses containers itself. A demuxer may produce packets on another
//! thread; the pump only ever uses the non-blocking
//! [`Demuxer::read_packet_async`] and relies on the [`WakeupHandle`] to be
//! told when waiting is over.

pub mod memory;
pub mod symphonia_demuxer;

use crate::error::Result;
use crate::media::{Packet, StreamId, StreamParams};
use avsync_common::timing::Pts;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Result of a non-blocking read
#[derive(Debug)]
pub enum AsyncRead {
    Packet(Packet),
    /// No packet yet; the wakeup handle fires when one arrives
    WouldBlock,
    /// Stream finished
    Eof,
}

/// Where a demuxer seek goes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DemuxSeekTarget {
    Absolute(f64),
    Relative(f64),
    /// Fraction of the file duration
    Factor(f64),
}

/// Demuxer seek flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxSeekFlags {
    /// Land on a keyframe at or before the target
    pub backward: bool,
    /// Land on a keyframe at or after the target
    pub forward: bool,
    /// Deliver extra packets before the target for subtitle latency
    pub subtitle_preroll: bool,
}

/// Packet source for a playback session
pub trait Demuxer: Send {
    /// Parameters of every stream
    fn streams(&self) -> &[StreamParams];

    /// Wait for the next packet of `stream` (`None` at end of stream)
    fn read_packet_blocking(&mut self, stream: StreamId) -> Result<Option<Packet>>;

    /// Return the next packet if one is ready
    fn read_packet_async(&mut self, stream: StreamId) -> Result<AsyncRead>;

    /// Reposition; errors leave the demuxer where it was
    fn seek(&mut self, target: DemuxSeekTarget, flags: DemuxSeekFlags) -> Result<()>;

    fn has_packet_ready(&self, stream: StreamId) -> bool;

    /// Timestamp of the next packet, if known
    fn next_pts(&mut self, stream: StreamId) -> Pts;

    /// Install the handle fired when a blocked stream gets data
    fn set_wakeup(&mut self, wakeup: WakeupHandle);

    /// Seeks land exactly where asked (enables relative-as-absolute seeks and backstep)
    fn accurate_seek(&self) -> bool {
        false
    }

    fn duration(&self) -> Option<f64> {
        None
    }

    fn start_time(&self) -> f64 {
        0.0
    }
}

#[derive(Debug, Default)]
struct WakeupInner {
    pending: AtomicBool,
    notify: Notify,
}

/// Edge-triggered wakeup signal, safe to fire from any thread
///
/// Firing only sets a flag and notifies; the scheduler consumes the edge
/// with [`WakeupHandle::take`] or awaits it with [`WakeupHandle::notified`].
#[derive(Debug, Clone, Default)]
pub struct WakeupHandle {
    inner: Arc<WakeupInner>,
}

impl WakeupHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        self.inner.pending.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    /// Consume a pending wakeup
    pub fn take(&self) -> bool {
        self.inner.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Resolve once the handle has been fired
    pub async fn notified(&self) {
        if self.take() {
            return;
        }
        self.inner.notify.notified().await;
        self.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wakeup_is_edge_triggered() {
        let handle = WakeupHandle::new();
        assert!(!handle.take());
        handle.clone().wake();
        assert!(handle.is_pending());
        assert!(handle.take());
        assert!(!handle.take());
    }

    #[tokio::test]
    async fn test_notified_returns_after_cross_thread_wake() {
        let handle = WakeupHandle::new();
        let remote = handle.clone();
        std::thread::spawn(move || remote.wake());
        tokio::time::timeout(std::time::Duration::from_secs(2), handle.notified())
            .await
            .unwrap();
    }
}
