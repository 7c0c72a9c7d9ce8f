//! In-memory packet source
//!
//! Holds fully built packet lists per stream. Used by the simulator and the
//! tests; streams can be *held* to simulate a demuxer thread that has not
//! produced data yet, and released later (which fires the wakeup).

use super::{AsyncRead, DemuxSeekFlags, DemuxSeekTarget, Demuxer, WakeupHandle};
use crate::error::{Error, Result};
use crate::media::{Packet, StreamId, StreamParams};
use avsync_common::timing::Pts;
use tracing::{debug, trace};

#[derive(Debug)]
struct MemoryStream {
    packets: Vec<Packet>,
    position: usize,
    held: bool,
}

/// Demuxer over pre-built packet lists
#[derive(Debug, Default)]
pub struct MemoryDemuxer {
    streams: Vec<MemoryStream>,
    params: Vec<StreamParams>,
    wakeup: Option<WakeupHandle>,
    accurate_seek: bool,
    duration: Option<f64>,
    /// Timestamp of the last packet handed out
    last_pts: Pts,
    seeks: Vec<(DemuxSeekTarget, DemuxSeekFlags)>,
    fail_seeks: bool,
}

impl MemoryDemuxer {
    pub fn new() -> Self {
        Self {
            accurate_seek: true,
            ..Default::default()
        }
    }

    /// Add a stream with its packets (in decode order); returns its id
    pub fn add_stream(&mut self, params: StreamParams, packets: Vec<Packet>) -> StreamId {
        let id = self.streams.len();
        let packets = packets
            .into_iter()
            .map(|mut p| {
                p.stream = id;
                p
            })
            .collect::<Vec<_>>();
        let end = packets
            .iter()
            .filter_map(|p| p.pts.map(|pts| pts + p.duration.unwrap_or(0.0)))
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        if let Some(end) = end {
            self.duration = Some(self.duration.map_or(end, |d| d.max(end)));
        }
        self.params.push(params);
        self.streams.push(MemoryStream {
            packets,
            position: 0,
            held: false,
        });
        id
    }

    pub fn set_accurate_seek(&mut self, accurate: bool) {
        self.accurate_seek = accurate;
    }

    pub fn set_duration(&mut self, duration: Option<f64>) {
        self.duration = duration;
    }

    /// Make every seek fail
    pub fn set_fail_seeks(&mut self, fail: bool) {
        self.fail_seeks = fail;
    }

    /// Pretend no data is available on `stream`
    pub fn hold(&mut self, stream: StreamId) {
        if let Some(s) = self.streams.get_mut(stream) {
            s.held = true;
        }
    }

    /// Make held data available and fire the wakeup
    pub fn release(&mut self, stream: StreamId) {
        if let Some(s) = self.streams.get_mut(stream) {
            s.held = false;
        }
        if let Some(w) = &self.wakeup {
            w.wake();
        }
    }

    /// Seeks performed so far
    pub fn seek_log(&self) -> &[(DemuxSeekTarget, DemuxSeekFlags)] {
        &self.seeks
    }

    pub fn remaining(&self, stream: StreamId) -> usize {
        self.streams
            .get(stream)
            .map_or(0, |s| s.packets.len() - s.position)
    }

    fn next_packet(&mut self, stream: StreamId) -> Result<Option<Packet>> {
        let s = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| Error::Demux(format!("no stream {}", stream)))?;
        let Some(packet) = s.packets.get(s.position).cloned() else {
            return Ok(None);
        };
        s.position += 1;
        if packet.pts.is_some() {
            self.last_pts = packet.pts;
        }
        trace!("stream {} packet pts={:?}", stream, packet.pts);
        Ok(Some(packet))
    }

    /// Index of the packet a seek to `target` lands on
    fn seek_index(packets: &[Packet], target: f64, flags: DemuxSeekFlags) -> usize {
        let keyframes = packets
            .iter()
            .enumerate()
            .filter(|(_, p)| p.keyframe && p.pts.is_some());
        if flags.forward && !flags.backward {
            keyframes
                .filter(|(_, p)| p.pts.is_some_and(|pts| pts >= target))
                .map(|(i, _)| i)
                .next()
                .unwrap_or(packets.len())
        } else {
            keyframes
                .filter(|(_, p)| p.pts.is_some_and(|pts| pts <= target))
                .map(|(i, _)| i)
                .last()
                .unwrap_or(0)
        }
    }
}

impl Demuxer for MemoryDemuxer {
    fn streams(&self) -> &[StreamParams] {
        &self.params
    }

    fn read_packet_blocking(&mut self, stream: StreamId) -> Result<Option<Packet>> {
        // Nothing to wait for in memory: a held stream is simply released
        if let Some(s) = self.streams.get_mut(stream) {
            s.held = false;
        }
        self.next_packet(stream)
    }

    fn read_packet_async(&mut self, stream: StreamId) -> Result<AsyncRead> {
        if self.streams.get(stream).is_some_and(|s| s.held) {
            return Ok(AsyncRead::WouldBlock);
        }
        Ok(match self.next_packet(stream)? {
            Some(packet) => AsyncRead::Packet(packet),
            None => AsyncRead::Eof,
        })
    }

    fn seek(&mut self, target: DemuxSeekTarget, flags: DemuxSeekFlags) -> Result<()> {
        self.seeks.push((target, flags));
        if self.fail_seeks {
            return Err(Error::Demux("seek not supported".to_string()));
        }
        let absolute = match target {
            DemuxSeekTarget::Absolute(t) => t,
            DemuxSeekTarget::Relative(d) => self.last_pts.unwrap_or(0.0) + d,
            DemuxSeekTarget::Factor(f) => {
                let duration = self
                    .duration
                    .ok_or_else(|| Error::Demux("factor seek without duration".to_string()))?;
                f * duration
            }
        };
        debug!("Memory demuxer seek to {:.3} ({:?})", absolute, flags);
        for s in &mut self.streams {
            s.position = Self::seek_index(&s.packets, absolute, flags);
        }
        self.last_pts = None;
        Ok(())
    }

    fn has_packet_ready(&self, stream: StreamId) -> bool {
        self.streams
            .get(stream)
            .is_some_and(|s| !s.held && s.position < s.packets.len())
    }

    fn next_pts(&mut self, stream: StreamId) -> Pts {
        let s = self.streams.get(stream)?;
        s.packets.get(s.position).and_then(|p| p.pts)
    }

    fn set_wakeup(&mut self, wakeup: WakeupHandle) {
        self.wakeup = Some(wakeup);
    }

    fn accurate_seek(&self) -> bool {
        self.accurate_seek
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_packets() -> Vec<Packet> {
        (0..10)
            .map(|i| {
                Packet::new(0, vec![0; 4])
                    .with_pts(Some(i as f64 * 0.1))
                    .with_duration(0.1)
                    .with_keyframe(i % 5 == 0)
            })
            .collect()
    }

    fn demuxer() -> MemoryDemuxer {
        let mut d = MemoryDemuxer::new();
        d.add_stream(StreamParams::video("rawvideo", 2, 2, Some(10.0)), video_packets());
        d
    }

    #[test]
    fn test_duration_from_packets() {
        let d = demuxer();
        assert!((d.duration().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_backward_seek_lands_on_previous_keyframe() {
        let mut d = demuxer();
        d.seek(
            DemuxSeekTarget::Absolute(0.72),
            DemuxSeekFlags {
                backward: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(d.next_pts(0), Some(0.5));
    }

    #[test]
    fn test_forward_seek_lands_on_next_keyframe() {
        let mut d = demuxer();
        d.seek(
            DemuxSeekTarget::Absolute(0.1),
            DemuxSeekFlags {
                forward: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(d.next_pts(0), Some(0.5));
    }

    #[test]
    fn test_factor_seek_uses_duration() {
        let mut d = demuxer();
        d.seek(DemuxSeekTarget::Factor(0.6), DemuxSeekFlags::default()).unwrap();
        assert_eq!(d.next_pts(0), Some(0.5));
    }

    #[test]
    fn test_hold_and_release() {
        let mut d = demuxer();
        let wakeup = WakeupHandle::new();
        d.set_wakeup(wakeup.clone());
        d.hold(0);
        assert!(matches!(d.read_packet_async(0).unwrap(), AsyncRead::WouldBlock));
        assert!(!d.has_packet_ready(0));
        d.release(0);
        assert!(wakeup.take());
        assert!(matches!(d.read_packet_async(0).unwrap(), AsyncRead::Packet(_)));
    }

    #[test]
    fn test_eof_after_last_packet() {
        let mut d = demuxer();
        for _ in 0..10 {
            assert!(d.read_packet_blocking(0).unwrap().is_some());
        }
        assert!(matches!(d.read_packet_async(0).unwrap(), AsyncRead::Eof));
    }
}
