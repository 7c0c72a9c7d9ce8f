//! Synthetic media
//!
//! Video is `rawvideo` (one packet per frame, payload = frame index).
//! Audio is 16-bit mono PCM at [`AUDIO_RATE`] whose samples count up, so a
//! byte offset in the output maps back to a source position.

use avsync_common::timing::Pts;
use avsync_core::demux::memory::MemoryDemuxer;
use avsync_core::demux::{AsyncRead, DemuxSeekFlags, DemuxSeekTarget, Demuxer, WakeupHandle};
use avsync_core::media::{Packet, StreamId, StreamParams};
use std::sync::{Arc, Mutex};

/// Default synthetic frame rate
pub const FPS: f64 = 25.0;

/// Synthetic audio sample rate (mono, 16-bit)
pub const AUDIO_RATE: u32 = 8000;

/// Seconds of audio per PCM packet
pub const AUDIO_PACKET: f64 = 0.1;

/// One packet per frame, keyframe every `keyframe_interval` frames
pub fn video_packets(frames: usize, fps: f64, keyframe_interval: usize) -> Vec<Packet> {
    (0..frames)
        .map(|i| {
            Packet::new(0, vec![(i % 256) as u8; 16])
                .with_pts(Some(i as f64 / fps))
                .with_duration(1.0 / fps)
                .with_keyframe(i % keyframe_interval.max(1) == 0)
        })
        .collect()
}

/// PCM packets covering `seconds`; sample `n` has the value `n % 32768`
pub fn pcm_packets(seconds: f64) -> Vec<Packet> {
    let per_packet = (AUDIO_RATE as f64 * AUDIO_PACKET).round() as usize;
    let packets = (seconds / AUDIO_PACKET).round() as usize;
    (0..packets)
        .map(|p| {
            let data = (0..per_packet)
                .flat_map(|s| (((p * per_packet + s) % 32768) as i16).to_le_bytes())
                .collect();
            Packet::new(0, data)
                .with_pts(Some(p as f64 * AUDIO_PACKET))
                .with_duration(AUDIO_PACKET)
                .with_keyframe(true)
        })
        .collect()
}

pub fn video_stream() -> StreamParams {
    StreamParams::video("rawvideo", 4, 4, Some(FPS))
}

pub fn audio_stream() -> StreamParams {
    StreamParams::audio("pcm_s16le", AUDIO_RATE, 1)
}

pub fn video_source(seconds: f64, keyframe_interval: usize) -> MemoryDemuxer {
    let mut demuxer = MemoryDemuxer::new();
    let frames = (seconds * FPS).round() as usize;
    demuxer.add_stream(video_stream(), video_packets(frames, FPS, keyframe_interval));
    demuxer
}

pub fn audio_source(seconds: f64) -> MemoryDemuxer {
    let mut demuxer = MemoryDemuxer::new();
    demuxer.add_stream(audio_stream(), pcm_packets(seconds));
    demuxer
}

/// Video (stream 0) and audio (stream 1) of equal length
pub fn av_source(seconds: f64, keyframe_interval: usize) -> MemoryDemuxer {
    let mut demuxer = video_source(seconds, keyframe_interval);
    demuxer.add_stream(audio_stream(), pcm_packets(seconds));
    demuxer
}

/// Source sample index of a little-endian sample pair in the output
pub fn sample_value(bytes: &[u8]) -> i16 {
    i16::from_le_bytes([bytes[0], bytes[1]])
}

/// Memory demuxer that stays reachable after the session took it
///
/// Clones share one demuxer, so a test can hold and release streams (or
/// make seeks fail) while the session plays.
#[derive(Debug, Clone)]
pub struct SharedDemuxer {
    inner: Arc<Mutex<MemoryDemuxer>>,
    params: Vec<StreamParams>,
}

impl SharedDemuxer {
    pub fn new(demuxer: MemoryDemuxer) -> Self {
        let params = demuxer.streams().to_vec();
        Self {
            inner: Arc::new(Mutex::new(demuxer)),
            params,
        }
    }

    pub fn hold(&self, stream: StreamId) {
        self.inner.lock().unwrap().hold(stream);
    }

    pub fn release(&self, stream: StreamId) {
        self.inner.lock().unwrap().release(stream);
    }

    pub fn set_fail_seeks(&self, fail: bool) {
        self.inner.lock().unwrap().set_fail_seeks(fail);
    }

    pub fn seek_log(&self) -> Vec<(DemuxSeekTarget, DemuxSeekFlags)> {
        self.inner.lock().unwrap().seek_log().to_vec()
    }

    pub fn remaining(&self, stream: StreamId) -> usize {
        self.inner.lock().unwrap().remaining(stream)
    }
}

impl Demuxer for SharedDemuxer {
    fn streams(&self) -> &[StreamParams] {
        &self.params
    }

    fn read_packet_blocking(&mut self, stream: StreamId) -> avsync_core::Result<Option<Packet>> {
        self.inner.lock().unwrap().read_packet_blocking(stream)
    }

    fn read_packet_async(&mut self, stream: StreamId) -> avsync_core::Result<AsyncRead> {
        self.inner.lock().unwrap().read_packet_async(stream)
    }

    fn seek(&mut self, target: DemuxSeekTarget, flags: DemuxSeekFlags) -> avsync_core::Result<()> {
        self.inner.lock().unwrap().seek(target, flags)
    }

    fn has_packet_ready(&self, stream: StreamId) -> bool {
        self.inner.lock().unwrap().has_packet_ready(stream)
    }

    fn next_pts(&mut self, stream: StreamId) -> Pts {
        self.inner.lock().unwrap().next_pts(stream)
    }

    fn set_wakeup(&mut self, wakeup: WakeupHandle) {
        self.inner.lock().unwrap().set_wakeup(wakeup);
    }

    fn accurate_seek(&self) -> bool {
        self.inner.lock().unwrap().accurate_seek()
    }

    fn duration(&self) -> Option<f64> {
        self.inner.lock().unwrap().duration()
    }
}
