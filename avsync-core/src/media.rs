//! Media data model: stream parameters, packets and decoded frames
//!
//! **Ownership:** packets and frames are move-only. A packet belongs to the
//! decoder context until it is fully consumed; a frame moves from the
//! decoder context to the scheduler and from there to an output. Nothing
//! here is reference counted.

use avsync_common::timing::{self, Pts};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use avsync_common::events::StreamKind;

/// Index of a stream within its demuxer
pub type StreamId = usize;

/// Interleaved sample layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    /// Compressed audio wrapped for pass-through; opaque to the core
    Bitstream,
}

impl SampleFormat {
    /// Size of one sample of one channel
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 | SampleFormat::Bitstream => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }

    /// Byte value that encodes silence
    pub fn silence_byte(self) -> u8 {
        match self {
            SampleFormat::U8 => 0x80,
            _ => 0x00,
        }
    }
}

/// Audio format of decoded samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// Bytes per sample frame (all channels)
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels.max(1) as usize
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.bytes_per_frame() as f64 * self.sample_rate as f64
    }

    /// Whether samples may be cut, padded or synthesized
    ///
    /// Bitstream data must reach the output unmodified.
    pub fn is_modifiable(&self) -> bool {
        self.sample_format != SampleFormat::Bitstream
    }
}

/// Container-provided parameters for one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamParams {
    pub kind: StreamKind,
    /// Codec name ("flac", "pcm_s16le", "rawvideo", ...)
    pub codec: String,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: u16,
    #[serde(default)]
    pub bits_per_sample: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Container frame rate, if any
    #[serde(default)]
    pub fps: Option<f64>,
    /// Codec private data
    #[serde(default)]
    pub extradata: Vec<u8>,
    /// Container timestamps are presentation timestamps (not decode order)
    #[serde(default)]
    pub presentation_timestamps: bool,
}

impl StreamParams {
    pub fn audio(codec: &str, sample_rate: u32, channels: u16) -> Self {
        Self {
            kind: StreamKind::Audio,
            codec: codec.to_string(),
            sample_rate,
            channels,
            bits_per_sample: 0,
            width: 0,
            height: 0,
            fps: None,
            extradata: Vec::new(),
            presentation_timestamps: true,
        }
    }

    pub fn video(codec: &str, width: u32, height: u32, fps: Option<f64>) -> Self {
        Self {
            kind: StreamKind::Video,
            codec: codec.to_string(),
            sample_rate: 0,
            channels: 0,
            bits_per_sample: 0,
            width,
            height,
            fps,
            extradata: Vec::new(),
            presentation_timestamps: true,
        }
    }
}

/// Timeline window a packet belongs to
///
/// Two packets are in the same segment when window and codec match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Pts,
    pub end: Pts,
    pub params: StreamParams,
}

impl Segment {
    pub fn same_window(&self, other: &Segment) -> bool {
        self.start == other.start && self.end == other.end
    }

    pub fn same_codec(&self, other: &Segment) -> bool {
        self.params.codec == other.params.codec
    }
}

/// One compressed packet
///
/// Decoders that consume input in pieces (PCM slicing) advance the packet
/// with [`Packet::consume`] instead of copying the remainder.
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream: StreamId,
    pub pts: Pts,
    pub dts: Pts,
    pub duration: Option<f64>,
    pub keyframe: bool,
    /// Set on the first packet of a new segment
    pub segment: Option<Arc<Segment>>,
    data: Vec<u8>,
    offset: usize,
}

impl Packet {
    pub fn new(stream: StreamId, data: Vec<u8>) -> Self {
        Self {
            stream,
            pts: None,
            dts: None,
            duration: None,
            keyframe: true,
            segment: None,
            data,
            offset: 0,
        }
    }

    pub fn with_pts(mut self, pts: Pts) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_dts(mut self, dts: Pts) -> Self {
        self.dts = dts;
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn with_segment(mut self, segment: Arc<Segment>) -> Self {
        self.segment = Some(segment);
        self
    }

    /// Bytes not yet consumed
    pub fn data(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    /// Remaining byte count
    pub fn len(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Packet carried no payload at all
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_consumed(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Mark `n` more bytes as consumed
    ///
    /// Timestamps belong to the first byte, so they are cleared once any
    /// part of the payload has been used.
    pub fn consume(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.data.len());
        if n > 0 {
            self.pts = None;
            self.dts = None;
        }
    }

    /// Add a constant to both timestamps
    pub fn shift_timestamps(&mut self, offset: f64) {
        self.pts = timing::offset(self.pts, offset);
        self.dts = timing::offset(self.dts, offset);
    }
}

/// Interleaved decoded audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSamples {
    pub format: AudioFormat,
    pub data: Vec<u8>,
}

impl AudioSamples {
    pub fn new(format: AudioFormat, data: Vec<u8>) -> Self {
        Self { format, data }
    }

    /// Buffer of `frames` sample frames of silence
    pub fn silence(format: AudioFormat, frames: usize) -> Self {
        let data = vec![format.sample_format.silence_byte(); frames * format.bytes_per_frame()];
        Self { format, data }
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.format.bytes_per_frame()
    }

    pub fn duration(&self) -> f64 {
        timing::bytes_to_seconds(self.data.len(), self.format.bytes_per_second())
    }

    /// Drop `frames` sample frames from the front
    pub fn trim_front(&mut self, frames: usize) {
        let bytes = (frames * self.format.bytes_per_frame()).min(self.data.len());
        self.data.drain(..bytes);
    }

    /// Keep at most `frames` sample frames
    pub fn truncate(&mut self, frames: usize) {
        let bytes = frames * self.format.bytes_per_frame();
        self.data.truncate(bytes);
    }
}

/// Decoded picture
#[derive(Debug, Clone, PartialEq)]
pub struct VideoImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Decoded payload
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    Audio(AudioSamples),
    Video(VideoImage),
}

/// One decoded frame with its presentation timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub pts: Pts,
    pub duration: Option<f64>,
    pub data: FrameData,
    /// Decoded under a drop mode; carries a timestamp but must not be shown
    pub discarded: bool,
}

impl Frame {
    pub fn audio(pts: Pts, samples: AudioSamples) -> Self {
        let duration = Some(samples.duration());
        Self {
            pts,
            duration,
            data: FrameData::Audio(samples),
            discarded: false,
        }
    }

    pub fn video(pts: Pts, image: VideoImage) -> Self {
        Self {
            pts,
            duration: None,
            data: FrameData::Video(image),
            discarded: false,
        }
    }

    pub fn samples(&self) -> Option<&AudioSamples> {
        match &self.data {
            FrameData::Audio(s) => Some(s),
            FrameData::Video(_) => None,
        }
    }

    pub fn into_samples(self) -> Option<AudioSamples> {
        match self.data {
            FrameData::Audio(s) => Some(s),
            FrameData::Video(_) => None,
        }
    }

    /// Clip the frame to `[start, end)`
    ///
    /// Audio is cut at sample granularity (bitstream audio is never cut);
    /// video frames are kept or dropped whole. Returns `false` when nothing
    /// of the frame is left. Frames without a timestamp are always kept.
    pub fn clip(&mut self, start: Pts, end: Pts) -> bool {
        let Some(pts) = self.pts else {
            return true;
        };
        match &mut self.data {
            FrameData::Video(_) => {
                start.map_or(true, |s| pts >= s) && end.map_or(true, |e| pts < e)
            }
            FrameData::Audio(samples) => {
                if !samples.format.is_modifiable() {
                    return true;
                }
                let rate = samples.format.sample_rate as f64;
                let mut new_pts = pts;
                if let Some(e) = end {
                    let keep = ((e - pts) * rate).round().max(0.0) as usize;
                    if keep < samples.frames() {
                        samples.truncate(keep);
                    }
                }
                if let Some(s) = start {
                    if pts < s {
                        let cut = ((s - pts) * rate).round() as usize;
                        samples.trim_front(cut.min(samples.frames()));
                        new_pts = s;
                    }
                }
                let empty = samples.frames() == 0;
                self.duration = Some(samples.duration());
                self.pts = Some(new_pts);
                !empty
            }
        }
    }
}
