//! Passthrough and bitstream-repack decoders
//!
//! These drivers never transform sample or pixel data:
//! - `pcm`: raw interleaved PCM, sliced into bounded chunks (partial
//!   packet consumption)
//! - `spdif`: compressed audio (AC-3, E-AC-3, DTS, TrueHD) wrapped as an
//!   opaque bitstream for an output that decodes it downstream
//! - `rawvideo`: uncompressed pictures

use super::driver::{
    ControlResult, DecoderCandidate, DecoderDriver, DriverCommand, DriverFactory, DropMode,
    Received,
};
use crate::error::{Error, Result};
use crate::media::{
    AudioFormat, AudioSamples, Frame, Packet, SampleFormat, StreamKind, StreamParams, VideoImage,
};
use std::collections::VecDeque;

/// Family name used in preference lists
pub const FAMILY: &str = "passthrough";

/// Largest PCM chunk emitted per frame (sample frames)
pub const PCM_CHUNK_FRAMES: usize = 4096;

const BITSTREAM_CODECS: &[&str] = &["ac3", "eac3", "dts", "truehd"];

/// Map a `pcm_*` codec name to its sample format
pub fn pcm_sample_format(codec: &str) -> Option<SampleFormat> {
    match codec {
        "pcm_u8" => Some(SampleFormat::U8),
        "pcm_s16le" => Some(SampleFormat::S16),
        "pcm_s32le" => Some(SampleFormat::S32),
        "pcm_f32le" => Some(SampleFormat::F32),
        _ => None,
    }
}

/// Factory for the passthrough family
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughFactory;

impl DriverFactory for PassthroughFactory {
    fn family(&self) -> &str {
        FAMILY
    }

    fn candidates(&self, params: &StreamParams) -> Vec<DecoderCandidate> {
        let candidate = |decoder: &str, generic: bool| DecoderCandidate {
            family: FAMILY.to_string(),
            decoder: decoder.to_string(),
            codec: params.codec.clone(),
            generic,
        };
        match params.kind {
            StreamKind::Audio if pcm_sample_format(&params.codec).is_some() => {
                vec![candidate("pcm", true)]
            }
            StreamKind::Audio if BITSTREAM_CODECS.contains(&params.codec.as_str()) => {
                vec![candidate("spdif", false)]
            }
            StreamKind::Video if params.codec == "rawvideo" => vec![candidate("rawvideo", false)],
            _ => Vec::new(),
        }
    }

    fn open(&self, params: &StreamParams, decoder: &str) -> Result<Box<dyn DecoderDriver>> {
        let init_error = |reason: &str| Error::DriverInit {
            decoder: decoder.to_string(),
            reason: reason.to_string(),
        };
        match decoder {
            "pcm" => {
                let sample_format = pcm_sample_format(&params.codec)
                    .ok_or_else(|| init_error("not a PCM codec"))?;
                if params.sample_rate == 0 || params.channels == 0 {
                    return Err(init_error("missing sample rate or channel count"));
                }
                let format = AudioFormat::new(params.sample_rate, params.channels, sample_format);
                Ok(Box::new(PcmDriver::new(format)))
            }
            "spdif" => {
                if !BITSTREAM_CODECS.contains(&params.codec.as_str()) {
                    return Err(init_error("codec cannot be passed through"));
                }
                let rate = if params.sample_rate > 0 { params.sample_rate } else { 48_000 };
                let format = AudioFormat::new(rate, 2, SampleFormat::Bitstream);
                Ok(Box::new(BitstreamDriver {
                    format,
                    queue: VecDeque::new(),
                    draining: false,
                }))
            }
            "rawvideo" => {
                if params.width == 0 || params.height == 0 {
                    return Err(init_error("missing picture size"));
                }
                Ok(Box::new(RawVideoDriver {
                    width: params.width,
                    height: params.height,
                    queue: VecDeque::new(),
                    drop_mode: DropMode::None,
                    draining: false,
                }))
            }
            other => Err(Error::DriverInit {
                decoder: other.to_string(),
                reason: "unknown passthrough decoder".to_string(),
            }),
        }
    }
}

/// Raw PCM slicer
///
/// Holds at most one output chunk; a packet larger than one chunk stays
/// partially consumed until the chunk has been received.
struct PcmDriver {
    format: AudioFormat,
    output: Option<Frame>,
    draining: bool,
}

impl PcmDriver {
    fn new(format: AudioFormat) -> Self {
        Self {
            format,
            output: None,
            draining: false,
        }
    }
}

impl DecoderDriver for PcmDriver {
    fn name(&self) -> &str {
        "pcm"
    }

    fn send_packet(&mut self, packet: Option<&mut Packet>) -> Result<bool> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(true);
        };
        if self.output.is_some() {
            return Ok(false);
        }
        let frame_bytes = self.format.bytes_per_frame();
        let whole = packet.len() / frame_bytes * frame_bytes;
        let take = whole.min(PCM_CHUNK_FRAMES * frame_bytes);
        if take == 0 {
            // Trailing partial sample frame is unusable
            packet.consume(packet.len());
            return Ok(true);
        }
        let data = packet.data()[..take].to_vec();
        let pts = packet.pts;
        packet.consume(take);
        self.output = Some(Frame::audio(pts, AudioSamples::new(self.format, data)));
        Ok(packet.len() < frame_bytes)
    }

    fn receive_frame(&mut self) -> Result<Received> {
        match self.output.take() {
            Some(frame) => Ok(Received::Frame(frame)),
            None if self.draining => Ok(Received::Eof),
            None => Ok(Received::Pending),
        }
    }

    fn control(&mut self, cmd: DriverCommand) -> ControlResult {
        match cmd {
            DriverCommand::Reset => {
                self.output = None;
                self.draining = false;
                ControlResult::Ok
            }
            DriverCommand::SetFramedrop(_) => ControlResult::Unknown,
        }
    }

    fn uninit(&mut self) {
        self.output = None;
    }
}

/// Compressed-audio bitstream wrapper
struct BitstreamDriver {
    format: AudioFormat,
    queue: VecDeque<Frame>,
    draining: bool,
}

impl DecoderDriver for BitstreamDriver {
    fn name(&self) -> &str {
        "spdif"
    }

    fn send_packet(&mut self, packet: Option<&mut Packet>) -> Result<bool> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(true);
        };
        let mut frame = Frame::audio(packet.pts, AudioSamples::new(self.format, packet.data().to_vec()));
        if packet.duration.is_some() {
            frame.duration = packet.duration;
        }
        let len = packet.len();
        packet.consume(len);
        self.queue.push_back(frame);
        Ok(true)
    }

    fn receive_frame(&mut self) -> Result<Received> {
        match self.queue.pop_front() {
            Some(frame) => Ok(Received::Frame(frame)),
            None if self.draining => Ok(Received::Eof),
            None => Ok(Received::Pending),
        }
    }

    fn control(&mut self, cmd: DriverCommand) -> ControlResult {
        match cmd {
            DriverCommand::Reset => {
                self.queue.clear();
                self.draining = false;
                ControlResult::Ok
            }
            DriverCommand::SetFramedrop(_) => ControlResult::Unknown,
        }
    }
}

/// Uncompressed video
struct RawVideoDriver {
    width: u32,
    height: u32,
    queue: VecDeque<Frame>,
    drop_mode: DropMode,
    draining: bool,
}

impl DecoderDriver for RawVideoDriver {
    fn name(&self) -> &str {
        "rawvideo"
    }

    fn send_packet(&mut self, packet: Option<&mut Packet>) -> Result<bool> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(true);
        };
        // Dropped pictures are still emitted so timestamps stay paired
        let discarded = self.drop_mode != DropMode::None;
        let data = if discarded {
            Vec::new()
        } else {
            packet.data().to_vec()
        };
        let mut frame = Frame::video(
            packet.pts,
            VideoImage {
                width: self.width,
                height: self.height,
                data,
            },
        );
        frame.duration = packet.duration;
        frame.discarded = discarded;
        let len = packet.len();
        packet.consume(len);
        self.queue.push_back(frame);
        Ok(true)
    }

    fn receive_frame(&mut self) -> Result<Received> {
        match self.queue.pop_front() {
            Some(frame) => Ok(Received::Frame(frame)),
            None if self.draining => Ok(Received::Eof),
            None => Ok(Received::Pending),
        }
    }

    fn control(&mut self, cmd: DriverCommand) -> ControlResult {
        match cmd {
            DriverCommand::Reset => {
                self.queue.clear();
                self.draining = false;
                ControlResult::Ok
            }
            DriverCommand::SetFramedrop(mode) => {
                self.drop_mode = mode;
                ControlResult::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(params: &StreamParams, decoder: &str) -> Box<dyn DecoderDriver> {
        PassthroughFactory.open(params, decoder).unwrap()
    }

    #[test]
    fn test_pcm_slices_large_packets() {
        let params = StreamParams::audio("pcm_s16le", 48_000, 2);
        let mut driver = open(&params, "pcm");
        // 4096 + 100 frames of 4 bytes
        let mut pkt = Packet::new(0, vec![0u8; (PCM_CHUNK_FRAMES + 100) * 4]).with_pts(Some(2.0));

        assert!(!driver.send_packet(Some(&mut pkt)).unwrap());
        // Output slot full: nothing more is taken
        assert!(!driver.send_packet(Some(&mut pkt)).unwrap());
        let Received::Frame(first) = driver.receive_frame().unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(first.pts, Some(2.0));
        assert_eq!(first.samples().unwrap().frames(), PCM_CHUNK_FRAMES);

        assert!(driver.send_packet(Some(&mut pkt)).unwrap());
        let Received::Frame(second) = driver.receive_frame().unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(second.pts, None);
        assert_eq!(second.samples().unwrap().frames(), 100);
        assert!(matches!(driver.receive_frame().unwrap(), Received::Pending));
    }

    #[test]
    fn test_pcm_eof_after_flush() {
        let params = StreamParams::audio("pcm_u8", 8_000, 1);
        let mut driver = open(&params, "pcm");
        driver.send_packet(None).unwrap();
        assert!(matches!(driver.receive_frame().unwrap(), Received::Eof));
        driver.control(DriverCommand::Reset);
        assert!(matches!(driver.receive_frame().unwrap(), Received::Pending));
    }

    #[test]
    fn test_pcm_init_requires_format() {
        let params = StreamParams::audio("pcm_s16le", 0, 2);
        assert!(PassthroughFactory.open(&params, "pcm").is_err());
    }

    #[test]
    fn test_candidates_by_codec() {
        let pcm = PassthroughFactory.candidates(&StreamParams::audio("pcm_f32le", 48_000, 2));
        assert_eq!(pcm.len(), 1);
        assert!(pcm[0].generic);

        let ac3 = PassthroughFactory.candidates(&StreamParams::audio("ac3", 48_000, 6));
        assert_eq!(ac3[0].decoder, "spdif");
        assert!(!ac3[0].generic);

        assert!(PassthroughFactory
            .candidates(&StreamParams::video("h264", 640, 480, None))
            .is_empty());
    }

    #[test]
    fn test_bitstream_is_not_modifiable() {
        let params = StreamParams::audio("ac3", 48_000, 6);
        let mut driver = open(&params, "spdif");
        let mut pkt = Packet::new(0, vec![1, 2, 3, 4]).with_pts(Some(0.0));
        assert!(driver.send_packet(Some(&mut pkt)).unwrap());
        let Received::Frame(frame) = driver.receive_frame().unwrap() else {
            panic!("expected frame");
        };
        assert!(!frame.samples().unwrap().format.is_modifiable());
    }

    #[test]
    fn test_rawvideo_drop_mode_empties_picture() {
        let params = StreamParams::video("rawvideo", 2, 2, Some(25.0));
        let mut driver = open(&params, "rawvideo");
        assert_eq!(
            driver.control(DriverCommand::SetFramedrop(DropMode::Standard)),
            ControlResult::Ok
        );
        let mut pkt = Packet::new(0, vec![9; 4]).with_pts(Some(0.04));
        driver.send_packet(Some(&mut pkt)).unwrap();
        let Received::Frame(frame) = driver.receive_frame().unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(frame.pts, Some(0.04));
        assert!(frame.discarded);
        match frame.data {
            crate::media::FrameData::Video(img) => assert!(img.data.is_empty()),
            _ => panic!("expected video"),
        }
    }
}
