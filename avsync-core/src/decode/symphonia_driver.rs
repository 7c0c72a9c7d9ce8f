//! General-purpose audio decoder driver backed by symphonia
//!
//! Decoded audio is always delivered as interleaved little-endian `f32`.
//! The codec's own output timestamp is the packet timestamp; the audio
//! clock in the decoder context interpolates between packets.

use super::driver::{
    ControlResult, DecoderCandidate, DecoderDriver, DriverCommand, DriverFactory, Received,
};
use crate::error::{Error, Result};
use crate::media::{AudioFormat, AudioSamples, Frame, Packet, SampleFormat, StreamKind, StreamParams};
use std::collections::VecDeque;
use symphonia::core::audio::{AudioBufferRef, Channels, Layout, SampleBuffer};
use symphonia::core::codecs::{
    CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_FLAC,
    CODEC_TYPE_MP3, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S32LE,
    CODEC_TYPE_PCM_U8, CODEC_TYPE_VORBIS,
};
use tracing::{debug, warn};

/// Family name used in preference lists
pub const FAMILY: &str = "symphonia";

/// Upper bound on frames per packet announced to PCM decoders
const MAX_FRAMES_PER_PACKET: u64 = 65_536;

/// Codec names understood by this family
const CODECS: &[(&str, CodecType)] = &[
    ("flac", CODEC_TYPE_FLAC),
    ("mp3", CODEC_TYPE_MP3),
    ("aac", CODEC_TYPE_AAC),
    ("vorbis", CODEC_TYPE_VORBIS),
    ("pcm_u8", CODEC_TYPE_PCM_U8),
    ("pcm_s16le", CODEC_TYPE_PCM_S16LE),
    ("pcm_s32le", CODEC_TYPE_PCM_S32LE),
    ("pcm_f32le", CODEC_TYPE_PCM_F32LE),
];

/// symphonia codec type for a codec name
pub fn codec_type(name: &str) -> Option<CodecType> {
    CODECS.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
}

/// Codec name for a symphonia codec type
pub fn codec_name(codec: CodecType) -> Option<&'static str> {
    CODECS.iter().find(|(_, t)| *t == codec).map(|(n, _)| *n)
}

fn bits_for_codec(name: &str) -> Option<u32> {
    match name {
        "pcm_u8" => Some(8),
        "pcm_s16le" => Some(16),
        "pcm_s32le" | "pcm_f32le" => Some(32),
        _ => None,
    }
}

fn channel_mask(count: u16) -> Channels {
    match count {
        1 => Layout::Mono.into_channels(),
        2 => Layout::Stereo.into_channels(),
        n => Channels::from_bits_truncate((1u32 << n.min(26)) - 1),
    }
}

/// Build symphonia codec parameters from container parameters
pub fn codec_parameters(params: &StreamParams) -> Option<CodecParameters> {
    let codec = codec_type(&params.codec)?;
    let mut cp = CodecParameters::new();
    cp.for_codec(codec).with_max_frames_per_packet(MAX_FRAMES_PER_PACKET);
    if params.sample_rate > 0 {
        cp.with_sample_rate(params.sample_rate);
    }
    if params.channels > 0 {
        cp.with_channels(channel_mask(params.channels));
    }
    let bits = if params.bits_per_sample > 0 {
        Some(params.bits_per_sample)
    } else {
        bits_for_codec(&params.codec)
    };
    if let Some(bits) = bits {
        cp.with_bits_per_sample(bits).with_bits_per_coded_sample(bits);
    }
    if !params.extradata.is_empty() {
        cp.with_extra_data(params.extradata.clone().into_boxed_slice());
    }
    Some(cp)
}

/// Factory for the symphonia family
pub struct SymphoniaFactory {
    options: DecoderOptions,
}

impl SymphoniaFactory {
    pub fn new() -> Self {
        Self {
            options: DecoderOptions::default(),
        }
    }
}

impl Default for SymphoniaFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverFactory for SymphoniaFactory {
    fn family(&self) -> &str {
        FAMILY
    }

    fn candidates(&self, params: &StreamParams) -> Vec<DecoderCandidate> {
        if params.kind != StreamKind::Audio {
            return Vec::new();
        }
        let Some(codec) = codec_type(&params.codec) else {
            return Vec::new();
        };
        match symphonia::default::get_codecs().get_codec(codec) {
            Some(descriptor) => vec![DecoderCandidate {
                family: FAMILY.to_string(),
                decoder: descriptor.short_name.to_string(),
                codec: params.codec.clone(),
                generic: false,
            }],
            None => Vec::new(),
        }
    }

    fn open(&self, params: &StreamParams, decoder: &str) -> Result<Box<dyn DecoderDriver>> {
        let cp = codec_parameters(params).ok_or_else(|| Error::DriverInit {
            decoder: decoder.to_string(),
            reason: format!("unsupported codec '{}'", params.codec),
        })?;
        let inner = symphonia::default::get_codecs()
            .make(&cp, &self.options)
            .map_err(|e| Error::DriverInit {
                decoder: decoder.to_string(),
                reason: e.to_string(),
            })?;
        debug!("symphonia decoder '{}' opened for {}", decoder, params.codec);
        Ok(Box::new(SymphoniaDriver {
            name: decoder.to_string(),
            decoder: inner,
            queue: VecDeque::new(),
            draining: false,
        }))
    }
}

/// Convert a decoded buffer to interleaved little-endian f32
fn interleave_f32(decoded: AudioBufferRef<'_>) -> Option<AudioSamples> {
    let spec = *decoded.spec();
    let frames = decoded.frames();
    if frames == 0 {
        return None;
    }
    let mut buffer = SampleBuffer::<f32>::new(frames as u64, spec);
    buffer.copy_interleaved_ref(decoded);

    let mut data = Vec::with_capacity(buffer.samples().len() * 4);
    for sample in buffer.samples() {
        data.extend_from_slice(&sample.to_le_bytes());
    }
    let format = AudioFormat::new(spec.rate, spec.channels.count() as u16, SampleFormat::F32);
    Some(AudioSamples::new(format, data))
}

/// One open symphonia decoder
pub struct SymphoniaDriver {
    name: String,
    decoder: Box<dyn Decoder>,
    queue: VecDeque<Frame>,
    draining: bool,
}

impl DecoderDriver for SymphoniaDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_packet(&mut self, packet: Option<&mut Packet>) -> Result<bool> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(true);
        };
        let pts = packet.pts;
        let sym_packet = symphonia::core::formats::Packet::new_from_slice(0, 0, 0, packet.data());
        let len = packet.len();
        packet.consume(len);

        let decoded = self.decoder.decode(&sym_packet).map(interleave_f32);
        match decoded {
            Ok(Some(samples)) => {
                self.queue.push_back(Frame::audio(pts, samples));
                Ok(true)
            }
            Ok(None) => Ok(true),
            Err(symphonia::core::errors::Error::ResetRequired) => {
                warn!("symphonia decoder '{}' requires reset", self.name);
                self.decoder.reset();
                Err(Error::Decode("decoder reset required".to_string()))
            }
            Err(e) => Err(e.into()),
        }
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
                self.decoder.reset();
                self.queue.clear();
                self.draining = false;
                ControlResult::Ok
            }
            // Audio is never dropped
            DriverCommand::SetFramedrop(_) => ControlResult::Unknown,
        }
    }

    fn uninit(&mut self) {
        self.queue.clear();
    }
}
