//! Per-stream decoder context
//!
//! **Architecture:**
//! - [`StreamDecoder`] owns one selected driver, at most one pending input
//!   packet and at most one decoded frame waiting to be taken
//! - [`StreamDecoder::pump`] is the single idempotent work step. It reads
//!   at most one packet from the demuxer, feeds the driver, pulls at most one
//!   frame, stamps it with a recovered timestamp and clips it to the active
//!   segment window
//! - Segment changes: the first packet of a new segment is staged while
//!   the old segment drains. Once the driver reports EOF the decoder is
//!   flushed (same codec) or reselected (different codec) and decoding
//!   resumes with the staged packet
//!
//! The drop decision for each video packet is made by the caller (see
//! [`StreamDecoder::pump`]). Frames decoded under a drop mode are stamped
//! (so the timestamp queue stays paired with the input) and then discarded
//! here.

use super::driver::{DecoderCandidate, DriverCommand, DriverRegistry, DropMode, Received, SelectedDriver};
use super::pts::{AudioPtsClock, FrameTiming, PtsRecovery, PtsStats};
use crate::config::PlayerOptions;
use crate::demux::{AsyncRead, Demuxer};
use crate::error::Result;
use crate::events::{EventSink, PlayerEvent, StreamKind};
use crate::media::{AudioFormat, Frame, Packet, Segment, StreamId, StreamParams};
use avsync_common::timing::{self, Pts};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Outcome of the most recent pump step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderStatus {
    /// A frame is buffered
    Ok,
    /// Progress was made but no frame yet; pump again
    Again,
    /// Waiting for the demuxer
    Wait,
    /// Fully drained
    Eof,
}

impl std::fmt::Display for DecoderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecoderStatus::Ok => write!(f, "ok"),
            DecoderStatus::Again => write!(f, "again"),
            DecoderStatus::Wait => write!(f, "wait"),
            DecoderStatus::Eof => write!(f, "eof"),
        }
    }
}

/// Per-stream counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DecoderStats {
    pub packets: u64,
    pub frames: u64,
    /// Decoded under a drop mode and discarded
    pub dropped: u64,
    /// Clipped away by the segment window
    pub clipped: u64,
    pub decode_errors: u64,
    pub pts_anomalies: u64,
    pub driver_switches: u32,
    /// Video only: packet timestamps are unusable, `None` while undecided
    pub broken_packet_pts: Option<bool>,
}

/// Decoder for one selected audio or video stream
pub struct StreamDecoder {
    stream: StreamId,
    params: StreamParams,
    registry: Arc<DriverRegistry>,
    options: PlayerOptions,
    events: EventSink,

    driver: Option<SelectedDriver>,
    pending_packet: Option<Packet>,
    pending_drop: DropMode,
    /// First packet of the next segment, held until the current one drains
    pending_segment: Option<Packet>,
    current_frame: Option<Frame>,
    status: DecoderStatus,
    input_eof: bool,
    /// No frame decoded since open/reset; a new segment is adopted at once
    fresh: bool,

    segment: Option<Arc<Segment>>,
    pts_offset: f64,
    drop_mode: DropMode,

    video_pts: Option<PtsRecovery>,
    audio_clock: AudioPtsClock,
    audio_format: Option<AudioFormat>,
    stats: DecoderStats,
}

impl StreamDecoder {
    /// Create the decoder and select a driver
    ///
    /// A stream without any usable driver is still returned; it reports
    /// [`DecoderStatus::Eof`] and never produces frames.
    pub fn open(
        stream: StreamId,
        params: StreamParams,
        registry: Arc<DriverRegistry>,
        options: &PlayerOptions,
        events: EventSink,
    ) -> Self {
        let video_pts = (params.kind == StreamKind::Video).then(|| PtsRecovery::new(&params, options));
        let mut decoder = Self {
            stream,
            params,
            registry,
            options: options.clone(),
            events,
            driver: None,
            pending_packet: None,
            pending_drop: DropMode::None,
            pending_segment: None,
            current_frame: None,
            status: DecoderStatus::Again,
            input_eof: false,
            fresh: true,
            segment: None,
            pts_offset: 0.0,
            drop_mode: DropMode::None,
            video_pts,
            audio_clock: AudioPtsClock::new(options.audio_sync_tuning.pts_snap),
            audio_format: None,
            stats: DecoderStats::default(),
        };
        decoder.select_driver();
        decoder
    }

    fn preferences(&self) -> &[String] {
        match self.params.kind {
            StreamKind::Audio => &self.options.audio_decoders,
            StreamKind::Video => &self.options.video_decoders,
        }
    }

    fn select_driver(&mut self) {
        if let Some(mut old) = self.driver.take() {
            old.driver.uninit();
        }
        let kind = self.params.kind;
        match self.registry.select(&self.params, self.preferences()) {
            Ok(selected) => {
                let DecoderCandidate {
                    family,
                    decoder,
                    codec,
                    ..
                } = selected.candidate.clone();
                self.events.emit_with(|session_id, timestamp| PlayerEvent::DecoderSelected {
                    session_id,
                    stream: kind,
                    codec,
                    family,
                    decoder,
                    timestamp,
                });
                self.driver = Some(selected);
                self.drop_mode = DropMode::None;
                self.status = DecoderStatus::Again;
            }
            Err(e) => {
                warn!("No {} decoder for stream {}: {}", kind, self.stream, e);
                let codec = self.params.codec.clone();
                self.events.emit_with(|session_id, timestamp| PlayerEvent::DecoderUnavailable {
                    session_id,
                    stream: kind,
                    codec,
                    timestamp,
                });
                self.status = DecoderStatus::Eof;
            }
        }
    }

    // ========================================
    // Accessors
    // ========================================

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn kind(&self) -> StreamKind {
        self.params.kind
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// A driver is selected
    pub fn is_available(&self) -> bool {
        self.driver.is_some()
    }

    pub fn decoder_name(&self) -> Option<String> {
        self.driver.as_ref().map(|d| d.candidate.to_string())
    }

    pub fn status(&self) -> DecoderStatus {
        self.status
    }

    pub fn peek_frame(&self) -> Option<&Frame> {
        self.current_frame.as_ref()
    }

    /// Hand the buffered frame to the caller
    pub fn take_frame(&mut self) -> Option<Frame> {
        let frame = self.current_frame.take();
        if frame.is_some() && self.status == DecoderStatus::Ok {
            self.status = DecoderStatus::Again;
        }
        frame
    }

    /// Format of the decoded audio, known after the first frame
    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.audio_format
    }

    /// End of everything decoded so far (audio)
    pub fn audio_pts(&self) -> Pts {
        self.audio_clock.current()
    }

    /// Nominal duration of one video frame
    pub fn frame_time(&self) -> f64 {
        self.video_pts
            .as_ref()
            .map(PtsRecovery::frame_time)
            .unwrap_or_else(|| self.options.fallback_frame_time())
    }

    /// Last timestamp accepted for presentation (video)
    pub fn last_pts(&self) -> Pts {
        self.video_pts.as_ref().and_then(PtsRecovery::last_pts)
    }

    pub fn pts_stats(&self) -> PtsStats {
        self.video_pts.as_ref().map(PtsRecovery::stats).unwrap_or_default()
    }

    pub fn has_broken_packet_pts(&self) -> Option<bool> {
        self.video_pts.as_ref().and_then(PtsRecovery::has_broken_packet_pts)
    }

    pub fn stats(&self) -> DecoderStats {
        let mut stats = self.stats;
        stats.pts_anomalies = self.pts_stats().anomalies();
        stats.broken_packet_pts = self.has_broken_packet_pts();
        stats
    }

    pub fn segment(&self) -> Option<&Arc<Segment>> {
        self.segment.as_ref()
    }

    /// Offset added to every packet timestamp (timeline part mapping)
    pub fn set_pts_offset(&mut self, offset: f64) {
        self.pts_offset = offset;
    }

    /// Enforce monotonic presentation for a frame about to be shown
    pub fn fix_monotonic(&mut self, pts: f64) -> FrameTiming {
        match self.video_pts.as_mut() {
            Some(rec) => rec.fix_monotonic(pts),
            None => FrameTiming {
                pts,
                frame_time: 0.0,
                discontinuity: false,
            },
        }
    }

    // ========================================
    // Reset
    // ========================================

    /// Flush all decoder state after a seek
    ///
    /// Buffered packets and frames are discarded without waiting for the
    /// driver; the driver itself stays open.
    pub fn reset(&mut self) {
        if let Some(selected) = self.driver.as_mut() {
            selected.driver.control(DriverCommand::Reset);
            if self.drop_mode != DropMode::None {
                selected.driver.control(DriverCommand::SetFramedrop(DropMode::None));
            }
        }
        self.drop_mode = DropMode::None;
        self.pending_packet = None;
        self.pending_drop = DropMode::None;
        self.pending_segment = None;
        self.current_frame = None;
        self.input_eof = false;
        self.fresh = true;
        if let Some(rec) = self.video_pts.as_mut() {
            rec.reset();
        }
        self.audio_clock.reset();
        self.status = if self.driver.is_some() {
            DecoderStatus::Again
        } else {
            DecoderStatus::Eof
        };
    }

    // ========================================
    // Pump
    // ========================================

    /// One non-blocking work step
    ///
    /// `framedrop` is consulted once per video packet taken from the
    /// demuxer, with the packet's timestamp.
    pub fn pump(&mut self, demuxer: &mut dyn Demuxer, framedrop: &mut dyn FnMut(Pts) -> DropMode) -> DecoderStatus {
        self.step(demuxer, framedrop, false)
    }

    /// Pump with blocking reads until a frame is buffered or the stream ends
    pub fn pump_blocking(&mut self, demuxer: &mut dyn Demuxer, framedrop: &mut dyn FnMut(Pts) -> DropMode) -> DecoderStatus {
        loop {
            let status = self.step(demuxer, framedrop, true);
            if status != DecoderStatus::Again {
                return status;
            }
        }
    }

    fn step(&mut self, demuxer: &mut dyn Demuxer, framedrop: &mut dyn FnMut(Pts) -> DropMode, blocking: bool) -> DecoderStatus {
        if self.current_frame.is_some() {
            return self.status;
        }
        if self.driver.is_none() {
            self.status = DecoderStatus::Eof;
            return self.status;
        }

        if self.pending_packet.is_none() && self.pending_segment.is_none() && !self.input_eof {
            match self.fetch_packet(demuxer, blocking) {
                Ok(Some(packet)) => self.accept_packet(packet, framedrop),
                Ok(None) => {
                    if !self.input_eof {
                        // Nothing to feed; still collect output already queued
                        return match self.receive() {
                            DecoderStatus::Again => {
                                self.status = DecoderStatus::Wait;
                                self.status
                            }
                            status => status,
                        };
                    }
                }
                Err(e) => {
                    warn!("Demuxer read failed on stream {}: {}", self.stream, e);
                    self.input_eof = true;
                }
            }
        }

        if let Some(status) = self.feed() {
            return status;
        }
        self.receive()
    }

    fn fetch_packet(&mut self, demuxer: &mut dyn Demuxer, blocking: bool) -> Result<Option<Packet>> {
        loop {
            let packet = if blocking {
                match demuxer.read_packet_blocking(self.stream)? {
                    Some(p) => p,
                    None => {
                        self.input_eof = true;
                        return Ok(None);
                    }
                }
            } else {
                match demuxer.read_packet_async(self.stream)? {
                    AsyncRead::Packet(p) => p,
                    AsyncRead::WouldBlock => return Ok(None),
                    AsyncRead::Eof => {
                        self.input_eof = true;
                        return Ok(None);
                    }
                }
            };
            // Fixed-rate containers emit empty placeholders for repeated frames
            if self.params.kind == StreamKind::Video && packet.is_empty() {
                trace!("Skipping zero-length video packet");
                continue;
            }
            let mut packet = packet;
            if self.pts_offset != 0.0 {
                packet.shift_timestamps(self.pts_offset);
            }
            return Ok(Some(packet));
        }
    }

    /// Route a fresh packet: stage a segment change or queue it for the driver
    fn accept_packet(&mut self, packet: Packet, framedrop: &mut dyn FnMut(Pts) -> DropMode) {
        self.stats.packets += 1;
        if let Some(seg) = packet.segment.clone() {
            let changed = match &self.segment {
                None => true,
                Some(active) => !active.same_window(&seg) || !active.same_codec(&seg),
            };
            if changed {
                if self.segment.is_none() || self.fresh {
                    self.switch_segment(seg);
                } else {
                    debug!(
                        "Stream {}: staging segment [{}, {})",
                        self.stream,
                        timing::format_pts(seg.start),
                        timing::format_pts(seg.end)
                    );
                    self.pending_segment = Some(packet);
                    return;
                }
            }
        }
        self.pending_drop = self.drop_decision(packet.pts, framedrop);
        if let Some(rec) = self.video_pts.as_mut() {
            rec.packet_in(packet.pts);
        }
        self.pending_packet = Some(packet);
    }

    fn drop_decision(&self, pts: Pts, framedrop: &mut dyn FnMut(Pts) -> DropMode) -> DropMode {
        if self.params.kind != StreamKind::Video {
            return DropMode::None;
        }
        framedrop(pts)
    }

    /// Send the pending packet (or the end-of-input flush)
    ///
    /// Returns a status when the step is finished without receiving.
    fn feed(&mut self) -> Option<DecoderStatus> {
        let drop_mode = self.pending_drop;
        let selected = self.driver.as_mut()?;
        if let Some(mut packet) = self.pending_packet.take() {
            if drop_mode != self.drop_mode {
                selected.driver.control(DriverCommand::SetFramedrop(drop_mode));
                self.drop_mode = drop_mode;
            }
            match selected.driver.send_packet(Some(&mut packet)) {
                Ok(true) => {}
                Ok(false) => {
                    if !packet.is_consumed() {
                        self.pending_packet = Some(packet);
                    }
                }
                Err(e) => {
                    warn!("Decoding error on stream {} ({}): {}", self.stream, selected.candidate, e);
                    self.stats.decode_errors += 1;
                    self.status = DecoderStatus::Again;
                    return Some(self.status);
                }
            }
        } else if self.input_eof || self.pending_segment.is_some() {
            if let Err(e) = selected.driver.send_packet(None) {
                warn!("Flushing stream {} failed: {}", self.stream, e);
                self.stats.decode_errors += 1;
            }
        }
        None
    }

    fn receive(&mut self) -> DecoderStatus {
        let Some(selected) = self.driver.as_mut() else {
            self.status = DecoderStatus::Eof;
            return self.status;
        };
        let received = match selected.driver.receive_frame() {
            Ok(r) => r,
            Err(e) => {
                warn!("Decoding error on stream {} ({}): {}", self.stream, selected.candidate, e);
                self.stats.decode_errors += 1;
                self.status = DecoderStatus::Again;
                return self.status;
            }
        };
        self.status = match received {
            Received::Frame(frame) => self.process_frame(frame),
            Received::Pending => DecoderStatus::Again,
            Received::Eof => match self.pending_segment.take() {
                Some(packet) => {
                    if let Some(seg) = packet.segment.clone() {
                        self.switch_segment(seg);
                    }
                    self.input_eof = false;
                    self.pending_drop = DropMode::None;
                    if let Some(rec) = self.video_pts.as_mut() {
                        rec.packet_in(packet.pts);
                    }
                    self.pending_packet = Some(packet);
                    DecoderStatus::Again
                }
                None if self.input_eof => DecoderStatus::Eof,
                // Driver drained without being flushed; keep feeding
                None => DecoderStatus::Again,
            },
        };
        self.status
    }

    fn process_frame(&mut self, mut frame: Frame) -> DecoderStatus {
        self.fresh = false;
        self.stats.frames += 1;

        match self.params.kind {
            StreamKind::Video => {
                if let Some(rec) = self.video_pts.as_mut() {
                    frame.pts = Some(rec.stamp(frame.pts).pts);
                }
                if frame.discarded {
                    trace!("Discarding dropped frame {}", timing::format_pts(frame.pts));
                    self.stats.dropped += 1;
                    return DecoderStatus::Again;
                }
            }
            StreamKind::Audio => {
                let Some(samples) = frame.samples() else {
                    return DecoderStatus::Again;
                };
                let format = samples.format;
                let bytes = samples.data.len();
                if self.audio_format != Some(format) {
                    if let Some(old) = self.audio_format {
                        info!("Audio format changed: {:?} -> {:?}", old, format);
                    }
                    self.audio_format = Some(format);
                }
                frame.pts = self.audio_clock.on_decoded(frame.pts, bytes, format.bytes_per_second());
            }
        }

        let (start, end) = match &self.segment {
            Some(seg) => (seg.start, seg.end),
            None => (None, None),
        };
        if !frame.clip(start, end) {
            self.stats.clipped += 1;
            return DecoderStatus::Again;
        }
        self.current_frame = Some(frame);
        DecoderStatus::Ok
    }

    /// Activate a new segment: flush for the same codec, reselect otherwise
    fn switch_segment(&mut self, seg: Arc<Segment>) {
        let same_codec = self.segment.as_ref().map_or(true, |active| active.same_codec(&seg))
            && seg.params.codec == self.params.codec;
        if same_codec {
            if let Some(selected) = self.driver.as_mut() {
                selected.driver.control(DriverCommand::Reset);
            }
        } else {
            info!(
                "Stream {}: codec change {} -> {}",
                self.stream, self.params.codec, seg.params.codec
            );
            self.params = seg.params.clone();
            if let (Some(rec), Some(fps)) = (self.video_pts.as_mut(), seg.params.fps) {
                rec.set_fps(fps);
            }
            self.select_driver();
            self.stats.driver_switches += 1;
        }
        self.drop_mode = DropMode::None;
        self.segment = Some(seg);
    }
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("stream", &self.stream)
            .field("kind", &self.params.kind)
            .field("decoder", &self.decoder_name())
            .field("status", &self.status)
            .finish()
    }
}
