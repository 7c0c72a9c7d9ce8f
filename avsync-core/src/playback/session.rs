//! Playback session: per-file owner of every component and the tick scheduler
//!
//! **Architecture:**
//! - One [`PlaybackSession`] per opened file (or timeline). It owns the
//!   packet sources, one [`StreamDecoder`] plus output per active stream,
//!   the sync clock, the framedrop controller and the seek machinery.
//! - [`PlaybackSession::tick`] does a bounded amount of work and returns
//!   how long the caller may sleep before the next tick. The session never
//!   blocks on a demuxer; a stalled stream reports `Wait` and the
//!   [`WakeupHandle`] cuts the sleep short once data arrives.
//! - Audio is the master clock. Video frames are scheduled against the
//!   amount of audio the device still has queued; late frames are dropped
//!   before decoding, never audio.
//!
//! **Tick order:**
//! 1. Accept deferred seek requests and execute a queued seek
//! 2. Top up the audio device
//! 3. Decode/present video (or restart after a seek)
//! 4. End-of-segment / end-of-file detection
//! 5. Frame-step and stop conditions, backstep continuation
//! 6. Sleep computation

use super::clock::Clock;
use super::framedrop::{DropInputs, FramedropController, FramedropStats};
use super::seek::{
    BackstepState, HrSeekWindow, PtsHistory, SeekDirection, SeekExactness, SeekQueue, SeekRequest,
    SeekTarget, BACKSTEP_INDEX_MARGIN, BACKSTEP_LOOKBACK, BACKSTEP_WIDE_LOOKBACK, SEEK_BURST_WINDOW,
};
use super::state::{PlaybackFailure, PlayerState, SessionPhase, StateMachine};
use super::sync::SyncState;
use super::timeline::Timeline;
use crate::config::{HrSeekPolicy, PlayerOptions};
use crate::decode::{DecoderStats, DecoderStatus, DriverRegistry, DropMode, StreamDecoder};
use crate::demux::{DemuxSeekFlags, DemuxSeekTarget, Demuxer, WakeupHandle};
use crate::error::{Error, Result};
use crate::events::{EventSink, PlayerEvent, SessionCommand, StepDirection, StreamKind};
use crate::media::Frame;
use crate::output::{AudioOutput, VideoOutput, WriteFlags};
use avsync_common::timing::{self, Pts};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Frames due within this many seconds are presented now
const PRESENT_SLACK: f64 = 0.005;

/// Pump steps spent on video per tick
const VIDEO_PUMP_BUDGET: usize = 16;

/// Without usable audio timing, video later than this restarts its clock
const LATE_VIDEO_RESET: f64 = 0.2;

/// A device delay below this at end of stream counts as drained
const AUDIO_DRAIN_DELAY: f64 = 0.04;

/// Audio refill margin before the device runs dry
const AUDIO_REFILL_MARGIN: f64 = 0.05;

/// Shortest and default audio refill sleeps
const AUDIO_SLEEP_MIN: f64 = 0.02;
const AUDIO_SLEEP_LARGE_BUFFER: f64 = 0.1;
const AUDIO_SLEEP_EXTRA_MARGIN: f64 = 0.2;

/// A-V difference and drop count above which the "system too slow" warning fires
const DESYNC_WARN_DIFFERENCE: f64 = 0.5;
const DESYNC_WARN_DROPS: u64 = 50;

/// Outputs the session pushes into
#[derive(Default)]
pub struct SessionOutputs {
    pub audio: Option<Box<dyn AudioOutput>>,
    pub video: Option<Box<dyn VideoOutput>>,
}

/// Serializable session summary
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStats {
    pub state: PlayerState,
    pub phase: SessionPhase,
    pub paused: bool,
    pub position: f64,
    pub shown_frames: u64,
    /// Video frames dropped to catch up with audio
    pub dropped_frames: u64,
    /// Frames decoded but skipped to land exactly on a seek target
    pub hrseek_skipped: u64,
    pub decode_errors: u64,
    pub pts_anomalies: u64,
    pub total_drift_correction: f64,
    pub last_av_difference: Pts,
    pub seeks: u64,
    pub failed_seeks: u64,
    pub audio: Option<DecoderStats>,
    pub video: Option<DecoderStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioFill {
    /// The device got everything it had room for
    Full,
    /// Less than the device could take (waiting for data or bounded by the end)
    Partial,
    /// Nothing left to write, ever
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioDecode {
    Filled,
    Wait,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartSync {
    Decoded(AudioDecode),
    /// Only silence was written; keep syncing on the next tick
    PlayDone,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum VideoUpdate {
    /// A frame was loaded into the output; carries its frame time
    Frame(f64),
    NoFrameYet,
    Eof,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    shown: u64,
    hrseek_skipped: u64,
    seeks: u64,
    failed_seeks: u64,
}

struct AudioChain {
    decoder: StreamDecoder,
    output: Box<dyn AudioOutput>,
    /// Decoded bytes the device has not accepted yet
    buffer: Vec<u8>,
    /// Decoder reached end of stream (or the end bound)
    eof: bool,
    format_checked: bool,
}

impl AudioChain {
    fn new(decoder: StreamDecoder, output: Box<dyn AudioOutput>) -> Self {
        Self {
            decoder,
            output,
            buffer: Vec::new(),
            eof: false,
            format_checked: false,
        }
    }

    fn append(&mut self, frame: Frame) {
        let Some(samples) = frame.into_samples() else {
            return;
        };
        if !self.format_checked {
            let device = self.output.format();
            if samples.format != device {
                warn!(
                    "Decoded audio format {:?} differs from output format {:?}",
                    samples.format, device
                );
            }
            self.format_checked = true;
        }
        self.buffer.extend_from_slice(&samples.data);
    }
}

struct VideoChain {
    decoder: StreamDecoder,
    output: Box<dyn VideoOutput>,
    /// Timestamp of the frame loaded into the output, not yet shown
    loaded: Pts,
    /// Timestamp of the newest frame taken from the decoder
    decoded_pts: Pts,
    /// Something has been shown since the last reset
    has_shown: bool,
}

impl VideoChain {
    fn new(decoder: StreamDecoder, output: Box<dyn VideoOutput>) -> Self {
        Self {
            decoder,
            output,
            loaded: None,
            decoded_pts: None,
            has_shown: false,
        }
    }
}

/// Open a decoder for the first stream of `kind`, or `None` if it cannot play
fn open_decoder(
    demuxer: &dyn Demuxer,
    kind: StreamKind,
    registry: &Arc<DriverRegistry>,
    options: &PlayerOptions,
    events: &EventSink,
    pts_offset: f64,
) -> Option<StreamDecoder> {
    let (stream, params) = demuxer
        .streams()
        .iter()
        .enumerate()
        .find(|(_, p)| p.kind == kind)
        .map(|(i, p)| (i, p.clone()))?;
    let mut decoder = StreamDecoder::open(stream, params, Arc::clone(registry), options, events.clone());
    if !decoder.is_available() {
        warn!("No usable decoder for {} stream {}; playing without it", kind, stream);
        return None;
    }
    decoder.set_pts_offset(pts_offset);
    Some(decoder)
}

/// Decode-and-sync session for one file
pub struct PlaybackSession {
    options: PlayerOptions,
    registry: Arc<DriverRegistry>,
    clock: Arc<dyn Clock>,
    events: EventSink,
    wakeup: WakeupHandle,

    sources: Vec<Box<dyn Demuxer>>,
    source: usize,
    timeline: Option<Timeline>,
    part: usize,
    video_offset: f64,

    audio: Option<AudioChain>,
    video: Option<VideoChain>,

    state: PlayerState,
    phase: SessionPhase,
    paused: bool,

    sync: SyncState,
    framedrop: FramedropController,

    incoming_seeks: VecDeque<SeekRequest>,
    seeks: SeekQueue,
    hrseek: Option<HrSeekWindow>,
    history: PtsHistory,
    backstep: BackstepState,

    /// Timestamp of the shown frame (or the target of the last seek)
    video_pts: Pts,
    /// Timestamp of the shown frame only
    last_vo_pts: Pts,
    /// Position reported upward
    playback_pts: Pts,
    last_seek_pts: Pts,
    seek_started_at: f64,
    last_time: f64,

    step_frames: u32,
    frames_left: Option<u64>,
    stall_since: Option<f64>,
    desync_warned: bool,
    reported_drops: u64,
    counters: Counters,
}

impl PlaybackSession {
    /// Build a session over `sources`
    ///
    /// Without a timeline the first source is played. Streams whose
    /// decoder cannot be opened are left out; the session fails only when
    /// neither audio nor video remains.
    pub fn new(
        mut sources: Vec<Box<dyn Demuxer>>,
        timeline: Option<Timeline>,
        outputs: SessionOutputs,
        options: PlayerOptions,
        registry: Arc<DriverRegistry>,
        clock: Arc<dyn Clock>,
        events: EventSink,
    ) -> Result<Self> {
        options.validate()?;
        if sources.is_empty() {
            return Err(Error::InvalidState("session needs at least one source".to_string()));
        }
        if let Some(t) = &timeline {
            if (0..t.len()).filter_map(|i| t.part(i)).any(|p| p.source >= sources.len()) {
                return Err(Error::Config("timeline part refers to a missing source".to_string()));
            }
        }

        let wakeup = WakeupHandle::new();
        for source in sources.iter_mut() {
            source.set_wakeup(wakeup.clone());
        }

        let source = timeline.as_ref().and_then(|t| t.part(0)).map_or(0, |p| p.source);
        let video_offset = timeline.as_ref().map_or(0.0, |t| t.video_offset(0));
        let demuxer = sources[source].as_ref();

        let SessionOutputs { audio, video } = outputs;
        let audio = audio.and_then(|output| {
            open_decoder(demuxer, StreamKind::Audio, &registry, &options, &events, video_offset)
                .map(|decoder| AudioChain::new(decoder, output))
        });
        let video = video.and_then(|output| {
            open_decoder(demuxer, StreamKind::Video, &registry, &options, &events, video_offset)
                .map(|decoder| VideoChain::new(decoder, output))
        });
        if audio.is_none() && video.is_none() {
            return Err(Error::InvalidState("no playable audio or video stream".to_string()));
        }

        info!(
            "Playback session {}: audio={}, video={}, sources={}",
            events.session_id(),
            audio.as_ref().and_then(|a| a.decoder.decoder_name()).unwrap_or_else(|| "none".into()),
            video.as_ref().and_then(|v| v.decoder.decoder_name()).unwrap_or_else(|| "none".into()),
            sources.len()
        );

        let now = clock.now();
        let mut session = Self {
            framedrop: FramedropController::new(options.framedrop),
            frames_left: options.max_frames,
            options,
            registry,
            clock,
            events,
            wakeup,
            sources,
            source,
            timeline,
            part: 0,
            video_offset,
            audio,
            video,
            state: PlayerState::Running,
            phase: SessionPhase::Restarting,
            paused: false,
            sync: SyncState::new(),
            incoming_seeks: VecDeque::new(),
            seeks: SeekQueue::new(),
            hrseek: None,
            history: PtsHistory::new(),
            backstep: BackstepState::default(),
            video_pts: None,
            last_vo_pts: None,
            playback_pts: None,
            last_seek_pts: None,
            seek_started_at: f64::NEG_INFINITY,
            last_time: now,
            step_frames: 0,
            stall_since: None,
            desync_warned: false,
            reported_drops: 0,
            counters: Counters::default(),
        };
        if session.timeline.is_some() {
            // Initialize part state and skip frames before the first part
            session.seeks.queue(SeekRequest::absolute(0.0));
        }
        Ok(session)
    }

    // ========================================
    // Accessors
    // ========================================

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    /// Handle the demuxers fire when a waiting stream gets data
    pub fn wakeup_handle(&self) -> WakeupHandle {
        self.wakeup.clone()
    }

    /// Status of the last pump of the given stream, if it is active
    pub fn decoder_status(&self, kind: StreamKind) -> Option<DecoderStatus> {
        match kind {
            StreamKind::Audio => self.audio.as_ref().map(|a| a.decoder.status()),
            StreamKind::Video => self.video.as_ref().map(|v| v.decoder.status()),
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Active timeline part
    pub fn current_part(&self) -> usize {
        self.part
    }

    /// Best known playback position
    pub fn current_time(&self) -> f64 {
        self.playback_pts.or(self.last_seek_pts).unwrap_or(0.0)
    }

    pub fn duration(&self) -> Option<f64> {
        match &self.timeline {
            Some(t) => Some(t.duration()),
            None => self.sources[self.source].duration(),
        }
    }

    pub fn last_av_difference(&self) -> Pts {
        self.sync.last_av_difference
    }

    pub fn framedrop_stats(&self) -> FramedropStats {
        self.framedrop.stats()
    }

    pub fn stats(&self) -> PlaybackStats {
        let audio = self.audio.as_ref().map(|a| a.decoder.stats());
        let video = self.video.as_ref().map(|v| v.decoder.stats());
        let sum = |f: fn(&DecoderStats) -> u64| audio.iter().chain(video.iter()).map(f).sum::<u64>();
        let decode_errors = sum(|s| s.decode_errors);
        let pts_anomalies = sum(|s| s.pts_anomalies);
        PlaybackStats {
            state: self.state.clone(),
            phase: self.phase,
            paused: self.paused,
            position: self.current_time(),
            shown_frames: self.counters.shown,
            dropped_frames: self.framedrop.stats().total,
            hrseek_skipped: self.counters.hrseek_skipped,
            decode_errors,
            pts_anomalies,
            total_drift_correction: self.sync.total_drift_correction,
            last_av_difference: self.sync.last_av_difference,
            seeks: self.counters.seeks,
            failed_seeks: self.counters.failed_seeks,
            audio,
            video,
        }
    }

    // ========================================
    // Control
    // ========================================

    /// Queue a seek; it runs at the start of the next tick
    ///
    /// While the session is restarting from a seek less than 0.3 s old,
    /// new requests wait until a frame has been shown.
    pub fn request_seek(&mut self, request: SeekRequest) {
        debug!("Seek requested: {:?}", request);
        self.incoming_seeks.push_back(request);
    }

    /// Flush all decoders and restart at the current position
    pub fn request_reset(&mut self) {
        let position = self.current_time();
        debug!("Reset requested at {}", timing::format_pts(Some(position)));
        self.seeks
            .queue(SeekRequest::absolute(position).with_exactness(SeekExactness::Exact));
    }

    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        debug!("Pausing");
        self.paused = true;
        self.step_frames = 0;
        if let Some(audio) = self.audio.as_mut() {
            audio.output.pause();
        }
        let elapsed = self.relative_time();
        self.sync.time_frame -= elapsed;
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        debug!("Resuming");
        self.paused = false;
        if let Some(audio) = self.audio.as_mut() {
            audio.output.resume();
        }
        // Time spent paused does not count against the next frame
        self.relative_time();
    }

    /// Step one displayed frame forward or backward, leaving playback paused
    pub fn step_frame(&mut self, direction: StepDirection) {
        match direction {
            StepDirection::Forward => {
                self.step_frames += 1;
                self.resume();
            }
            StepDirection::Backward => {
                if !self.backstep.active && self.hrseek.is_none() {
                    self.backstep.start(self.history.epoch());
                    self.pause();
                }
            }
        }
    }

    pub fn stop(&mut self) -> Result<()> {
        info!("Stopping playback");
        if self.has_pending_seek() {
            debug!("Dropping pending seeks");
        }
        self.seeks.clear();
        self.incoming_seeks.clear();
        self.set_state(PlayerState::Stopped)
    }

    /// A requested seek has not been carried out yet
    pub fn has_pending_seek(&self) -> bool {
        self.seeks.is_pending() || !self.incoming_seeks.is_empty()
    }

    pub fn handle_command(&mut self, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::Seek(request) => self.request_seek(request),
            SessionCommand::Reset => self.request_reset(),
            SessionCommand::Pause => self.pause(),
            SessionCommand::Resume => self.resume(),
            SessionCommand::StepFrame(direction) => self.step_frame(direction),
            SessionCommand::Stop => self.stop()?,
        }
        Ok(())
    }

    // ========================================
    // Tick
    // ========================================

    /// Run one scheduler step; returns the seconds the caller may sleep
    pub fn tick(&mut self) -> Result<f64> {
        if self.state.is_terminal() {
            return Ok(self.options.wakeup_period);
        }
        match self.run_tick() {
            Ok(sleep) => Ok(sleep),
            Err(Error::Output(reason)) => {
                self.fail(PlaybackFailure::Output(reason))?;
                Ok(0.0)
            }
            Err(e) => Err(e),
        }
    }

    fn run_tick(&mut self) -> Result<f64> {
        if self.state == PlayerState::AtEndOfSegment {
            self.set_state(PlayerState::Running)?;
        }
        let now = self.clock.now();
        self.accept_seeks(now);
        if let Some(request) = self.seeks.take() {
            self.seek(request, false)?;
            if self.state.is_terminal() {
                return Ok(0.0);
            }
        }

        let (endpts, end_is_chapter) = self.end_pts();
        let was_restart = self.phase == SessionPhase::Restarting;
        let untimed = self.audio.as_ref().is_some_and(|a| a.output.untimed());
        let has_audio = self.audio.is_some();
        let has_video = self.video.is_some();
        let mut sleep = self.options.wakeup_period;
        let mut full_audio = false;
        let mut audio_left = false;

        if has_audio && self.phase != SessionPhase::Restarting && !untimed {
            let fill = self.fill_audio(endpts)?;
            full_audio = fill == AudioFill::Full;
            audio_left = fill != AudioFill::Drained;
        }
        if self.state.is_terminal() {
            return Ok(0.0);
        }

        let (video_left, mut frame_shown) = if has_video {
            self.run_video(endpts, full_audio, &mut sleep)?
        } else {
            (false, false)
        };

        if has_audio {
            let refill = if self.phase == SessionPhase::Restarting {
                !video_left
            } else {
                untimed && (self.sync.audio_write_delay <= 0.0 || !video_left)
            };
            if refill {
                let fill = self.fill_audio(endpts)?;
                full_audio = fill == AudioFill::Full && !untimed;
                audio_left = fill != AudioFill::Drained;
            }
        }
        if self.phase == SessionPhase::Restarting && !video_left {
            self.set_phase(SessionPhase::Playing)?;
            self.announce_restart();
        }
        if self.state.is_terminal() {
            return Ok(0.0);
        }

        let buffered_audio = self
            .audio
            .as_ref()
            .map(|a| if self.paused { 0.0 } else { a.output.delay() });

        if !video_left && (!self.paused || was_restart) {
            if let Some(buffered) = buffered_audio {
                if let Some(written) = self.written_audio_pts() {
                    self.playback_pts = Some(written - self.options.speed * buffered);
                }
            }
        }

        let drained = self.options.gapless_audio
            || buffered_audio.map_or(true, |b| b < self.options.audio_sync_tuning.eof_tolerance);
        if (has_audio || has_video) && !audio_left && !video_left && drained && (!self.paused || was_restart) {
            self.reach_end(end_is_chapter)?;
            sleep = 0.0;
        }

        if !self.state.is_terminal() && self.phase != SessionPhase::Restarting {
            // Without video, one tick counts as one frame
            if !video_left {
                frame_shown = true;
            }
            if let Some(left) = self.frames_left.as_mut() {
                if frame_shown {
                    *left = left.saturating_sub(1);
                }
                if *left == 0 {
                    info!("Frame limit reached");
                    self.set_state(PlayerState::Stopped)?;
                }
            }
            if self.step_frames > 0 && !self.paused {
                if frame_shown {
                    self.step_frames -= 1;
                }
                if self.step_frames == 0 {
                    self.pause();
                }
            }
        }

        if has_audio && !self.paused {
            let buffered = buffered_audio.unwrap_or(0.0);
            let audio_sleep = if untimed {
                if video_left {
                    f64::INFINITY
                } else {
                    0.0
                }
            } else if full_audio {
                let s = buffered - AUDIO_REFILL_MARGIN;
                if s > AUDIO_SLEEP_LARGE_BUFFER {
                    (s - AUDIO_SLEEP_EXTRA_MARGIN).max(AUDIO_SLEEP_LARGE_BUFFER)
                } else {
                    s.max(AUDIO_SLEEP_MIN)
                }
            } else {
                AUDIO_SLEEP_MIN
            };
            sleep = sleep.min(audio_sleep);
        }

        self.handle_backstep()?;
        if self.seeks.is_pending() || (!self.incoming_seeks.is_empty() && !self.seek_deferred(now)) {
            sleep = 0.0;
        } else if !self.incoming_seeks.is_empty() {
            sleep = sleep.min(self.seek_started_at + SEEK_BURST_WINDOW - now);
        }
        trace!("Tick done: sleep {:.3}s, phase {}", sleep, self.phase);
        Ok(sleep.max(0.0))
    }

    /// Seconds since the last call
    fn relative_time(&mut self) -> f64 {
        let now = self.clock.now();
        let elapsed = now - self.last_time;
        self.last_time = now;
        elapsed
    }

    /// End bound for this part and whether it is a part boundary
    fn end_pts(&self) -> (Pts, bool) {
        let mut endpts = self.options.play_end;
        let mut end_is_chapter = false;
        if let Some(t) = &self.timeline {
            let end = t.part_end(self.part);
            if endpts.map_or(true, |e| end < e) {
                endpts = Some(end);
                end_is_chapter = true;
            }
        }
        (endpts, end_is_chapter)
    }

    fn reach_end(&mut self, end_is_chapter: bool) -> Result<()> {
        let next_start = self
            .timeline
            .as_ref()
            .filter(|_| end_is_chapter)
            .and_then(|t| t.part(self.part + 1))
            .map(|p| p.start);
        match next_start {
            Some(start) => {
                let part_index = self.part;
                info!("End of timeline part {}", part_index);
                self.events.emit_with(|session_id, timestamp| PlayerEvent::SegmentEnded {
                    session_id,
                    part_index,
                    timestamp,
                });
                self.set_state(PlayerState::AtEndOfSegment)?;
                self.seek(SeekRequest::absolute(start), true)
            }
            None => self.reach_file_end(),
        }
    }

    fn reach_file_end(&mut self) -> Result<()> {
        if self.options.keep_open {
            if !self.paused {
                info!("End of file reached, keeping last frame open");
                self.pause();
            }
            return Ok(());
        }
        info!("End of file reached");
        self.set_state(PlayerState::EndOfFile)
    }

    // ========================================
    // Video
    // ========================================

    /// Video part of a tick; returns (video left, new frame shown)
    fn run_video(&mut self, endpts: Pts, full_audio: bool, sleep: &mut f64) -> Result<(bool, bool)> {
        let restarting = self.phase == SessionPhase::Restarting;
        let speed = self.options.speed;
        let Some(chain) = self.video.as_ref() else {
            return Ok((false, false));
        };
        let loaded = chain.loaded.is_some();
        let mut video_left = chain.has_shown || loaded;

        if !loaded && (!self.paused || restarting) {
            match self.update_video(endpts)? {
                VideoUpdate::Frame(frame_time) => {
                    video_left = true;
                    if !restarting {
                        self.sync.time_frame += frame_time / speed;
                        self.adjust_sync(frame_time);
                    }
                }
                VideoUpdate::NoFrameYet => video_left = true,
                VideoUpdate::Eof => {
                    video_left = false;
                    self.sync.audio_write_delay = 0.0;
                    self.sync.last_av_difference = Some(0.0);
                }
            }
        }

        let Some(chain) = self.video.as_ref() else {
            return Ok((false, false));
        };
        if let (Some(end), Some(pts)) = (endpts, chain.decoded_pts) {
            if pts >= end {
                video_left = false;
            }
        }
        if !video_left || (self.paused && !restarting) {
            return Ok((video_left, false));
        }
        let Some(pts) = chain.loaded else {
            if chain.decoder.status() == DecoderStatus::Again {
                *sleep = 0.0;
            }
            return Ok((true, false));
        };

        let elapsed = self.relative_time();
        self.sync.time_frame -= elapsed;
        let audio_timing = self
            .audio
            .as_ref()
            .filter(|a| !a.output.untimed())
            .map(|a| a.output.delay());
        match audio_timing {
            Some(mut buffered) if full_audio && !restarting => {
                if self.options.autosync > 0 {
                    let predicted = self.sync.audio_write_delay / speed + self.sync.time_frame;
                    buffered = predicted + (buffered - predicted) / self.options.autosync as f64;
                }
                self.sync.time_frame = buffered - self.sync.audio_write_delay / speed;
            }
            _ => {
                if self.sync.time_frame < -LATE_VIDEO_RESET {
                    trace!("Video {:.3}s late without audio timing, resetting", -self.sync.time_frame);
                    self.sync.time_frame = 0.0;
                }
            }
        }
        if self.sync.time_frame > PRESENT_SLACK {
            *sleep = sleep.min(self.sync.time_frame);
            return Ok((true, false));
        }
        *sleep = 0.0;

        self.present_loaded(pts)?;
        if restarting {
            let sync_audio = self.audio.is_some();
            self.set_phase(if sync_audio {
                SessionPhase::SyncingAudio
            } else {
                SessionPhase::Playing
            })?;
            if sync_audio {
                self.fill_audio(endpts)?;
            }
            self.announce_restart();
            self.sync.time_frame = 0.0;
            self.relative_time();
        }
        self.update_avsync();
        self.report_drops();
        debug!(
            "V: {} A-V: {} ct: {:+.3} dropped: {}",
            timing::format_pts(self.video_pts),
            self.sync
                .last_av_difference
                .map_or_else(|| "?".to_string(), |d| format!("{:+.3}", d)),
            self.sync.total_drift_correction,
            self.framedrop.stats().total
        );
        Ok((true, true))
    }

    fn present_loaded(&mut self, pts: f64) -> Result<()> {
        let Some(chain) = self.video.as_mut() else {
            return Ok(());
        };
        let started = self.clock.now();
        chain.output.present()?;
        self.sync.last_flip_duration = self.clock.now() - started;
        chain.loaded = None;
        chain.has_shown = true;
        self.video_pts = Some(pts);
        self.last_vo_pts = Some(pts);
        self.playback_pts = Some(pts);
        self.counters.shown += 1;
        trace!("Presented frame {}", timing::format_pts(Some(pts)));
        Ok(())
    }

    /// Decode until a frame is loaded into the video output
    fn update_video(&mut self, endpts: Pts) -> Result<VideoUpdate> {
        let source = self.source;
        let speed = self.options.speed;
        let restarting = self.phase == SessionPhase::Restarting;
        let audio_timing = self.audio.as_ref().map(|a| (a.output.untimed(), a.output.delay()));
        let audio_eof = self.audio.as_ref().is_some_and(|a| a.eof);
        let has_audio = self.audio.is_some();
        let Some(chain) = self.video.as_mut() else {
            return Ok(VideoUpdate::Eof);
        };
        let inputs = DropInputs {
            audio_active: matches!(audio_timing, Some((false, _))) && !audio_eof,
            audio_device_delay: speed * audio_timing.map_or(0.0, |(_, delay)| delay),
            audio_write_delay: self.sync.audio_write_delay,
            frame_time: chain.decoder.frame_time(),
            paused: self.paused,
            restarting,
        };
        let demuxer = self.sources[source].as_mut();

        for _ in 0..VIDEO_PUMP_BUDGET {
            let status = {
                let hrseek = &mut self.hrseek;
                let framedrop = &mut self.framedrop;
                let mut decide = |pts: Pts| {
                    if let Some(window) = hrseek.as_mut() {
                        window.note_packet(pts);
                        if window.framedrop {
                            return DropMode::HrSeekOnly;
                        }
                    }
                    framedrop.check(&inputs)
                };
                chain.decoder.pump(demuxer, &mut decide)
            };
            match status {
                DecoderStatus::Ok => {}
                DecoderStatus::Again => continue,
                DecoderStatus::Wait => return Ok(VideoUpdate::NoFrameYet),
                DecoderStatus::Eof => return Ok(VideoUpdate::Eof),
            }
            let Some(frame) = chain.decoder.take_frame() else {
                continue;
            };
            let pts = match frame.pts {
                Some(pts) => pts,
                None => {
                    warn!("Video frame without timestamp");
                    chain.decoded_pts.unwrap_or(0.0)
                }
            };

            if endpts.map_or(true, |end| pts < end) {
                let framedrop = self.hrseek.is_some_and(|w| w.framedrop);
                self.history.add(Some(pts), framedrop);
            }
            if self.hrseek.is_some_and(|w| w.hides(pts)) {
                trace!("Skipping frame {} before seek target", timing::format_pts(Some(pts)));
                self.counters.hrseek_skipped += 1;
                continue;
            }
            self.hrseek = None;

            let frame_timing = chain.decoder.fix_monotonic(pts);
            chain.decoded_pts = Some(frame_timing.pts);
            if has_audio {
                self.sync.on_video_frame(frame_timing.frame_time);
            }
            chain.output.queue_frame(frame, frame_timing.pts);
            chain.loaded = Some(frame_timing.pts);
            return Ok(VideoUpdate::Frame(frame_timing.frame_time));
        }
        Ok(VideoUpdate::NoFrameYet)
    }

    /// Nudge the audio write delay toward the measured A/V offset
    fn adjust_sync(&mut self, frame_time: f64) {
        if self.audio.is_none() || self.phase == SessionPhase::SyncingAudio {
            return;
        }
        let video_pts = self.video.as_ref().and_then(|v| v.decoded_pts);
        let (Some(written), Some(video_pts)) = (self.written_audio_pts(), video_pts) else {
            return;
        };
        self.sync.adjust(
            written,
            video_pts,
            frame_time,
            self.options.audio_delay,
            self.options.max_pts_correction,
        );
    }

    fn update_avsync(&mut self) {
        if self.audio.is_none() || self.video.is_none() {
            return;
        }
        let playing = self.playing_audio_pts();
        self.sync.update_av_difference(
            playing,
            self.video_pts,
            self.options.audio_delay,
            self.options.speed,
        );
        let dropped = self.framedrop.stats().total;
        if let Some(diff) = self.sync.last_av_difference {
            if !self.desync_warned && diff > DESYNC_WARN_DIFFERENCE && dropped > DESYNC_WARN_DROPS {
                warn!(
                    "Audio/video desynchronisation: A-V {:+.3}s after {} dropped frames; system too slow to decode this file",
                    diff, dropped
                );
                self.events.emit_with(|session_id, timestamp| PlayerEvent::AvDesync {
                    session_id,
                    av_difference: diff,
                    dropped_frames: dropped,
                    timestamp,
                });
                self.desync_warned = true;
            }
        }
    }

    fn report_drops(&mut self) {
        let total = self.framedrop.stats().total;
        if total > self.reported_drops {
            self.reported_drops = total;
            self.events.emit_with(|session_id, timestamp| PlayerEvent::FramesDropped {
                session_id,
                total,
                timestamp,
            });
        }
    }

    // ========================================
    // Audio
    // ========================================

    /// Timestamp of the end of the audio handed to the device
    fn written_audio_pts(&self) -> Pts {
        let chain = self.audio.as_ref()?;
        let bps = chain.output.format().bytes_per_second();
        chain
            .decoder
            .audio_pts()
            .map(|end| end - timing::bytes_to_seconds(chain.buffer.len(), bps))
    }

    /// Timestamp currently audible
    fn playing_audio_pts(&self) -> Pts {
        let delay = self.audio.as_ref()?.output.delay();
        timing::offset(self.written_audio_pts(), -self.options.speed * delay)
    }

    /// Decode until at least `minlen` bytes are buffered
    fn decode_audio(&mut self, minlen: usize, blocking: bool) -> AudioDecode {
        let source = self.source;
        let Some(chain) = self.audio.as_mut() else {
            return AudioDecode::Eof;
        };
        let demuxer = self.sources[source].as_mut();
        let mut no_drop = |_: Pts| DropMode::None;
        loop {
            if chain.buffer.len() >= minlen {
                return AudioDecode::Filled;
            }
            let status = if blocking {
                chain.decoder.pump_blocking(demuxer, &mut no_drop)
            } else {
                chain.decoder.pump(demuxer, &mut no_drop)
            };
            match status {
                DecoderStatus::Ok => {
                    if let Some(frame) = chain.decoder.take_frame() {
                        chain.append(frame);
                    }
                }
                DecoderStatus::Again => {}
                DecoderStatus::Wait => return AudioDecode::Wait,
                DecoderStatus::Eof => return AudioDecode::Eof,
            }
        }
    }

    /// Keep the device fed up to its free space and the end bound
    fn fill_audio(&mut self, endpts: Pts) -> Result<AudioFill> {
        let Some(chain) = self.audio.as_ref() else {
            return Ok(AudioFill::Drained);
        };
        let format = chain.output.format();
        let unit = format.bytes_per_frame();
        let bps = format.bytes_per_second();
        let modifiable =
            format.is_modifiable() && chain.decoder.audio_format().map_or(true, |f| f.is_modifiable());
        let mut playsize = if self.paused { 1 } else { chain.output.free_space() };
        let mut flags = WriteFlags::default();
        let mut partial = false;
        let mut audio_eof = false;

        if self.phase == SessionPhase::SyncingAudio && (self.video.is_none() || !self.options.initial_audio_sync || !modifiable) {
            self.set_phase(SessionPhase::Playing)?;
        }
        if !self.options.initial_audio_sync || !modifiable {
            self.hrseek = None;
        }

        let result = if self.phase == SessionPhase::SyncingAudio || self.hrseek.is_some() {
            self.audio_start_sync(playsize)?
        } else {
            StartSync::Decoded(self.decode_audio(playsize, false))
        };
        match result {
            StartSync::PlayDone => return Ok(AudioFill::Full),
            StartSync::Decoded(AudioDecode::Eof) => audio_eof = true,
            StartSync::Decoded(_) => {}
        }

        if let (Some(end), true) = (endpts, modifiable) {
            if let Some(written) = self.written_audio_pts() {
                let bytes = (end - written + self.options.audio_delay) * bps / self.options.speed;
                if playsize as f64 > bytes {
                    playsize = bytes.max(0.0) as usize;
                    flags.final_chunk = true;
                    audio_eof = true;
                    partial = true;
                }
            }
        }

        let buffered = self.audio.as_ref().map_or(0, |a| a.buffer.len());
        if playsize > buffered {
            partial = true;
            playsize = buffered;
            if audio_eof {
                flags.final_chunk = true;
            }
        }
        playsize -= playsize % unit;
        if let Some(chain) = self.audio.as_mut() {
            chain.eof = audio_eof;
        }

        if playsize == 0 {
            if partial && audio_eof {
                return Ok(AudioFill::Drained);
            }
            if !partial && buffered > 0 && self.check_stall(audio_eof)? {
                return Ok(AudioFill::Drained);
            }
            return Ok(if partial { AudioFill::Partial } else { AudioFill::Full });
        }

        let played = self.write_buffered(playsize, flags)?;
        if played > 0 {
            self.stall_since = None;
        } else if !self.paused {
            let delay = self.audio.as_ref().map_or(0.0, |a| a.output.delay());
            if audio_eof && delay < AUDIO_DRAIN_DELAY {
                return Ok(AudioFill::Drained);
            }
            if self.check_stall(audio_eof)? {
                return Ok(AudioFill::Drained);
            }
        }
        Ok(if partial { AudioFill::Partial } else { AudioFill::Full })
    }

    /// Track output back-pressure; returns true when it counts as end of stream
    fn check_stall(&mut self, audio_eof: bool) -> Result<bool> {
        if self.paused {
            self.stall_since = None;
            return Ok(false);
        }
        let now = self.clock.now();
        let since = *self.stall_since.get_or_insert(now);
        let timeout = self.options.output_stall_timeout;
        if timeout <= 0.0 || now - since < timeout {
            return Ok(false);
        }
        if audio_eof {
            info!("Audio output stopped accepting data after end of stream; treating as drained");
            return Ok(true);
        }
        self.fail(PlaybackFailure::OutputStalled)?;
        Ok(false)
    }

    /// Write the first `len` buffered bytes; returns bytes accepted
    fn write_buffered(&mut self, len: usize, flags: WriteFlags) -> Result<usize> {
        if self.paused {
            return Ok(0);
        }
        let Some(chain) = self.audio.as_mut() else {
            return Ok(0);
        };
        let format = chain.output.format();
        let unit = format.bytes_per_frame();
        let len = len.min(chain.buffer.len());
        let accepted = chain.output.write(&chain.buffer[..len], len / unit, flags)?;
        let played = (accepted * unit).min(len);
        chain.buffer.drain(..played);
        self.sync
            .on_audio_written(self.options.speed * timing::bytes_to_seconds(played, format.bytes_per_second()));
        Ok(played)
    }

    fn write_silence(&mut self, len: usize) -> Result<usize> {
        if self.paused {
            return Ok(0);
        }
        let Some(chain) = self.audio.as_mut() else {
            return Ok(0);
        };
        let format = chain.output.format();
        let unit = format.bytes_per_frame();
        let silence = vec![format.sample_format.silence_byte(); len - len % unit];
        let accepted = chain.output.write(&silence, silence.len() / unit, WriteFlags::default())?;
        let played = accepted * unit;
        self.sync
            .on_audio_written(self.options.speed * timing::bytes_to_seconds(played, format.bytes_per_second()));
        if played > 0 {
            self.stall_since = None;
        }
        Ok(played)
    }

    /// Align the start of audio with the shown video frame (or the seek target)
    ///
    /// Audio starting early is decoded and thrown away; audio starting late
    /// is preceded by silence.
    fn audio_start_sync(&mut self, playsize: usize) -> Result<StartSync> {
        let Some(chain) = self.audio.as_ref() else {
            return Ok(StartSync::Decoded(AudioDecode::Eof));
        };
        let format = chain.output.format();
        let unit = format.bytes_per_frame();
        let bps = format.bytes_per_second();
        let cutoff = self.options.audio_sync_tuning.broken_pts_cutoff;
        let min_discard = self.options.audio_sync_tuning.min_discard_bytes;

        // Decode a little first to learn where the audio starts
        match self.decode_audio(1, false) {
            AudioDecode::Filled => {}
            other => return Ok(StartSync::Decoded(other)),
        }

        let hrseek_target = self.hrseek.take().map(|w| w.target);
        // The write delay already accounts for the loaded frame, so measure against it
        let video_ref = self.video.as_ref().and_then(|v| v.decoded_pts).or(self.video_pts);
        let mut did_retry = false;
        let bytes = loop {
            let written = self.written_audio_pts();
            let ptsdiff = match (written, hrseek_target) {
                (Some(w), Some(target)) => Some(w - target),
                (Some(w), None) => video_ref
                    .map(|v| w - v - self.sync.audio_write_delay - self.options.audio_delay),
                (None, _) => None,
            };
            let mut bytes = match ptsdiff {
                None if written.is_none() && !did_retry => {
                    did_retry = true;
                    debug!("Audio timestamp unknown, decoding ahead");
                    let ahead = timing::seconds_to_bytes(1.0, bps, unit).max(0) as usize;
                    if self.decode_audio(ahead, true) == AudioDecode::Eof {
                        return Ok(StartSync::Decoded(AudioDecode::Eof));
                    }
                    continue;
                }
                None => 0,
                Some(d) if d.is_nan() || d.abs() > cutoff => {
                    warn!("Audio start offset {:.3}s looks broken; starting audio without sync", d);
                    0
                }
                Some(d) => timing::seconds_to_bytes(d, bps, unit),
            };
            if bytes > 0 {
                break bytes;
            }

            // Audio starts before the target: decode and discard
            if self.phase == SessionPhase::SyncingAudio {
                self.set_phase(SessionPhase::Playing)?;
            }
            let chunk = (-bytes).min(playsize.max(min_discard) as i64).max(0) as usize;
            let res = self.decode_audio((chunk - chunk % unit).max(unit), false);
            let Some(chain) = self.audio.as_mut() else {
                return Ok(StartSync::Decoded(AudioDecode::Eof));
            };
            bytes += chain.buffer.len() as i64;
            if bytes >= 0 {
                let keep = (bytes as usize).min(chain.buffer.len());
                let cut = chain.buffer.len() - keep;
                chain.buffer.drain(..cut);
                trace!("Audio start sync discarded {} bytes", cut);
                if res != AudioDecode::Filled {
                    return Ok(StartSync::Decoded(res));
                }
                return Ok(StartSync::Decoded(self.decode_audio(playsize, false)));
            }
            chain.buffer.clear();
            if res != AudioDecode::Filled {
                return Ok(StartSync::Decoded(res));
            }
        };

        if hrseek_target.is_some() {
            // Audio-only exact seek never pads
            return Ok(StartSync::Decoded(AudioDecode::Filled));
        }
        let bytes = bytes as usize;
        if bytes >= playsize {
            // The whole write is still before the start position
            self.write_silence(playsize)?;
            return Ok(StartSync::PlayDone);
        }
        if self.phase == SessionPhase::SyncingAudio {
            self.set_phase(SessionPhase::Playing)?;
        }
        if let Some(chain) = self.audio.as_mut() {
            let fill = format.sample_format.silence_byte();
            trace!("Audio start sync padded {} bytes of silence", bytes);
            chain.buffer.splice(0..0, std::iter::repeat(fill).take(bytes));
        }
        Ok(StartSync::Decoded(self.decode_audio(playsize, false)))
    }

    // ========================================
    // Seeking
    // ========================================

    fn seek_deferred(&self, now: f64) -> bool {
        self.phase == SessionPhase::Restarting && now - self.seek_started_at < SEEK_BURST_WINDOW
    }

    /// Move incoming requests into the coalescing queue unless deferred
    fn accept_seeks(&mut self, now: f64) {
        while !self.incoming_seeks.is_empty() && !self.seek_deferred(now) {
            if let Some(request) = self.incoming_seeks.pop_front() {
                self.seeks.queue(request);
            }
        }
    }

    fn is_hr_seek(&self, request: &SeekRequest) -> bool {
        let accurate = self.sources[self.source].accurate_seek();
        if !accurate || !self.options.correct_pts {
            return false;
        }
        if request.exactness == SeekExactness::Approximate || matches!(request.target, SeekTarget::Factor(_)) {
            return false;
        }
        match self.options.hr_seek {
            HrSeekPolicy::Always => true,
            HrSeekPolicy::Absolute => {
                matches!(request.target, SeekTarget::Absolute(_)) || request.exactness == SeekExactness::Exact
            }
            HrSeekPolicy::Never => request.exactness == SeekExactness::Exact,
        }
    }

    /// Execute a seek
    ///
    /// `fallthrough` marks the internal seek from one timeline part into
    /// the next: audio keeps playing and the backstep history continues.
    fn seek(&mut self, request: SeekRequest, fallthrough: bool) -> Result<()> {
        let hr = self.is_hr_seek(&request);
        let accurate = self.sources[self.source].accurate_seek();
        let mut target = request.target;
        let mut direction = request.direction;

        if let SeekTarget::Factor(fraction) = target {
            if let Some(length) = self.duration().filter(|l| *l > 0.0) {
                let start = if self.timeline.is_some() {
                    0.0
                } else {
                    self.sources[self.source].start_time()
                };
                target = SeekTarget::Absolute(fraction * length + start);
            }
        }
        if let SeekTarget::Relative(delta) = target {
            if accurate || self.timeline.is_some() {
                direction = Some(if delta > 0.0 {
                    SeekDirection::Forward
                } else {
                    SeekDirection::Backward
                });
                target = SeekTarget::Absolute(self.current_time() + delta);
            }
        }

        let mut demux_target = match target {
            SeekTarget::Absolute(t) => DemuxSeekTarget::Absolute(t),
            SeekTarget::Relative(d) => DemuxSeekTarget::Relative(d),
            SeekTarget::Factor(f) => DemuxSeekTarget::Factor(f),
        };
        let mut need_reset = false;
        if let (true, SeekTarget::Absolute(t)) = (self.timeline.is_some(), target) {
            match self.timeline_set_from_time(t) {
                Some((source_pts, reset)) => {
                    demux_target = DemuxSeekTarget::Absolute(source_pts);
                    need_reset = reset;
                }
                None => {
                    debug!("Seek to {} is past the end of the timeline", timing::format_pts(Some(t)));
                    if !fallthrough {
                        if let Some(audio) = self.audio.as_mut() {
                            audio.output.reset();
                            audio.buffer.clear();
                        }
                    }
                    return self.reach_file_end();
                }
            }
        }
        if need_reset {
            self.reopen_decoders();
        }

        let backward = hr || direction == Some(SeekDirection::Backward);
        let flags = DemuxSeekFlags {
            backward,
            forward: !backward && direction == Some(SeekDirection::Forward),
            subtitle_preroll: hr,
        };
        if hr {
            if let DemuxSeekTarget::Absolute(t) = &mut demux_target {
                *t -= self.options.hr_seek_demuxer_offset;
            }
        }

        info!(
            "Seeking to {:?} ({})",
            target,
            if hr { "exact" } else { "keyframe" }
        );
        let amount = target.amount();
        self.events.emit_with(|session_id, timestamp| PlayerEvent::SeekStarted {
            session_id,
            target: amount,
            exact: hr,
            timestamp,
        });

        let prev_epoch = self.history.epoch();
        if let Err(e) = self.sources[self.source].seek(demux_target, flags) {
            warn!("Seek failed: {}", e);
            self.counters.failed_seeks += 1;
            let reason = e.to_string();
            self.events.emit_with(|session_id, timestamp| PlayerEvent::SeekFailed {
                session_id,
                reason,
                timestamp,
            });
            if need_reset {
                self.seek_reset(!fallthrough)?;
            }
            return Ok(());
        }

        self.seek_reset(!fallthrough)?;
        self.counters.seeks += 1;
        if fallthrough {
            self.history.set_epoch(prev_epoch);
        } else {
            self.history.bump_epoch();
            self.backstep.active = false;
        }

        match target {
            SeekTarget::Absolute(t) => {
                self.video_pts = Some(t);
                self.last_seek_pts = Some(t);
            }
            _ => self.last_seek_pts = None,
        }

        // Timeline seeks reuse the exact-seek skip to hide frames before the part start
        if hr || self.timeline.is_some() {
            let window = if hr {
                amount
            } else {
                self.timeline
                    .as_ref()
                    .and_then(|t| t.part(self.part))
                    .map_or(0.0, |p| p.start)
            };
            self.hrseek = Some(HrSeekWindow::new(window));
        }
        self.seek_started_at = self.clock.now();
        Ok(())
    }

    /// Select the part containing `pts`; returns the source time and
    /// whether the source changed
    fn timeline_set_from_time(&mut self, pts: f64) -> Option<(f64, bool)> {
        let timeline = self.timeline.as_ref()?;
        let (index, source_pts) = timeline.locate(pts)?;
        let part = *timeline.part(index)?;
        let offset = timeline.video_offset(index);
        let need_reset = part.source != self.source;
        if index != self.part {
            debug!("Switching to timeline part {} (source {})", index, part.source);
        }
        self.part = index;
        self.source = part.source;
        self.video_offset = offset;
        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.set_pts_offset(offset);
        }
        if let Some(video) = self.video.as_mut() {
            video.decoder.set_pts_offset(offset);
        }
        Some((source_pts, need_reset))
    }

    /// Reinitialize both decoders on the current source
    fn reopen_decoders(&mut self) {
        info!("Reinitializing decoders for source {}", self.source);
        let demuxer = self.sources[self.source].as_ref();
        if self.audio.is_some() {
            match open_decoder(demuxer, StreamKind::Audio, &self.registry, &self.options, &self.events, self.video_offset) {
                Some(decoder) => {
                    if let Some(chain) = self.audio.as_mut() {
                        chain.decoder = decoder;
                        chain.format_checked = false;
                    }
                }
                None => {
                    warn!("Source {} has no playable audio; continuing without audio", self.source);
                    self.audio = None;
                }
            }
        }
        if self.video.is_some() {
            match open_decoder(demuxer, StreamKind::Video, &self.registry, &self.options, &self.events, self.video_offset) {
                Some(decoder) => {
                    if let Some(chain) = self.video.as_mut() {
                        chain.decoder = decoder;
                    }
                }
                None => {
                    warn!("Source {} has no playable video; continuing without video", self.source);
                    self.video = None;
                }
            }
        }
    }

    /// Drop every buffered packet, frame and sample after a reposition
    fn seek_reset(&mut self, reset_audio_output: bool) -> Result<()> {
        if let Some(video) = self.video.as_mut() {
            video.decoder.reset();
            video.output.reset();
            video.loaded = None;
            video.decoded_pts = None;
            video.has_shown = false;
        }
        self.sync.reset();
        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.reset();
            if reset_audio_output {
                audio.output.reset();
            }
            audio.buffer.clear();
            audio.eof = false;
        }
        self.set_phase(SessionPhase::Restarting)?;
        self.hrseek = None;
        self.framedrop.reset();
        self.playback_pts = None;
        self.stall_since = None;
        Ok(())
    }

    /// Continue a backstep: seek to the previous frame once it is known
    fn handle_backstep(&mut self) -> Result<()> {
        if !self.backstep.active {
            return Ok(());
        }
        self.backstep.active = false;
        let accurate = self.sources[self.source].accurate_seek();
        let Some(current) = self.last_vo_pts.filter(|_| accurate && self.video.is_some()) else {
            debug!("Backstep needs video and an accurately seeking source");
            return Ok(());
        };

        if let Some(previous) = self.history.find_previous(current) {
            debug!("Backstep to {}", timing::format_pts(Some(previous)));
            self.seeks.queue(SeekRequest::absolute(previous).exact());
            return Ok(());
        }
        let indexed_past = self.history.last_frame_pts().is_some_and(|last| last >= current);
        if indexed_past && self.backstep.start_epoch != self.history.epoch() {
            if !self.backstep.widened {
                self.backstep.widened = true;
                debug!("Backstep lookback too short, retrying with {}s", BACKSTEP_WIDE_LOOKBACK);
                return self.start_backstep_indexing(current, BACKSTEP_WIDE_LOOKBACK);
            }
            warn!("Backstep failed at {}", timing::format_pts(Some(current)));
            self.events
                .emit_with(|session_id, timestamp| PlayerEvent::BackstepFailed { session_id, timestamp });
            self.seeks.queue(SeekRequest::absolute(current).exact());
        } else if self.hrseek.is_none() {
            debug!("Start backstep indexing");
            self.start_backstep_indexing(current, BACKSTEP_LOOKBACK)?;
        } else {
            self.backstep.active = true;
        }
        Ok(())
    }

    /// Seek before `current` and decode, without showing, up to past it
    fn start_backstep_indexing(&mut self, current: f64, lookback: f64) -> Result<()> {
        self.seek(SeekRequest::absolute(current - lookback), false)?;
        if let Some(window) = self.hrseek.as_mut() {
            window.target = current + BACKSTEP_INDEX_MARGIN;
            window.framedrop = false;
            self.backstep.active = true;
        }
        Ok(())
    }

    // ========================================
    // State
    // ========================================

    fn announce_restart(&mut self) {
        let pts = self.video_pts.or(self.written_audio_pts());
        debug!("Playback restarted at {}", timing::format_pts(pts));
        self.events.emit_with(|session_id, timestamp| PlayerEvent::PlaybackRestarted {
            session_id,
            pts,
            timestamp,
        });
    }

    fn set_phase(&mut self, next: SessionPhase) -> Result<()> {
        self.phase.transition(next)
    }

    fn set_state(&mut self, next: PlayerState) -> Result<()> {
        let old = self.state.as_session_state();
        let before = self.state.clone();
        self.state.transition(next)?;
        if before != self.state {
            let new = self.state.as_session_state();
            self.events.emit_with(|session_id, timestamp| PlayerEvent::StateChanged {
                session_id,
                old_state: old,
                new_state: new,
                timestamp,
            });
        }
        Ok(())
    }

    fn fail(&mut self, failure: PlaybackFailure) -> Result<()> {
        error!("Playback failed: {}", failure);
        let reason = failure.to_string();
        self.events.emit_with(|session_id, timestamp| PlayerEvent::PlaybackFailed {
            session_id,
            reason,
            timestamp,
        });
        self.set_state(PlayerState::Error(failure))
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("session_id", &self.events.session_id())
            .field("state", &self.state)
            .field("phase", &self.phase)
            .field("paused", &self.paused)
            .field("audio", &self.audio.as_ref().map(|a| &a.decoder))
            .field("video", &self.video.as_ref().map(|v| &v.decoder))
            .finish()
    }
}
