//! Session harness on a manual clock
//!
//! Every [`Harness::step`] runs one tick and then advances the clock by the
//! sleep the tick asked for (at least 1 ms, so simulated devices drain even
//! when the scheduler wants to run again immediately).

use super::drivers::passthrough_only;
use super::media::AUDIO_RATE;
use avsync_common::events::EventBus;
use avsync_core::config::PlayerOptions;
use avsync_core::decode::DriverRegistry;
use avsync_core::demux::Demuxer;
use avsync_core::events::{EventSink, PlayerEvent};
use avsync_core::media::{AudioFormat, SampleFormat};
use avsync_core::output::sim::{AudioLog, PresentedFrame, SimAudioOutput, SimVideoOutput};
use avsync_core::output::{AudioOutput, VideoOutput};
use avsync_core::playback::{Clock, ManualClock, PlaybackSession, SessionOutputs, Timeline};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Smallest clock step per tick
pub const MIN_STEP: f64 = 0.001;

pub struct HarnessBuilder {
    sources: Vec<Box<dyn Demuxer>>,
    timeline: Option<Timeline>,
    options: PlayerOptions,
    registry: DriverRegistry,
    audio: bool,
    video: bool,
    audio_buffer: f64,
    audio_latency: f64,
    untimed_audio: bool,
    stalled_audio: bool,
    audio_format: AudioFormat,
    clock: ManualClock,
}

impl HarnessBuilder {
    pub fn new(source: impl Demuxer + 'static) -> Self {
        Self {
            sources: vec![Box::new(source)],
            timeline: None,
            options: PlayerOptions::default(),
            registry: passthrough_only(),
            audio: true,
            video: true,
            audio_buffer: 0.2,
            audio_latency: 0.0,
            untimed_audio: false,
            stalled_audio: false,
            audio_format: AudioFormat::new(AUDIO_RATE, 1, SampleFormat::S16),
            clock: ManualClock::new(),
        }
    }

    /// Clock the session will run on (for drivers that consume time)
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn source(mut self, source: impl Demuxer + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn options(mut self, options: PlayerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.audio = false;
        self
    }

    pub fn without_video(mut self) -> Self {
        self.video = false;
        self
    }

    pub fn audio_buffer(mut self, seconds: f64) -> Self {
        self.audio_buffer = seconds;
        self
    }

    pub fn audio_latency(mut self, seconds: f64) -> Self {
        self.audio_latency = seconds;
        self
    }

    pub fn untimed_audio(mut self) -> Self {
        self.untimed_audio = true;
        self
    }

    /// Audio device that never accepts a write
    pub fn stalled_audio(mut self) -> Self {
        self.stalled_audio = true;
        self
    }

    /// Device format (default: the synthetic PCM format)
    pub fn audio_format(mut self, format: AudioFormat) -> Self {
        self.audio_format = format;
        self
    }

    pub fn build(self) -> avsync_core::Result<Harness> {
        let clock = self.clock;
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let bus = EventBus::new(4096);
        let events = bus.subscribe();

        let mut audio_log = None;
        let audio = self.audio.then(|| {
            let mut out = SimAudioOutput::new(self.audio_format, self.audio_buffer, Arc::clone(&shared))
                .with_latency(self.audio_latency)
                .with_untimed(self.untimed_audio);
            out.set_stalled(self.stalled_audio);
            audio_log = Some(out.log_handle());
            Box::new(out) as Box<dyn AudioOutput>
        });
        let mut video_log = None;
        let video = self.video.then(|| {
            let out = SimVideoOutput::new(Arc::clone(&shared));
            video_log = Some(out.log_handle());
            Box::new(out) as Box<dyn VideoOutput>
        });

        let session = PlaybackSession::new(
            self.sources,
            self.timeline,
            SessionOutputs { audio, video },
            self.options,
            Arc::new(self.registry),
            shared,
            EventSink::new(bus.clone(), Uuid::new_v4()),
        )?;
        Ok(Harness {
            session,
            clock,
            audio_log,
            video_log,
            events,
            _bus: bus,
        })
    }
}

pub struct Harness {
    pub session: PlaybackSession,
    pub clock: ManualClock,
    audio_log: Option<Arc<Mutex<AudioLog>>>,
    video_log: Option<Arc<Mutex<Vec<PresentedFrame>>>>,
    events: broadcast::Receiver<PlayerEvent>,
    _bus: EventBus,
}

impl Harness {
    /// One tick plus the requested sleep; returns the sleep
    pub fn step(&mut self) -> f64 {
        let sleep = self.session.tick().expect("tick failed");
        self.clock.advance(sleep.max(MIN_STEP));
        sleep
    }

    /// Step until `done` holds or the session ends; returns whether `done` held
    pub fn run_until(&mut self, max_ticks: usize, mut done: impl FnMut(&Harness) -> bool) -> bool {
        for _ in 0..max_ticks {
            if done(self) {
                return true;
            }
            if self.session.state().is_terminal() {
                return false;
            }
            self.step();
        }
        done(self)
    }

    /// Step until the session reaches a terminal state
    pub fn run_to_end(&mut self, max_ticks: usize) {
        let finished = self.run_until(max_ticks, |h| h.session.state().is_terminal());
        assert!(finished, "session did not finish within {} ticks", max_ticks);
    }

    /// Step for `seconds` of simulated time
    pub fn run_for(&mut self, seconds: f64) {
        let until = self.clock.now() + seconds;
        while self.clock.now() < until && !self.session.state().is_terminal() {
            self.step();
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn presented(&self) -> Vec<PresentedFrame> {
        self.video_log
            .as_ref()
            .map(|log| log.lock().unwrap().clone())
            .unwrap_or_default()
    }

    pub fn audio_log(&self) -> AudioLog {
        self.audio_log
            .as_ref()
            .map(|log| log.lock().unwrap().clone())
            .unwrap_or_default()
    }

    /// Events published since the last call
    pub fn drain_events(&mut self) -> Vec<PlayerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
