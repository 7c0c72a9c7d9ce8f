//! AV Sync simulator (avsync-sim) - Main entry point
//!
//! Plays a synthetic clip (raw video + PCM audio) or an audio file through
//! the decode-and-sync core into simulated outputs and prints the final
//! session statistics as JSON.
//!
//! By default the simulation runs against a manual clock as fast as the
//! machine allows; `--realtime` drives the session on a tokio task against
//! the wall clock.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use avsync_common::config::{load_or_default, resolve_config_path, CONFIG_ENV_VAR};
use avsync_common::events::EventBus;
use avsync_core::decode::DriverRegistry;
use avsync_core::demux::memory::MemoryDemuxer;
use avsync_core::demux::symphonia_demuxer::SymphoniaDemuxer;
use avsync_core::demux::Demuxer;
use avsync_core::events::{EventSink, StreamKind};
use avsync_core::media::{AudioFormat, Packet, SampleFormat, StreamParams};
use avsync_core::output::sim::{SimAudioOutput, SimVideoOutput};
use avsync_core::playback::{
    Clock, ManualClock, MonotonicClock, PlaybackSession, PlaybackStats, SeekRequest, SessionHandle,
    SessionOutputs,
};
use avsync_core::PlayerOptions;
use clap::Parser;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for avsync-sim
#[derive(Parser, Debug)]
#[command(name = "avsync-sim")]
#[command(about = "Decode-and-sync core simulator")]
#[command(version)]
struct Args {
    /// Config file (TOML with a [player] table)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Audio file to play instead of the synthetic clip
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Length of the synthetic clip in seconds
    #[arg(long, default_value_t = 5.0)]
    duration: f64,

    /// Frame rate of the synthetic clip
    #[arg(long, default_value_t = 25.0)]
    fps: f64,

    /// Exact seek issued once playback has started
    #[arg(long)]
    seek: Option<f64>,

    /// Audio device buffer in seconds
    #[arg(long, default_value_t = 0.5)]
    audio_buffer: f64,

    /// Run against the wall clock instead of simulated time
    #[arg(long)]
    realtime: bool,
}

/// Sample rate of the synthetic audio track
const SYNTH_RATE: u32 = 48_000;

/// Audio packet length of the synthetic clip (seconds)
const SYNTH_AUDIO_PACKET: f64 = 0.02;

/// Upper bound on simulated ticks
const MAX_SIM_TICKS: u64 = 10_000_000;

/// Build an in-memory clip: rawvideo + 16-bit stereo PCM
fn synthetic_clip(duration: f64, fps: f64) -> MemoryDemuxer {
    let frames = (duration * fps).round() as usize;
    let keyframe_interval = (fps.round() as usize).max(1);
    let video = (0..frames)
        .map(|i| {
            Packet::new(0, vec![(i % 256) as u8; 64])
                .with_pts(Some(i as f64 / fps))
                .with_duration(1.0 / fps)
                .with_keyframe(i % keyframe_interval == 0)
        })
        .collect();

    let chunk_frames = (SYNTH_RATE as f64 * SYNTH_AUDIO_PACKET) as usize;
    let chunks = (duration / SYNTH_AUDIO_PACKET).round() as usize;
    let audio = (0..chunks)
        .map(|i| {
            let data = (0..chunk_frames * 2)
                .flat_map(|s| (((i * chunk_frames * 2 + s) % 200) as i16 * 64).to_le_bytes())
                .collect();
            Packet::new(1, data)
                .with_pts(Some(i as f64 * SYNTH_AUDIO_PACKET))
                .with_duration(SYNTH_AUDIO_PACKET)
                .with_keyframe(true)
        })
        .collect();

    let mut demuxer = MemoryDemuxer::new();
    demuxer.add_stream(StreamParams::video("rawvideo", 8, 8, Some(fps)), video);
    demuxer.add_stream(StreamParams::audio("pcm_s16le", SYNTH_RATE, 2), audio);
    demuxer
}

/// Output format matching what the decoders of `demuxer` will produce
///
/// The built-in registry decodes every audio codec it knows through
/// symphonia, which hands out interleaved f32.
fn output_format(demuxer: &dyn Demuxer) -> Option<AudioFormat> {
    let params = demuxer.streams().iter().find(|p| p.kind == StreamKind::Audio)?;
    Some(AudioFormat::new(params.sample_rate, params.channels, SampleFormat::F32))
}

fn build_session(args: &Args, options: PlayerOptions, clock: Arc<dyn Clock>, bus: &EventBus) -> Result<PlaybackSession> {
    let demuxer: Box<dyn Demuxer> = match &args.file {
        Some(path) => Box::new(
            SymphoniaDemuxer::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => {
            if !(args.duration > 0.0 && args.fps > 0.0) {
                bail!("--duration and --fps must be positive");
            }
            Box::new(synthetic_clip(args.duration, args.fps))
        }
    };

    let audio = output_format(demuxer.as_ref()).map(|format| {
        Box::new(SimAudioOutput::new(format, args.audio_buffer, Arc::clone(&clock)))
            as Box<dyn avsync_core::output::AudioOutput>
    });
    let has_video = demuxer.streams().iter().any(|p| p.kind == StreamKind::Video);
    let video = has_video.then(|| {
        Box::new(SimVideoOutput::new(Arc::clone(&clock))) as Box<dyn avsync_core::output::VideoOutput>
    });

    let session = PlaybackSession::new(
        vec![demuxer],
        None,
        SessionOutputs { audio, video },
        options,
        Arc::new(DriverRegistry::with_builtin()),
        clock,
        EventSink::new(bus.clone(), uuid::Uuid::new_v4()),
    )
    .context("Failed to create playback session")?;
    Ok(session)
}

/// Tick against a manual clock, jumping over every requested sleep
fn simulate(mut session: PlaybackSession, clock: &ManualClock, seek: Option<f64>) -> Result<PlaybackStats> {
    let mut seek = seek;
    for _ in 0..MAX_SIM_TICKS {
        let sleep = session.tick()?;
        if session.state().is_terminal() {
            return Ok(session.stats());
        }
        if let Some(target) = seek {
            if session.stats().shown_frames > 0 || !session.has_video() {
                info!("Seeking to {:.3}s", target);
                session.request_seek(SeekRequest::absolute(target).exact());
                seek = None;
            }
        }
        // Never stand still: a zero sleep still lets simulated devices drain
        clock.advance(sleep.max(0.001));
    }
    warn!("Simulation did not finish within {} ticks", MAX_SIM_TICKS);
    session.stop()?;
    Ok(session.stats())
}

async fn realtime(session: PlaybackSession, seek: Option<f64>) -> Result<PlaybackStats> {
    let mut handle = SessionHandle::spawn(session);
    if let Some(target) = seek {
        handle.seek(SeekRequest::absolute(target).exact()).await?;
    }

    tokio::select! {
        result = handle.join() => return Ok(result?),
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, stopping");
        }
    }
    // The runner may have finished meanwhile; joining reports its result either way
    if let Err(e) = handle.stop().await {
        debug!("Stop not delivered: {}", e);
    }
    Ok(handle.join().await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing so that its log level can apply
    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let config = load_or_default(args.config.as_deref(), CONFIG_ENV_VAR);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "avsync-sim {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("AVSYNC_REVISION"),
        env!("AVSYNC_BUILT")
    );
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: built-in defaults"),
    }

    let options = PlayerOptions::from_toml(&config).context("Invalid [player] configuration")?;
    let bus = EventBus::new(256);
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!("Event: {}", serde_json::to_string(&event).unwrap_or_default());
        }
    });

    let stats = if args.realtime {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let session = build_session(&args, options, clock, &bus)?;
        realtime(session, args.seek).await?
    } else {
        let manual = ManualClock::new();
        let clock: Arc<dyn Clock> = Arc::new(manual.clone());
        let session = build_session(&args, options, clock, &bus)?;
        simulate(session, &manual, args.seek)?
    };

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
