//! Scheduler Tick Performance Benchmark
//!
//! Plays synthetic clips on a manual clock, so every measured nanosecond is
//! scheduler, decoder pump and simulated device work.
//!
//! **Goal:** A tick should cost far less than a frame interval
//! **Target:** 10 s of A/V in <10 ms (>1000x realtime)

use avsync_core::decode::passthrough::PassthroughFactory;
use avsync_core::decode::DriverRegistry;
use avsync_core::demux::memory::MemoryDemuxer;
use avsync_core::events::EventSink;
use avsync_core::media::{AudioFormat, Packet, SampleFormat, StreamParams};
use avsync_core::output::sim::{SimAudioOutput, SimVideoOutput};
use avsync_core::output::{AudioOutput, VideoOutput};
use avsync_core::playback::{Clock, ManualClock, PlaybackSession, SeekRequest, SessionOutputs};
use avsync_core::PlayerOptions;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;

const FPS: f64 = 25.0;
const RATE: u32 = 48_000;
const AUDIO_PACKET: f64 = 0.02;

fn clip(seconds: f64) -> MemoryDemuxer {
    let frames = (seconds * FPS) as usize;
    let video = (0..frames)
        .map(|i| {
            Packet::new(0, vec![0u8; 64])
                .with_pts(Some(i as f64 / FPS))
                .with_duration(1.0 / FPS)
                .with_keyframe(i % 25 == 0)
        })
        .collect();
    let per_packet = (RATE as f64 * AUDIO_PACKET) as usize * 4;
    let chunks = (seconds / AUDIO_PACKET) as usize;
    let audio = (0..chunks)
        .map(|i| {
            Packet::new(1, vec![0u8; per_packet])
                .with_pts(Some(i as f64 * AUDIO_PACKET))
                .with_duration(AUDIO_PACKET)
                .with_keyframe(true)
        })
        .collect();

    let mut demuxer = MemoryDemuxer::new();
    demuxer.add_stream(StreamParams::video("rawvideo", 8, 8, Some(FPS)), video);
    demuxer.add_stream(StreamParams::audio("pcm_s16le", RATE, 2), audio);
    demuxer
}

fn session(seconds: f64) -> (PlaybackSession, ManualClock) {
    let manual = ManualClock::new();
    let clock: Arc<dyn Clock> = Arc::new(manual.clone());
    let format = AudioFormat::new(RATE, 2, SampleFormat::S16);
    let audio = Box::new(SimAudioOutput::new(format, 0.5, Arc::clone(&clock))) as Box<dyn AudioOutput>;
    let video = Box::new(SimVideoOutput::new(Arc::clone(&clock))) as Box<dyn VideoOutput>;

    let mut registry = DriverRegistry::new();
    registry.register(Arc::new(PassthroughFactory));
    let session = PlaybackSession::new(
        vec![Box::new(clip(seconds))],
        None,
        SessionOutputs {
            audio: Some(audio),
            video: Some(video),
        },
        PlayerOptions::default(),
        Arc::new(registry),
        clock,
        EventSink::disabled(),
    )
    .expect("session");
    (session, manual)
}

fn play(mut session: PlaybackSession, clock: ManualClock, seek: Option<f64>) -> u64 {
    let mut seek = seek;
    while !session.state().is_terminal() {
        let sleep = session.tick().expect("tick");
        if let Some(target) = seek.take() {
            session.request_seek(SeekRequest::absolute(target).exact());
        }
        clock.advance(sleep.max(0.001));
    }
    session.stats().shown_frames
}

fn bench_session_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_ticks");

    group.bench_function("play_10s_av", |b| {
        b.iter_batched(
            || session(10.0),
            |(session, clock)| black_box(play(session, clock, None)),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("exact_seek_then_play", |b| {
        b.iter_batched(
            || session(10.0),
            |(session, clock)| black_box(play(session, clock, Some(7.5))),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_session_ticks);
criterion_main!(benches);
