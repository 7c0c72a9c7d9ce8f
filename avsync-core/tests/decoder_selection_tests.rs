//! Decoder driver selection through the registry, including the
//! symphonia family on a real WAV file

mod helpers;

use avsync_core::decode::passthrough::PassthroughFactory;
use avsync_core::decode::DriverRegistry;
use avsync_core::demux::symphonia_demuxer::SymphoniaDemuxer;
use avsync_core::events::{PlayerEvent, StreamKind};
use avsync_core::media::{AudioFormat, SampleFormat};
use avsync_core::playback::PlayerState;
use avsync_core::PlayerOptions;
use helpers::*;
use std::sync::Arc;
use tempfile::TempDir;

fn selected(events: &[PlayerEvent], kind: StreamKind) -> Option<(String, String)> {
    events.iter().find_map(|e| match e {
        PlayerEvent::DecoderSelected {
            stream,
            family,
            decoder,
            ..
        } if *stream == kind => Some((family.clone(), decoder.clone())),
        _ => None,
    })
}

#[test]
fn test_failed_init_falls_back_to_next_candidate() {
    let failing = FailingFactory::new();
    let mut registry = DriverRegistry::new();
    registry.register(failing.clone());
    registry.register(Arc::new(PassthroughFactory));

    let mut h = HarnessBuilder::new(av_source(1.0, 25)).registry(registry).build().unwrap();
    let events = h.drain_events();

    // One failed attempt per stream before passthrough takes over
    assert_eq!(failing.opens(), 2);
    assert_eq!(
        selected(&events, StreamKind::Audio).map(|(family, _)| family),
        Some("passthrough".to_string())
    );
    assert_eq!(
        selected(&events, StreamKind::Video),
        Some(("passthrough".to_string(), "rawvideo".to_string()))
    );

    h.run_to_end(100_000);
    assert_eq!(*h.session.state(), PlayerState::EndOfFile);
    assert_eq!(h.session.stats().shown_frames, 25);
}

#[test]
fn test_preferences_reorder_families() {
    let failing = FailingFactory::new();
    let mut registry = DriverRegistry::new();
    registry.register(failing.clone());
    registry.register(Arc::new(PassthroughFactory));

    let options = PlayerOptions {
        video_decoders: vec!["passthrough".to_string()],
        ..Default::default()
    };
    let h = HarnessBuilder::new(av_source(1.0, 25))
        .registry(registry)
        .options(options)
        .build()
        .unwrap();

    // Only the audio stream still tries the broken family first
    assert_eq!(failing.opens(), 1);
    assert!(h.session.has_audio());
    assert!(h.session.has_video());
}

#[test]
fn test_stream_without_decoder_is_disabled() {
    let options = PlayerOptions {
        audio_decoders: vec!["-passthrough".to_string()],
        ..Default::default()
    };
    let mut h = HarnessBuilder::new(av_source(1.0, 25)).options(options).build().unwrap();

    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        PlayerEvent::DecoderUnavailable {
            stream: StreamKind::Audio,
            ..
        }
    )));
    assert!(!h.session.has_audio());
    assert!(h.session.has_video());

    h.run_to_end(100_000);
    assert_eq!(*h.session.state(), PlayerState::EndOfFile);
    assert_eq!(h.presented().len(), 25);
    assert_eq!(h.audio_log().written_bytes, 0);
}

#[test]
fn test_no_decodable_stream_is_an_error() {
    let result = HarnessBuilder::new(av_source(1.0, 25))
        .registry(DriverRegistry::new())
        .build();
    assert!(result.is_err());
}

#[test]
fn test_symphonia_plays_wav_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sine.wav");
    generate_sine_wav(&path, 44_100, 500, 440.0).unwrap();

    let demuxer = SymphoniaDemuxer::open(&path).unwrap();
    let mut h = HarnessBuilder::new(demuxer)
        .registry(DriverRegistry::with_builtin())
        .audio_format(AudioFormat::new(44_100, 1, SampleFormat::F32))
        .without_video()
        .build()
        .unwrap();

    let events = h.drain_events();
    assert_eq!(
        selected(&events, StreamKind::Audio).map(|(family, _)| family),
        Some("symphonia".to_string())
    );

    h.run_to_end(100_000);
    assert_eq!(*h.session.state(), PlayerState::EndOfFile);

    let log = h.audio_log();
    assert_eq!(log.written_bytes, 22_050 * 4);
    let peak = log
        .data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]).abs())
        .fold(0.0f32, f32::max);
    assert!(peak > 0.4 && peak <= 0.51, "peak amplitude {}", peak);
}
