//! Pause, frame stepping, speed, frame limits, demuxer waits and output
//! stall detection

mod helpers;

use avsync_core::decode::DecoderStatus;
use avsync_core::events::{PlayerEvent, SessionCommand, StepDirection, StreamKind};
use avsync_core::playback::{PlaybackFailure, PlayerState, SeekRequest};
use avsync_core::PlayerOptions;
use helpers::*;

#[test]
fn test_pause_freezes_presentation() {
    let mut h = HarnessBuilder::new(video_source(4.0, 25)).without_audio().build().unwrap();
    assert!(h.run_until(10_000, |h| h.presented().len() >= 10));

    h.session.pause();
    assert!(h.session.is_paused());
    h.run_for(1.0);
    assert_eq!(h.presented().len(), 10);
    assert_eq!(*h.session.state(), PlayerState::Running);

    // Paused ticks sleep for the wakeup period
    let sleep = h.step();
    assert!((sleep - h.session.options().wakeup_period).abs() < 1e-9);

    let resumed_at = h.now();
    h.session.resume();
    assert!(h.run_until(10_000, |h| h.presented().len() >= 11));
    let next = h.presented()[10];
    assert!((next.pts - 0.4).abs() < 1e-9);
    assert!(next.at - resumed_at < 0.05, "resumed frame shown {:.3}s late", next.at - resumed_at);
}

#[test]
fn test_step_forward_shows_one_frame() {
    let mut h = HarnessBuilder::new(video_source(4.0, 25)).without_audio().build().unwrap();
    assert!(h.run_until(10_000, |h| h.presented().len() >= 10));
    h.session.pause();

    h.session.handle_command(SessionCommand::StepFrame(StepDirection::Forward)).unwrap();
    assert!(!h.session.is_paused());
    assert!(h.run_until(1_000, |h| h.session.is_paused()));

    assert_eq!(h.presented().len(), 11);
    assert!((h.presented()[10].pts - 0.4).abs() < 1e-9);
    h.run_for(1.0);
    assert_eq!(h.presented().len(), 11);
}

#[test]
fn test_speed_scales_frame_pacing() {
    let options = PlayerOptions {
        speed: 2.0,
        ..Default::default()
    };
    let mut h = HarnessBuilder::new(video_source(1.0, 25))
        .without_audio()
        .options(options)
        .build()
        .unwrap();
    h.run_to_end(100_000);

    let presented = h.presented();
    assert_eq!(presented.len(), 25);
    for frame in presented {
        assert!(
            (frame.at - frame.pts / 2.0).abs() < 0.01,
            "frame {:.2} shown at {:.4}s",
            frame.pts,
            frame.at
        );
    }
}

#[test]
fn test_frame_limit_stops_session() {
    let options = PlayerOptions {
        max_frames: Some(7),
        ..Default::default()
    };
    let mut h = HarnessBuilder::new(av_source(2.0, 25)).options(options).build().unwrap();
    h.run_to_end(100_000);

    assert_eq!(*h.session.state(), PlayerState::Stopped);
    assert_eq!(h.presented().len(), 7);
}

#[test]
fn test_stop_command_is_terminal() {
    let mut h = HarnessBuilder::new(av_source(2.0, 25)).build().unwrap();
    assert!(h.run_until(10_000, |h| h.presented().len() >= 3));

    h.session.request_seek(SeekRequest::absolute(1.0));
    assert!(h.session.has_pending_seek());
    h.session.handle_command(SessionCommand::Stop).unwrap();
    assert_eq!(*h.session.state(), PlayerState::Stopped);
    assert!(!h.session.has_pending_seek());

    let shown = h.presented().len();
    let written = h.audio_log().written_bytes;
    let sleep = h.step();
    assert!(sleep > 0.0);
    assert_eq!(h.presented().len(), shown);
    assert_eq!(h.audio_log().written_bytes, written);

    assert_eq!(h.session.stats().seeks, 0);

    let changes: Vec<_> = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, PlayerEvent::StateChanged { .. }))
        .collect();
    assert!(!changes.is_empty());
}

#[test]
fn test_waiting_demuxer_wakes_session() {
    let source = SharedDemuxer::new(video_source(1.0, 25));
    source.hold(0);
    let mut h = HarnessBuilder::new(source.clone()).without_audio().build().unwrap();

    let sleep = h.step();
    assert!((sleep - h.session.options().wakeup_period).abs() < 1e-9);
    assert_eq!(h.session.decoder_status(StreamKind::Video), Some(DecoderStatus::Wait));
    assert!(h.presented().is_empty());

    let wakeup = h.session.wakeup_handle();
    assert!(!wakeup.is_pending());
    source.release(0);
    assert!(wakeup.take());

    h.step();
    assert_eq!(h.presented().len(), 1);
    assert_eq!(h.presented()[0].pts, 0.0);
}

#[test]
fn test_stalled_audio_output_fails_playback() {
    let options = PlayerOptions {
        output_stall_timeout: 0.5,
        ..Default::default()
    };
    let mut h = HarnessBuilder::new(av_source(4.0, 25))
        .options(options)
        .stalled_audio()
        .build()
        .unwrap();
    h.run_to_end(100_000);

    assert_eq!(*h.session.state(), PlayerState::Error(PlaybackFailure::OutputStalled));
    assert!(h.now() >= 0.5);
    assert_eq!(h.audio_log().written_bytes, 0);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, PlayerEvent::PlaybackFailed { .. })));
}

#[test]
fn test_audio_latency_delays_video() {
    let mut h = HarnessBuilder::new(av_source(1.0, 25))
        .audio_latency(0.1)
        .build()
        .unwrap();
    h.run_to_end(100_000);

    // Frames follow what is audible, not what was written
    let presented = h.presented();
    assert_eq!(presented.len(), 25);
    for frame in presented.iter().skip(5) {
        assert!(
            (frame.at - frame.pts - 0.1).abs() < 0.02,
            "frame {:.2} shown at {:.4}s",
            frame.pts,
            frame.at
        );
    }
}
