//! Test helper modules for avsync-core integration tests
//!
//! Provides reusable test infrastructure components:
//! - Synthetic packet sources (raw video, PCM audio)
//! - Mock decoder families for driver-selection scenarios
//! - Harness: a session on a manual clock with recording outputs
//! - WAV file generation for the symphonia path

#![allow(dead_code)]

pub mod audio_generator;
pub mod drivers;
pub mod harness;
pub mod media;

// Re-export commonly used types
pub use audio_generator::generate_sine_wav;
pub use drivers::{passthrough_only, FailingFactory, SlowVideoFactory};
pub use harness::{Harness, HarnessBuilder};
pub use media::{
    audio_source, audio_stream, av_source, pcm_packets, sample_value, video_packets, video_source, video_stream,
    SharedDemuxer, AUDIO_RATE, FPS,
};
