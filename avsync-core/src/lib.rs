//! # AV Sync Core Library (avsync-core)
//!
//! Decode-and-synchronization core of a media player.
//!
//! **Purpose:** Pull packets from a demuxer, decode them through pluggable
//! decoder drivers, recover presentation timestamps, and schedule audio and
//! video output so that both stay in sync across seeks, timeline parts and
//! slow machines.
//!
//! **Architecture:**
//! - `decode`: driver registry and the per-stream decoder pump
//! - `demux`: packet source boundary (in-memory and symphonia-backed)
//! - `output`: audio/video output boundary plus simulated devices
//! - `playback`: the session scheduler, sync clock, framedrop and seeking

pub mod config;
pub mod decode;
pub mod demux;
pub mod error;
pub mod events;
pub mod media;
pub mod output;
pub mod playback;

pub use config::PlayerOptions;
pub use error::{Error, Result};
pub use playback::{PlaybackSession, PlaybackStats, SessionHandle};
