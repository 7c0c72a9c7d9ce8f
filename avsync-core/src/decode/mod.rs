//! Decoding layer
//!
//! **Architecture:**
//! - `driver`: decoder driver trait and typed registry
//! - `symphonia_driver` / `passthrough`: the built-in driver families
//! - `pts`: timestamp recovery for video and the running audio clock
//! - `context`: per-stream decoder context and its pump step

pub mod context;
pub mod driver;
pub mod passthrough;
pub mod pts;
pub mod symphonia_driver;

pub use context::{DecoderStats, DecoderStatus, StreamDecoder};
pub use driver::{
    ControlResult, DecoderCandidate, DecoderDriver, DriverCommand, DriverFactory, DriverRegistry, DropMode, Received,
    SelectedDriver,
};
pub use pts::{AudioPtsClock, FrameTiming, PtsRecovery, PtsStats};
