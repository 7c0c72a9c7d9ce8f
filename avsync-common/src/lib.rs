//! # AV Sync Common Library
//!
//! Shared vocabulary for the decode-and-synchronization core:
//! - Timestamp helpers (seconds, bytes, NO_PTS handling)
//! - Event types (PlayerEvent enum) and the broadcast EventBus
//! - Bootstrap configuration loading (TOML + config dir resolution)
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod timing;

pub use error::{Error, Result};
pub use events::{EventBus, PlayerEvent};
pub use timing::Pts;
