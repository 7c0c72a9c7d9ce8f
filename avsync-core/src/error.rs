//! Error types for avsync-core
//!
//! Only a few of these ever stop playback. Driver init failures, decode
//! failures and seek failures are recovered inside the session and show up
//! as statistics or events. The variants exist so the recovering code can
//! log precisely what it swallowed.

use thiserror::Error;

/// Main error type for avsync-core
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent player options
    #[error("Configuration error: {0}")]
    Config(String),

    /// A decoder driver failed to open
    #[error("Decoder init failed ({decoder}): {reason}")]
    DriverInit { decoder: String, reason: String },

    /// No candidate could decode the stream
    #[error("No decoder available for codec '{0}'")]
    NoDecoder(String),

    /// A decode call failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Packet source failure
    #[error("Demuxer error: {0}")]
    Demux(String),

    /// Audio or video output failure
    #[error("Output error: {0}")]
    Output(String),

    /// Seek could not be performed
    #[error("Seek error: {0}")]
    Seek(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Rejected state-machine transition
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Error from the shared library
    #[error(transparent)]
    Common(#[from] avsync_common::Error),
}

/// Convenience Result type using avsync-core Error
pub type Result<T> = std::result::Result<T, Error>;

impl From<symphonia::core::errors::Error> for Error {
    fn from(e: symphonia::core::errors::Error) -> Self {
        Error::Decode(e.to_string())
    }
}
