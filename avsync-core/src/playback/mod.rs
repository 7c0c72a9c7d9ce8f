//! Playback scheduling: one session per file, ticked by an async runner

pub mod clock;
pub mod framedrop;
pub mod runner;
pub mod seek;
pub mod session;
pub mod state;
pub mod sync;
pub mod timeline;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use runner::{run, SessionHandle};
pub use seek::{SeekDirection, SeekExactness, SeekRequest, SeekTarget};
pub use session::{PlaybackSession, PlaybackStats, SessionOutputs};
pub use state::{PlaybackFailure, PlayerState, SessionPhase};
pub use timeline::{Timeline, TimelinePart};
