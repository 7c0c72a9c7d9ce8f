//! Mock decoder families

use avsync_core::decode::{
    ControlResult, DecoderCandidate, DecoderDriver, DriverCommand, DriverFactory, DriverRegistry, DropMode, Received,
};
use avsync_core::media::{Frame, Packet, StreamKind, StreamParams, VideoImage};
use avsync_core::playback::ManualClock;
use avsync_core::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Family offering a codec-specific decoder for every stream whose
/// initialization always fails
#[derive(Debug, Default)]
pub struct FailingFactory {
    opens: AtomicUsize,
}

impl FailingFactory {
    pub const FAMILY: &'static str = "broken";

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of open attempts so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl DriverFactory for FailingFactory {
    fn family(&self) -> &str {
        Self::FAMILY
    }

    fn candidates(&self, params: &StreamParams) -> Vec<DecoderCandidate> {
        vec![DecoderCandidate {
            family: Self::FAMILY.to_string(),
            decoder: "always-fails".to_string(),
            codec: params.codec.clone(),
            generic: false,
        }]
    }

    fn open(&self, _params: &StreamParams, decoder: &str) -> Result<Box<dyn DecoderDriver>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Err(Error::DriverInit {
            decoder: decoder.to_string(),
            reason: "simulated init failure".to_string(),
        })
    }
}

/// Registry with only the passthrough family (PCM is handed out unchanged)
pub fn passthrough_only() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Arc::new(avsync_core::decode::passthrough::PassthroughFactory));
    registry
}

/// Video family whose decoder burns `cost` seconds of the manual clock per
/// decoded picture; pictures decoded under a drop mode are free
#[derive(Debug, Clone)]
pub struct SlowVideoFactory {
    clock: ManualClock,
    cost: f64,
}

impl SlowVideoFactory {
    pub const FAMILY: &'static str = "slow";

    pub fn new(clock: ManualClock, cost: f64) -> Arc<Self> {
        Arc::new(Self { clock, cost })
    }
}

impl DriverFactory for SlowVideoFactory {
    fn family(&self) -> &str {
        Self::FAMILY
    }

    fn candidates(&self, params: &StreamParams) -> Vec<DecoderCandidate> {
        if params.kind != StreamKind::Video {
            return Vec::new();
        }
        vec![DecoderCandidate {
            family: Self::FAMILY.to_string(),
            decoder: "slow-video".to_string(),
            codec: params.codec.clone(),
            generic: false,
        }]
    }

    fn open(&self, params: &StreamParams, _decoder: &str) -> Result<Box<dyn DecoderDriver>> {
        Ok(Box::new(SlowVideoDriver {
            clock: self.clock.clone(),
            cost: self.cost,
            width: params.width,
            height: params.height,
            drop_mode: DropMode::None,
            queue: VecDeque::new(),
            draining: false,
        }))
    }
}

struct SlowVideoDriver {
    clock: ManualClock,
    cost: f64,
    width: u32,
    height: u32,
    drop_mode: DropMode,
    queue: VecDeque<Frame>,
    draining: bool,
}

impl DecoderDriver for SlowVideoDriver {
    fn name(&self) -> &str {
        "slow-video"
    }

    fn send_packet(&mut self, packet: Option<&mut Packet>) -> Result<bool> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(true);
        };
        let discarded = self.drop_mode != DropMode::None;
        if !discarded {
            self.clock.advance(self.cost);
        }
        let mut frame = Frame::video(
            packet.pts,
            VideoImage {
                width: self.width,
                height: self.height,
                data: packet.data().to_vec(),
            },
        );
        frame.discarded = discarded;
        let len = packet.len();
        packet.consume(len);
        self.queue.push_back(frame);
        Ok(true)
    }

    fn receive_frame(&mut self) -> Result<Received> {
        match self.queue.pop_front() {
            Some(frame) => Ok(Received::Frame(frame)),
            None if self.draining => Ok(Received::Eof),
            None => Ok(Received::Pending),
        }
    }

    fn control(&mut self, cmd: DriverCommand) -> ControlResult {
        match cmd {
            DriverCommand::Reset => {
                self.queue.clear();
                self.draining = false;
            }
            DriverCommand::SetFramedrop(mode) => self.drop_mode = mode,
        }
        ControlResult::Ok
    }
}
