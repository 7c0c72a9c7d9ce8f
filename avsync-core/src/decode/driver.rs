//! Decoder driver interface and typed driver registry
//!
//! **Architecture:**
//! - [`DecoderDriver`]: one initialized decoder instance (send packet /
//!   receive frame / control / uninit)
//! - [`DriverFactory`]: a decoder family. It lists the decoders it offers
//!   for a stream and opens them (the `init` step)
//! - [`DriverRegistry`]: ordered set of factories plus the selection
//!   algorithm. Codec-specific candidates are tried before generic
//!   fallbacks, the first successful open wins, and failure of every
//!   candidate is reported as [`Error::NoDecoder`] for the caller to treat
//!   as "stream unavailable"

use crate::error::{Error, Result};
use crate::media::{Frame, Packet, StreamParams};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decode-but-discard request passed to a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropMode {
    #[default]
    None,
    /// Catch-up drop: skip everything not needed as a reference
    Standard,
    /// Exact-seek drop: output before the seek target is discarded
    HrSeekOnly,
}

/// Out-of-band driver commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCommand {
    /// Flush internal buffers after a seek, keep the driver open
    Reset,
    /// Set the drop mode for subsequent packets
    SetFramedrop(DropMode),
}

/// Outcome of [`DecoderDriver::control`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResult {
    Ok,
    /// Command not supported by this driver
    Unknown,
}

/// Result of pulling output from a driver
#[derive(Debug)]
pub enum Received {
    Frame(Frame),
    /// Nothing yet; feed more input
    Pending,
    /// Driver is fully drained
    Eof,
}

/// An initialized decoder
pub trait DecoderDriver: Send {
    /// Decoder name as listed by its factory
    fn name(&self) -> &str;

    /// Feed a packet (`None` flushes at end of stream)
    ///
    /// Returns `true` when the packet was fully consumed. Partial
    /// consumption advances the packet with [`Packet::consume`] and returns
    /// `false`; the caller resubmits the remainder later.
    fn send_packet(&mut self, packet: Option<&mut Packet>) -> Result<bool>;

    /// Pull at most one decoded frame
    fn receive_frame(&mut self) -> Result<Received>;

    fn control(&mut self, cmd: DriverCommand) -> ControlResult;

    /// Release codec resources; frames already handed out stay valid
    fn uninit(&mut self) {}
}

/// One decoder a factory can open for a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderCandidate {
    pub family: String,
    pub decoder: String,
    pub codec: String,
    /// Generic fallback (tried after every codec-specific candidate)
    pub generic: bool,
}

impl std::fmt::Display for DecoderCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.family, self.decoder)
    }
}

/// A family of decoders
pub trait DriverFactory: Send + Sync {
    fn family(&self) -> &str;

    /// Decoders this family offers for the stream, best first
    fn candidates(&self, params: &StreamParams) -> Vec<DecoderCandidate>;

    /// Open (initialize) the named decoder
    fn open(&self, params: &StreamParams, decoder: &str) -> Result<Box<dyn DecoderDriver>>;
}

/// A selected and initialized driver
pub struct SelectedDriver {
    pub driver: Box<dyn DecoderDriver>,
    pub candidate: DecoderCandidate,
}

impl std::fmt::Debug for SelectedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedDriver")
            .field("candidate", &self.candidate)
            .finish()
    }
}

/// One parsed decoder preference entry
#[derive(Debug, Clone, PartialEq, Eq)]
enum Preference {
    Prefer { family: String, decoder: Option<String> },
    Exclude { family: String },
}

impl Preference {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        if let Some(family) = entry.strip_prefix('-') {
            return Some(Preference::Exclude {
                family: family.to_string(),
            });
        }
        Some(match entry.split_once(':') {
            Some((family, decoder)) => Preference::Prefer {
                family: family.to_string(),
                decoder: Some(decoder.to_string()),
            },
            None => Preference::Prefer {
                family: entry.to_string(),
                decoder: None,
            },
        })
    }

    fn matches(&self, candidate: &DecoderCandidate) -> bool {
        match self {
            Preference::Prefer { family, decoder } => {
                candidate.family == *family
                    && decoder.as_ref().map_or(true, |d| candidate.decoder == *d)
            }
            Preference::Exclude { family } => candidate.family == *family,
        }
    }
}

/// Registry of decoder families
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: Vec<Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in families (symphonia, passthrough)
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::symphonia_driver::SymphoniaFactory::new()));
        registry.register(Arc::new(super::passthrough::PassthroughFactory));
        registry
    }

    /// Add a family; earlier registrations win ties
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) {
        debug!("Registered decoder family '{}'", factory.family());
        self.factories.push(factory);
    }

    pub fn families(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.family()).collect()
    }

    /// Ordered candidate list for a stream
    ///
    /// Codec-specific candidates come first, generic ones after; within
    /// each group registration order is kept. Preference entries then move
    /// matching candidates to the front (in entry order) and `-family`
    /// entries remove a family entirely.
    pub fn candidates(&self, params: &StreamParams, preferences: &[String]) -> Vec<DecoderCandidate> {
        let all: Vec<DecoderCandidate> = self
            .factories
            .iter()
            .flat_map(|f| f.candidates(params))
            .collect();
        let (specific, generic): (Vec<_>, Vec<_>) = all.into_iter().partition(|c| !c.generic);
        let mut list: Vec<DecoderCandidate> = specific.into_iter().chain(generic).collect();

        let prefs: Vec<Preference> = preferences.iter().filter_map(|p| Preference::parse(p)).collect();

        list.retain(|c| {
            !prefs
                .iter()
                .any(|p| matches!(p, Preference::Exclude { .. }) && p.matches(c))
        });

        let mut ordered = Vec::with_capacity(list.len());
        for pref in prefs.iter().filter(|p| matches!(p, Preference::Prefer { .. })) {
            let (hit, rest): (Vec<_>, Vec<_>) = list.into_iter().partition(|c| pref.matches(c));
            ordered.extend(hit);
            list = rest;
        }
        ordered.extend(list);
        ordered
    }

    /// Try each candidate in order; first successful open wins
    pub fn select(&self, params: &StreamParams, preferences: &[String]) -> Result<SelectedDriver> {
        let candidates = self.candidates(params, preferences);
        if candidates.is_empty() {
            warn!(
                "No {} decoder candidates for codec '{}'",
                params.kind, params.codec
            );
        }

        for candidate in candidates {
            let Some(factory) = self.factories.iter().find(|f| f.family() == candidate.family) else {
                continue;
            };
            debug!("Opening {} decoder {}", params.kind, candidate);
            match factory.open(params, &candidate.decoder) {
                Ok(driver) => {
                    info!(
                        "Selected {} decoder {} for codec '{}'",
                        params.kind, candidate, params.codec
                    );
                    return Ok(SelectedDriver { driver, candidate });
                }
                Err(e) => {
                    warn!("Could not open {} decoder {}: {}", params.kind, candidate, e);
                }
            }
        }

        Err(Error::NoDecoder(params.codec.clone()))
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("families", &self.families())
            .finish()
    }
}
