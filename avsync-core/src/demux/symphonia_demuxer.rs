//! File demuxer backed by a symphonia format reader
//!
//! Container parsing stays inside symphonia; this adapter only maps tracks
//! to [`StreamParams`], converts timestamps to seconds and keeps one packet
//! queue per stream so interleaved reads work per stream. Reads never
//! block on anything but the file, so the async read never reports
//! `WouldBlock`.

use super::{AsyncRead, DemuxSeekFlags, DemuxSeekTarget, Demuxer, WakeupHandle};
use crate::decode::symphonia_driver::codec_name;
use crate::error::{Error, Result};
use crate::media::{Packet, StreamId, StreamParams};
use avsync_common::timing::Pts;
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use symphonia::core::codecs::CodecParameters;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, info, warn};

struct Track {
    id: u32,
    time_base: Option<TimeBase>,
    queue: VecDeque<Packet>,
}

/// Demuxer over a media file
pub struct SymphoniaDemuxer {
    reader: Box<dyn FormatReader>,
    tracks: Vec<Track>,
    params: Vec<StreamParams>,
    duration: Option<f64>,
    eof: bool,
}

fn seconds(time_base: Option<TimeBase>, ts: u64) -> Pts {
    time_base.map(|tb| {
        let Time { seconds, frac } = tb.calc_time(ts);
        seconds as f64 + frac
    })
}

fn stream_params(cp: &CodecParameters) -> StreamParams {
    let codec = codec_name(cp.codec).unwrap_or("unknown");
    let channels = cp.channels.map_or(0, |c| c.count() as u16);
    let mut params = StreamParams::audio(codec, cp.sample_rate.unwrap_or(0), channels);
    params.bits_per_sample = cp.bits_per_sample.unwrap_or(0);
    if let Some(extra) = &cp.extra_data {
        params.extradata = extra.to_vec();
    }
    params
}

impl SymphoniaDemuxer {
    /// Probe and open a media file
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::Demux(format!("{}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Demux(format!("probe failed: {}", e)))?;

        let reader = probed.format;
        let mut tracks = Vec::new();
        let mut params = Vec::new();
        let mut duration: Option<f64> = None;
        for track in reader.tracks() {
            let cp = &track.codec_params;
            if let Some(d) = cp.n_frames.and_then(|n| seconds(cp.time_base, n)) {
                duration = Some(duration.map_or(d, |cur| cur.max(d)));
            }
            params.push(stream_params(cp));
            tracks.push(Track {
                id: track.id,
                time_base: cp.time_base,
                queue: VecDeque::new(),
            });
        }
        info!(
            "Opened {} ({} streams, duration {:?})",
            path.display(),
            params.len(),
            duration
        );

        Ok(Self {
            reader,
            tracks,
            params,
            duration,
            eof: false,
        })
    }

    /// Read one packet from the file into its stream queue
    fn read_into_queues(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let packet = match self.reader.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                debug!("End of file reached");
                self.eof = true;
                return Ok(false);
            }
            Err(e) => return Err(Error::Demux(e.to_string())),
        };
        let Some(index) = self.tracks.iter().position(|t| t.id == packet.track_id()) else {
            return Ok(true);
        };
        let track = &mut self.tracks[index];
        let pts = seconds(track.time_base, packet.ts());
        let mut out = Packet::new(index, packet.buf().to_vec()).with_pts(pts);
        if let Some(d) = seconds(track.time_base, packet.dur()) {
            out = out.with_duration(d);
        }
        track.queue.push_back(out);
        Ok(true)
    }

    fn fill(&mut self, stream: StreamId) -> Result<()> {
        if stream >= self.tracks.len() {
            return Err(Error::Demux(format!("no stream {}", stream)));
        }
        while self.tracks[stream].queue.is_empty() {
            if !self.read_into_queues()? {
                break;
            }
        }
        Ok(())
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn streams(&self) -> &[StreamParams] {
        &self.params
    }

    fn read_packet_blocking(&mut self, stream: StreamId) -> Result<Option<Packet>> {
        self.fill(stream)?;
        Ok(self.tracks[stream].queue.pop_front())
    }

    fn read_packet_async(&mut self, stream: StreamId) -> Result<AsyncRead> {
        Ok(match self.read_packet_blocking(stream)? {
            Some(p) => AsyncRead::Packet(p),
            None => AsyncRead::Eof,
        })
    }

    fn seek(&mut self, target: DemuxSeekTarget, flags: DemuxSeekFlags) -> Result<()> {
        let seconds = match target {
            DemuxSeekTarget::Absolute(t) => t,
            DemuxSeekTarget::Factor(f) => {
                f * self
                    .duration
                    .ok_or_else(|| Error::Seek("factor seek without duration".to_string()))?
            }
            DemuxSeekTarget::Relative(_) => {
                return Err(Error::Seek("relative seeks must be resolved by the caller".to_string()))
            }
        };
        let mode = if flags.backward {
            SeekMode::Coarse
        } else {
            SeekMode::Accurate
        };
        self.reader
            .seek(
                mode,
                SeekTo::Time {
                    time: Time::from(seconds.max(0.0)),
                    track_id: None,
                },
            )
            .map_err(|e| {
                warn!("Seek to {:.3} failed: {}", seconds, e);
                Error::Seek(e.to_string())
            })?;
        for track in &mut self.tracks {
            track.queue.clear();
        }
        self.eof = false;
        Ok(())
    }

    fn has_packet_ready(&self, stream: StreamId) -> bool {
        self.tracks
            .get(stream)
            .is_some_and(|t| !t.queue.is_empty() || !self.eof)
    }

    fn next_pts(&mut self, stream: StreamId) -> Pts {
        self.fill(stream).ok()?;
        self.tracks[stream].queue.front().and_then(|p| p.pts)
    }

    fn set_wakeup(&mut self, _wakeup: WakeupHandle) {
        // File reads complete synchronously; nothing ever needs waking
    }

    fn accurate_seek(&self) -> bool {
        true
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }
}
