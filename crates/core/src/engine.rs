//! Playback engine seam
//!
//! The session manager never decodes media. It drives an external adaptive
//! segmented-media engine through [`PlaybackEngine`] and listens to the
//! engine's asynchronous notifications as [`EngineSignal`]s. Every signal
//! carries the [`BindingId`] of the engine instance that produced it, so the
//! owning session can drop signals from a binding it already released.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::camera::{CameraId, Quality};
use crate::policy::ViewKind;
use crate::resolver::StreamDescriptor;

/// Identity of one engine instance; never reused within a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Identity of a rendering surface provided by the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkId(pub u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink{}", self.0)
    }
}

/// Engine buffer and loader parameters for one view/tier combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineTuning {
    pub low_latency: bool,
    /// Seconds of media to buffer ahead
    pub max_buffer_length: f64,
    pub max_max_buffer_length: f64,
    /// Bytes
    pub max_buffer_size: u64,
    pub max_buffer_hole: f64,
    pub back_buffer_length: f64,
    /// Segments behind the live edge to start at
    pub live_sync_duration_count: u32,
    /// Segments behind the live edge before the engine jumps on its own
    pub live_max_latency_duration_count: u32,
    pub loading_timeout: Duration,
    pub manifest_max_retry: u32,
    pub fragment_max_retry: u32,
}

impl EngineTuning {
    /// Tuning for a view and quality tier
    ///
    /// Grids run a minimal-buffer low-latency profile whatever the tier;
    /// focused views scale buffers with the tier.
    pub fn for_view(kind: ViewKind, quality: Quality) -> Self {
        if kind == ViewKind::Grid {
            return Self {
                low_latency: true,
                max_buffer_length: 2.0,
                max_max_buffer_length: 4.0,
                max_buffer_size: 2_000_000,
                max_buffer_hole: 0.1,
                back_buffer_length: 0.5,
                live_sync_duration_count: 1,
                live_max_latency_duration_count: 4,
                loading_timeout: Duration::from_secs(5),
                manifest_max_retry: 6,
                fragment_max_retry: 10,
            };
        }

        let (buffer, max_buffer, size, sync, max_latency) = match quality {
            Quality::High => (30.0, 60.0, 60_000_000, 3, 10),
            Quality::Medium => (20.0, 40.0, 40_000_000, 2, 6),
            Quality::Low => (10.0, 20.0, 20_000_000, 1, 3),
        };

        Self {
            low_latency: false,
            max_buffer_length: buffer,
            max_max_buffer_length: max_buffer,
            max_buffer_size: size,
            max_buffer_hole: 2.0,
            back_buffer_length: 10.0,
            live_sync_duration_count: sync,
            live_max_latency_duration_count: max_latency,
            loading_timeout: Duration::from_secs(20),
            manifest_max_retry: 4,
            fragment_max_retry: 6,
        }
    }
}

/// Category of an engine fault, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Transport-level interruption while loading
    Network,
    /// Decode or media pipeline error
    Media,
    /// Playlist could not be fetched (404, refused)
    ManifestLoad,
    ManifestParsing,
    LevelLoad,
    /// Playlist parse failure, e.g. media-sequence mismatch
    LevelParsing,
    AudioTrackLoadTimeout,
    BufferAppend,
    /// Play head ran out of buffered data
    BufferStalled,
    KeySystem,
    Mux,
    /// The platform cannot play this stream at all
    Unsupported,
    Other,
}

/// A fault notification from the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineFault {
    pub kind: FaultKind,
    /// Free-form engine detail string
    pub details: String,
    /// Whether the engine itself gave up on the current load
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl EngineFault {
    pub fn new(kind: FaultKind, fatal: bool, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: details.into(),
            fatal,
            http_status: None,
        }
    }

    pub fn fatal(kind: FaultKind, details: impl Into<String>) -> Self {
        Self::new(kind, true, details)
    }

    pub fn non_fatal(kind: FaultKind, details: impl Into<String>) -> Self {
        Self::new(kind, false, details)
    }

    /// Playlist fetch answered with 404
    pub fn manifest_not_found() -> Self {
        Self::fatal(FaultKind::ManifestLoad, "manifestLoadError").with_http_status(404)
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.details)?;
        if let Some(status) = self.http_status {
            write!(f, " (HTTP {})", status)?;
        }
        Ok(())
    }
}

/// Timing carried by a segment arrival
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SegmentTiming {
    /// End of the buffered range containing the play head, in media seconds
    pub buffered_edge: f64,
    /// Current play head, in media seconds
    pub position: f64,
    /// Whether the sink is paused
    pub paused: bool,
    /// Segment payload size
    pub bytes: u64,
    /// Time spent loading the segment
    pub load_time: Duration,
}

/// Pixel dimensions of a rendition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (width, height) = s
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(|| format!("invalid resolution {}", s))?;
        let parse = |v: &str| v.trim().parse::<u32>().map_err(|_| format!("invalid resolution {}", s));
        Ok(Self {
            width: parse(width)?,
            height: parse(height)?,
        })
    }
}

/// Rendition the engine is loading after a level switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LevelInfo {
    pub resolution: Option<Resolution>,
    /// Advertised bits per second of the rendition
    pub bitrate: Option<u64>,
}

/// Cumulative frame counters of the sink since the engine was bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameCounters {
    pub decoded: u64,
    pub dropped: u64,
}

/// Asynchronous notifications from an engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Playlist parsed; the engine is ready to play
    ManifestParsed { levels: usize, audio_tracks: usize },
    /// First frames rendering, or rendering resumed
    Playing,
    /// Play head waiting for data
    Waiting,
    /// Loader stalled
    Stalled,
    /// The sink paused without being asked to
    Paused,
    /// A play request was rejected by the platform
    PlayRejected { aborted: bool, reason: String },
    SegmentLoaded(SegmentTiming),
    LevelSwitched(LevelInfo),
    /// Periodic sample of the sink's frame counters
    Frames(FrameCounters),
    RateChanged(f64),
    Fault(EngineFault),
}

/// An engine event tagged with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSignal {
    pub camera_id: CameraId,
    pub binding: BindingId,
    pub event: EngineEvent,
}

/// Sending half of the engine signal channel handed to each engine
#[derive(Debug, Clone, Default)]
pub struct EngineEvents {
    tx: Option<mpsc::UnboundedSender<EngineSignal>>,
}

impl EngineEvents {
    pub fn new(tx: mpsc::UnboundedSender<EngineSignal>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything, for registries driven by hand
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Forward a signal to the supervisor; returns false once nobody listens
    pub fn emit(&self, signal: EngineSignal) -> bool {
        match &self.tx {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }
}

/// Everything an engine factory needs to build one binding
#[derive(Debug, Clone)]
pub struct BindRequest<'a> {
    pub camera_id: CameraId,
    pub binding: BindingId,
    pub sink: SinkId,
    pub descriptor: &'a StreamDescriptor,
    pub tuning: &'a EngineTuning,
    pub audio_enabled: bool,
    pub events: EngineEvents,
}

/// Errors raised by engine operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine does not expose this operation
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("engine failure: {0}")]
    Failed(String),
}

/// One instance of an adaptive segmented-media engine bound to one sink
///
/// All methods are fire-and-forget requests; outcomes arrive later as
/// [`EngineEvent`]s.
pub trait PlaybackEngine: Send {
    /// Start fetching the playlist the engine was created for
    fn load(&mut self) -> Result<(), EngineError>;

    fn play(&mut self) -> Result<(), EngineError>;

    fn set_audio_enabled(&mut self, enabled: bool) -> Result<(), EngineError>;

    /// Move the play head to `position` media seconds
    fn seek(&mut self, position: f64) -> Result<(), EngineError>;

    fn set_playback_rate(&mut self, rate: f64) -> Result<(), EngineError>;

    /// Self-heal after a network fault
    fn restart_loading(&mut self) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("restart_loading"))
    }

    /// Self-heal after a decode fault
    fn recover_media(&mut self) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("recover_media"))
    }

    /// Release every resource held by the engine; no signals after this
    fn destroy(&mut self);
}

/// Creates engine instances
pub trait EngineFactory: Send {
    fn create(&mut self, request: BindRequest<'_>) -> Result<Box<dyn PlaybackEngine>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_tuning_ignores_tier() {
        let low = EngineTuning::for_view(ViewKind::Grid, Quality::Low);
        let high = EngineTuning::for_view(ViewKind::Grid, Quality::High);
        assert_eq!(low, high);
        assert!(low.low_latency);
        assert_eq!(low.live_sync_duration_count, 1);
    }

    #[test]
    fn test_detail_tuning_scales_with_tier() {
        let high = EngineTuning::for_view(ViewKind::Detail, Quality::High);
        let low = EngineTuning::for_view(ViewKind::Detail, Quality::Low);
        assert!(high.max_buffer_length > low.max_buffer_length);
        assert_eq!(high.live_max_latency_duration_count, 10);
        assert_eq!(low.loading_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_detached_events_drop_signals() {
        let events = EngineEvents::detached();
        assert!(!events.emit(EngineSignal {
            camera_id: CameraId(1),
            binding: BindingId(1),
            event: EngineEvent::Playing,
        }));
    }

    #[test]
    fn test_resolution_parse() {
        let res: Resolution = "1920x1080".parse().unwrap();
        assert_eq!(res, Resolution { width: 1920, height: 1080 });
        assert_eq!(res.to_string(), "1920x1080");
        assert!("1920".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_fault_display() {
        let fault = EngineFault::manifest_not_found();
        assert_eq!(fault.to_string(), "ManifestLoad: manifestLoadError (HTTP 404)");
    }
}
