//! Live-edge synchronization
//!
//! Measures how far the play head trails the buffered live edge on every
//! segment arrival and asks for a corrective forward jump once the lag
//! passes the view's threshold. Playback rate is pinned to 1.0; there is no
//! catch-up by speeding up.
//!
//! The synchronizer also keeps the overlay statistics of the stream: the
//! current rendition, frame rate and dropped frames derived from the
//! engine's periodic frame counter samples.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::engine::{FrameCounters, LevelInfo, Resolution, SegmentTiming};

/// Minimum data ahead of the play head before a stall skip is attempted
const STALL_SKIP_MIN_AHEAD: f64 = 0.5;

/// How far behind the buffered edge a stall skip lands
const STALL_SKIP_BACKOFF: f64 = 0.1;

const PINNED_RATE: f64 = 1.0;

/// Thresholds for one view context
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Lag in seconds above which a seek is issued
    pub lag_threshold: f64,
    /// Distance behind the buffered edge the seek lands at
    pub seek_margin: f64,
}

impl SyncConfig {
    pub fn grid() -> Self {
        Self {
            lag_threshold: 2.0,
            seek_margin: 0.5,
        }
    }

    pub fn detail() -> Self {
        Self {
            lag_threshold: 6.0,
            seek_margin: 1.0,
        }
    }
}

/// Last measurements taken from segment arrivals
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub buffered_edge: f64,
    pub position: f64,
    pub lag: f64,
    /// Bits per second of the last segment load, if measurable
    pub bandwidth_bps: Option<f64>,
}

/// Public view of the synchronizer counters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub lag: f64,
    /// Seconds buffered ahead of the play head at the last measurement
    pub buffer_length: f64,
    pub bandwidth_bps: Option<f64>,
    pub resolution: Option<Resolution>,
    /// Advertised bitrate of the current rendition
    pub level_bitrate: Option<u64>,
    /// Decoded frames per second between the last two samples
    pub fps: Option<f64>,
    pub dropped_frames: u64,
    pub segments: u64,
    pub corrections: u64,
}

#[derive(Debug, Clone, Copy)]
struct FrameSample {
    counters: FrameCounters,
    at: Instant,
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncDecision {
    Hold,
    Seek { to: f64, lag: f64 },
}

#[derive(Debug, Clone)]
pub struct LiveEdgeSynchronizer {
    config: SyncConfig,
    state: SyncState,
    level: LevelInfo,
    last_frames: Option<FrameSample>,
    fps: Option<f64>,
    segments: u64,
    corrections: u64,
}

impl LiveEdgeSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            state: SyncState::default(),
            level: LevelInfo::default(),
            last_frames: None,
            fps: None,
            segments: 0,
            corrections: 0,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Record a segment arrival and decide whether to jump to the live edge
    ///
    /// Never seeks when `actively_playing` is false.
    pub fn observe(&mut self, timing: &SegmentTiming, actively_playing: bool) -> SyncDecision {
        self.segments += 1;
        self.state.buffered_edge = timing.buffered_edge;
        self.state.position = timing.position;
        self.state.lag = (timing.buffered_edge - timing.position).max(0.0);

        let secs = timing.load_time.as_secs_f64();
        if timing.bytes > 0 && secs > 0.0 {
            self.state.bandwidth_bps = Some(timing.bytes as f64 * 8.0 / secs);
        }

        if !actively_playing || timing.paused || self.state.lag <= self.config.lag_threshold {
            return SyncDecision::Hold;
        }

        let to = timing.buffered_edge - self.config.seek_margin;
        debug!(
            lag = self.state.lag,
            threshold = self.config.lag_threshold,
            to,
            "Live edge lag over threshold"
        );
        SyncDecision::Seek {
            to,
            lag: self.state.lag,
        }
    }

    /// Note that a seek was issued to `position`
    pub fn record_seek(&mut self, position: f64) {
        self.corrections += 1;
        self.state.position = position;
        self.state.lag = (self.state.buffered_edge - position).max(0.0);
    }

    pub fn observe_level(&mut self, level: LevelInfo) {
        self.level = level;
    }

    /// Record cumulative frame counters sampled at `at`
    ///
    /// The frame rate is the decoded-frame delta over the time since the
    /// previous sample. Counters going backwards restart the measurement.
    pub fn observe_frames(&mut self, counters: FrameCounters, at: Instant) {
        if let Some(last) = self.last_frames {
            let elapsed = at.saturating_duration_since(last.at).as_secs_f64();
            if counters.decoded < last.counters.decoded {
                self.fps = None;
            } else if elapsed > 0.0 {
                self.fps = Some((counters.decoded - last.counters.decoded) as f64 / elapsed);
            }
        }
        self.last_frames = Some(FrameSample { counters, at });
    }

    /// Target for skipping over a buffer stall, if enough data is ahead
    pub fn stall_skip(&self) -> Option<f64> {
        let SyncState {
            buffered_edge,
            position,
            ..
        } = self.state;
        if buffered_edge > position + STALL_SKIP_MIN_AHEAD {
            Some(buffered_edge - STALL_SKIP_BACKOFF)
        } else {
            None
        }
    }

    /// Rate to force when the engine drifts from 1.0
    pub fn rate_correction(&self, observed: f64) -> Option<f64> {
        if (observed - PINNED_RATE).abs() > f64::EPSILON {
            Some(PINNED_RATE)
        } else {
            None
        }
    }

    /// Forget measurements; used when a new binding starts
    pub fn reset(&mut self) {
        self.state = SyncState::default();
        self.level = LevelInfo::default();
        self.last_frames = None;
        self.fps = None;
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            lag: self.state.lag,
            buffer_length: (self.state.buffered_edge - self.state.position).max(0.0),
            bandwidth_bps: self.state.bandwidth_bps,
            resolution: self.level.resolution,
            level_bitrate: self.level.bitrate,
            fps: self.fps,
            dropped_frames: self.last_frames.map_or(0, |s| s.counters.dropped),
            segments: self.segments,
            corrections: self.corrections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timing(edge: f64, position: f64) -> SegmentTiming {
        SegmentTiming {
            buffered_edge: edge,
            position,
            paused: false,
            bytes: 100_000,
            load_time: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_seek_when_lag_exceeds_threshold() {
        let mut sync = LiveEdgeSynchronizer::new(SyncConfig::grid());
        let decision = sync.observe(&timing(10.0, 7.0), true);
        assert_eq!(decision, SyncDecision::Seek { to: 9.5, lag: 3.0 });

        sync.record_seek(9.5);
        assert!(sync.state().lag < sync.config().lag_threshold);
        assert_eq!(sync.stats().corrections, 1);
    }

    #[test]
    fn test_hold_under_threshold() {
        let mut sync = LiveEdgeSynchronizer::new(SyncConfig::detail());
        assert_eq!(sync.observe(&timing(10.0, 5.0), true), SyncDecision::Hold);
    }

    #[test]
    fn test_no_seek_when_not_playing() {
        let mut sync = LiveEdgeSynchronizer::new(SyncConfig::grid());
        assert_eq!(sync.observe(&timing(30.0, 1.0), false), SyncDecision::Hold);

        let mut paused = timing(30.0, 1.0);
        paused.paused = true;
        assert_eq!(sync.observe(&paused, true), SyncDecision::Hold);
    }

    #[test]
    fn test_bandwidth_estimate() {
        let mut sync = LiveEdgeSynchronizer::new(SyncConfig::grid());
        sync.observe(&timing(1.0, 1.0), true);
        assert_eq!(sync.stats().bandwidth_bps, Some(4_000_000.0));
    }

    #[test]
    fn test_stall_skip() {
        let mut sync = LiveEdgeSynchronizer::new(SyncConfig::grid());
        sync.observe(&timing(5.0, 4.8), false);
        assert_eq!(sync.stall_skip(), None);

        sync.observe(&timing(5.0, 4.0), false);
        assert_eq!(sync.stall_skip(), Some(4.9));
    }

    #[test]
    fn test_fps_from_frame_samples() {
        let mut sync = LiveEdgeSynchronizer::new(SyncConfig::grid());
        let start = Instant::now();
        sync.observe_frames(FrameCounters { decoded: 100, dropped: 0 }, start);
        assert_eq!(sync.stats().fps, None);

        sync.observe_frames(
            FrameCounters { decoded: 125, dropped: 2 },
            start + Duration::from_secs(1),
        );
        let stats = sync.stats();
        assert_eq!(stats.fps, Some(25.0));
        assert_eq!(stats.dropped_frames, 2);

        // A fresh engine starts counting from zero
        sync.observe_frames(
            FrameCounters { decoded: 10, dropped: 0 },
            start + Duration::from_secs(2),
        );
        assert_eq!(sync.stats().fps, None);

        sync.observe_level(LevelInfo {
            resolution: Some(Resolution { width: 640, height: 360 }),
            bitrate: Some(800_000),
        });
        sync.reset();
        let stats = sync.stats();
        assert_eq!(stats.resolution, None);
        assert_eq!(stats.dropped_frames, 0);
    }

    #[test]
    fn test_buffer_length_follows_seek() {
        let mut sync = LiveEdgeSynchronizer::new(SyncConfig::grid());
        sync.observe(&timing(10.0, 7.0), true);
        assert_eq!(sync.stats().buffer_length, 3.0);
        sync.record_seek(9.5);
        assert_eq!(sync.stats().buffer_length, 0.5);
    }

    #[test]
    fn test_rate_pinned() {
        let sync = LiveEdgeSynchronizer::new(SyncConfig::grid());
        assert_eq!(sync.rate_correction(1.25), Some(1.0));
        assert_eq!(sync.rate_correction(1.0), None);
    }
}
