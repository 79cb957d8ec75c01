//! Headless playback engine that follows a live playlist over HTTP
//!
//! There is no decoder: the probe fetches the playlist and its newest
//! segments on the playlist's own cadence, models a play head advancing in
//! real time, and reports what a real engine would report (manifest parsed,
//! playing, waiting, stalled, segment timings and load faults).

use std::sync::Arc;
use std::time::Duration;

use camwall_core::{
    BindRequest, BindingId, CameraId, EngineError, EngineEvent, EngineEvents, EngineFactory,
    EngineFault, EngineSignal, FaultKind, LevelInfo, PlaybackEngine, SegmentTiming,
};
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::playlist::{self, MediaPlaylist, Playlist, Segment};

/// Playlist refreshes without a new segment before reporting a stall
const STALL_POLLS: u32 = 3;

const MIN_REFRESH: Duration = Duration::from_millis(500);
const MAX_REFRESH: Duration = Duration::from_secs(30);

/// Pause between a requested reload and the next fetch after a fault
const RELOAD_BACKOFF: Duration = Duration::from_secs(1);

/// Builds [`ProbeEngine`]s on a shared HTTP client
#[derive(Debug, Clone)]
pub struct ProbeEngineFactory {
    http: reqwest::Client,
    runtime: Handle,
}

impl ProbeEngineFactory {
    pub fn new(http: reqwest::Client, runtime: Handle) -> Self {
        Self { http, runtime }
    }
}

impl EngineFactory for ProbeEngineFactory {
    fn create(&mut self, request: BindRequest<'_>) -> Result<Box<dyn PlaybackEngine>, EngineError> {
        debug!(
            camera_id = %request.camera_id,
            binding = %request.binding,
            sink = %request.sink,
            url = %request.descriptor.url,
            audio = request.audio_enabled,
            "Creating probe engine"
        );

        let url = request.descriptor.url.clone();
        let control = Arc::new(ProbeControl::new());
        let task = ProbeTask {
            http: self.http.clone(),
            url: url.clone(),
            camera_id: request.camera_id,
            binding: request.binding,
            timeout: request.tuning.loading_timeout,
            live_sync_segments: request.tuning.live_sync_duration_count.max(1) as usize,
            control: control.clone(),
            events: request.events,
        };

        Ok(Box::new(ProbeEngine {
            url,
            task: Some(task),
            handle: None,
            control,
            runtime: self.runtime.clone(),
        }))
    }
}

#[derive(Debug)]
struct Playhead {
    play_requested: bool,
    /// Media seconds at `anchor`
    position: f64,
    rate: f64,
    /// Set while the play head advances
    anchor: Option<Instant>,
}

impl Playhead {
    fn current(&self) -> f64 {
        match self.anchor {
            Some(at) => self.position + at.elapsed().as_secs_f64() * self.rate,
            None => self.position,
        }
    }
}

/// State shared between the engine handle and its probing task
#[derive(Debug)]
struct ProbeControl {
    playhead: Mutex<Playhead>,
    play: Notify,
    restart: Notify,
}

impl ProbeControl {
    fn new() -> Self {
        Self {
            playhead: Mutex::new(Playhead {
                play_requested: false,
                position: 0.0,
                rate: 1.0,
                anchor: None,
            }),
            play: Notify::new(),
            restart: Notify::new(),
        }
    }

    fn play_requested(&self) -> bool {
        self.playhead.lock().play_requested
    }

    fn position(&self) -> f64 {
        self.playhead.lock().current()
    }

    fn start_at(&self, position: f64) {
        let mut playhead = self.playhead.lock();
        playhead.position = position;
        playhead.anchor = Some(Instant::now());
    }

    fn freeze_at(&self, position: f64) {
        let mut playhead = self.playhead.lock();
        playhead.position = position;
        playhead.anchor = None;
    }

    fn resume(&self) {
        let mut playhead = self.playhead.lock();
        if playhead.anchor.is_none() {
            playhead.anchor = Some(Instant::now());
        }
    }

    fn seek(&self, position: f64) {
        let mut playhead = self.playhead.lock();
        playhead.position = position;
        if playhead.anchor.is_some() {
            playhead.anchor = Some(Instant::now());
        }
    }

    fn set_rate(&self, rate: f64) {
        let mut playhead = self.playhead.lock();
        let now = playhead.current();
        playhead.position = now;
        if playhead.anchor.is_some() {
            playhead.anchor = Some(Instant::now());
        }
        playhead.rate = rate;
    }
}

/// Engine handle owned by a session binding
pub struct ProbeEngine {
    url: Url,
    /// Taken by `load`
    task: Option<ProbeTask>,
    handle: Option<JoinHandle<()>>,
    control: Arc<ProbeControl>,
    runtime: Handle,
}

impl PlaybackEngine for ProbeEngine {
    fn load(&mut self) -> Result<(), EngineError> {
        let task = self
            .task
            .take()
            .ok_or_else(|| EngineError::Failed("probe already loaded".to_string()))?;
        info!(url = %self.url, "Probe loading playlist");
        self.handle = Some(self.runtime.spawn(task.run()));
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.control.playhead.lock().play_requested = true;
        self.control.play.notify_one();
        Ok(())
    }

    fn set_audio_enabled(&mut self, enabled: bool) -> Result<(), EngineError> {
        // No audio output; only the request is recorded
        debug!(url = %self.url, enabled, "Probe audio toggled");
        Ok(())
    }

    fn seek(&mut self, position: f64) -> Result<(), EngineError> {
        debug!(url = %self.url, position, "Probe seek");
        self.control.seek(position);
        Ok(())
    }

    fn set_playback_rate(&mut self, rate: f64) -> Result<(), EngineError> {
        if rate.is_nan() || rate <= 0.0 {
            return Err(EngineError::Failed(format!("invalid playback rate {}", rate)));
        }
        self.control.set_rate(rate);
        Ok(())
    }

    fn restart_loading(&mut self) -> Result<(), EngineError> {
        if self.handle.is_none() {
            return Err(EngineError::Failed("probe not loaded".to_string()));
        }
        self.control.restart.notify_one();
        Ok(())
    }

    fn destroy(&mut self) {
        self.task = None;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Playlist reload interval: the target duration, bounded
fn refresh_interval(media: &MediaPlaylist) -> Duration {
    Duration::from_secs(media.target_duration).clamp(MIN_REFRESH, MAX_REFRESH)
}

fn stream_ended() -> EngineFault {
    EngineFault::fatal(FaultKind::LevelLoad, "stream ended")
}

/// Entry playlist resolved to the media playlist being followed
struct Manifest {
    media_url: Url,
    media: MediaPlaylist,
    levels: usize,
    audio_tracks: usize,
    level: LevelInfo,
}

/// Why the follow loop stopped
enum Interrupt {
    Fault(EngineFault),
    Restart,
    /// Nobody listens to this engine any more
    Closed,
}

enum FetchError {
    Status(StatusCode),
    Transport(reqwest::Error),
}

impl FetchError {
    fn into_fault(self, kind: FaultKind, details: &str, timeout_details: &str) -> EngineFault {
        match self {
            FetchError::Status(status) => EngineFault::fatal(kind, details).with_http_status(status.as_u16()),
            FetchError::Transport(e) if e.is_timeout() => EngineFault::fatal(FaultKind::Network, timeout_details),
            FetchError::Transport(e) => EngineFault::fatal(FaultKind::Network, format!("{}: {}", details, e)),
        }
    }
}

struct ProbeTask {
    http: reqwest::Client,
    url: Url,
    camera_id: CameraId,
    binding: BindingId,
    events: EngineEvents,
    timeout: Duration,
    live_sync_segments: usize,
    control: Arc<ProbeControl>,
}

impl ProbeTask {
    fn emit(&self, event: EngineEvent) -> bool {
        self.events.emit(EngineSignal {
            camera_id: self.camera_id,
            binding: self.binding,
            event,
        })
    }

    async fn run(self) {
        loop {
            match self.follow().await {
                Interrupt::Closed => return,
                Interrupt::Restart => {
                    debug!(camera_id = %self.camera_id, binding = %self.binding, "Probe reloading");
                }
                Interrupt::Fault(fault) => {
                    debug!(camera_id = %self.camera_id, binding = %self.binding, fault = %fault, "Probe fault");
                    if !self.emit(EngineEvent::Fault(fault)) {
                        return;
                    }
                    // Parked until the session asks for a reload or drops us
                    self.control.restart.notified().await;
                    tokio::time::sleep(RELOAD_BACKOFF).await;
                }
            }
        }
    }

    async fn follow(&self) -> Interrupt {
        let Manifest {
            media_url,
            mut media,
            levels,
            audio_tracks,
            level,
        } = match self.load_manifest().await {
            Ok(loaded) => loaded,
            Err(fault) => return Interrupt::Fault(fault),
        };
        if media.ended {
            return Interrupt::Fault(stream_ended());
        }
        if !self.emit(EngineEvent::ManifestParsed { levels, audio_tracks }) {
            return Interrupt::Closed;
        }
        if level != LevelInfo::default() && !self.emit(EngineEvent::LevelSwitched(level)) {
            return Interrupt::Closed;
        }

        while !self.control.play_requested() {
            tokio::select! {
                _ = self.control.play.notified() => {}
                _ = self.control.restart.notified() => return Interrupt::Restart,
            }
        }

        let mut edge: f64 = media.segments.iter().map(|s| s.duration).sum();
        let lead: f64 = media
            .segments
            .iter()
            .rev()
            .take(self.live_sync_segments)
            .map(|s| s.duration)
            .sum();
        self.control.start_at((edge - lead).max(0.0));
        let mut next_sequence = media.next_sequence();
        let mut newest: Option<Segment> = media.segments.last().cloned();

        if !self.emit(EngineEvent::Playing) {
            return Interrupt::Closed;
        }

        let mut waiting = false;
        let mut stalled = false;
        let mut idle_polls = 0u32;

        loop {
            if let Some(segment) = newest.take() {
                let (bytes, load_time) = match self.fetch_segment(&segment.url).await {
                    Ok(loaded) => loaded,
                    Err(fault) => return Interrupt::Fault(fault),
                };
                idle_polls = 0;
                stalled = false;

                if waiting {
                    self.control.resume();
                    waiting = false;
                    if !self.emit(EngineEvent::Playing) {
                        return Interrupt::Closed;
                    }
                }

                let timing = SegmentTiming {
                    buffered_edge: edge,
                    position: self.control.position().min(edge),
                    paused: false,
                    bytes,
                    load_time,
                };
                if !self.emit(EngineEvent::SegmentLoaded(timing)) {
                    return Interrupt::Closed;
                }
            } else {
                idle_polls += 1;
                if idle_polls >= STALL_POLLS && !stalled {
                    stalled = true;
                    if !self.emit(EngineEvent::Stalled) {
                        return Interrupt::Closed;
                    }
                }
            }

            if !waiting && self.control.position() >= edge {
                self.control.freeze_at(edge);
                waiting = true;
                if !self.emit(EngineEvent::Waiting) {
                    return Interrupt::Closed;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(refresh_interval(&media)) => {}
                _ = self.control.restart.notified() => return Interrupt::Restart,
            }

            media = match self.fetch_media(&media_url).await {
                Ok(media) => media,
                Err(fault) => return Interrupt::Fault(fault),
            };
            if media.ended {
                return Interrupt::Fault(stream_ended());
            }

            if media.next_sequence() < next_sequence {
                return Interrupt::Fault(EngineFault::fatal(
                    FaultKind::LevelParsing,
                    format!(
                        "media sequence went backwards ({} < {})",
                        media.next_sequence(),
                        next_sequence
                    ),
                ));
            }

            let fresh: Vec<&Segment> = media
                .segments
                .iter()
                .filter(|s| s.sequence >= next_sequence)
                .collect();
            edge += fresh.iter().map(|s| s.duration).sum::<f64>();
            newest = fresh.last().map(|s| (*s).clone());
            next_sequence = media.next_sequence();
        }
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let response = self
            .http
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        Ok(response)
    }

    async fn fetch_playlist(
        &self,
        url: &Url,
        kind: FaultKind,
        details: &str,
        timeout_details: &str,
    ) -> Result<Playlist, EngineFault> {
        let fetched = match self.get(url).await {
            Ok(response) => response.text().await.map_err(FetchError::Transport),
            Err(e) => Err(e),
        };
        let text = fetched.map_err(|e| e.into_fault(kind, details, timeout_details))?;
        playlist::parse(&text, url).map_err(|e| EngineFault::fatal(FaultKind::LevelParsing, e.to_string()))
    }

    /// Fetch the entry playlist, following a master playlist to its first variant
    async fn load_manifest(&self) -> Result<Manifest, EngineFault> {
        let entry = self
            .fetch_playlist(&self.url, FaultKind::ManifestLoad, "manifestLoadError", "manifestLoadTimeOut")
            .await?;

        match entry {
            Playlist::Media(media) => Ok(Manifest {
                media_url: self.url.clone(),
                media,
                levels: 1,
                audio_tracks: 0,
                level: LevelInfo::default(),
            }),
            Playlist::Master {
                variants,
                audio_tracks,
            } => {
                let variant = variants
                    .first()
                    .ok_or_else(|| EngineFault::fatal(FaultKind::ManifestParsing, "no variants"))?;
                let media = self.fetch_media(&variant.url).await?;
                Ok(Manifest {
                    media_url: variant.url.clone(),
                    media,
                    levels: variants.len(),
                    audio_tracks,
                    level: variant.level(),
                })
            }
        }
    }

    async fn fetch_media(&self, url: &Url) -> Result<MediaPlaylist, EngineFault> {
        match self
            .fetch_playlist(url, FaultKind::LevelLoad, "levelLoadError", "levelLoadTimeOut")
            .await?
        {
            Playlist::Media(media) => Ok(media),
            Playlist::Master { .. } => Err(EngineFault::fatal(
                FaultKind::LevelParsing,
                "expected a media playlist",
            )),
        }
    }

    async fn fetch_segment(&self, url: &Url) -> Result<(u64, Duration), EngineFault> {
        let started = Instant::now();
        let fetched = match self.get(url).await {
            Ok(response) => response.bytes().await.map_err(FetchError::Transport),
            Err(e) => Err(e),
        };
        let body = fetched.map_err(|e| e.into_fault(FaultKind::Network, "fragLoadError", "fragLoadTimeOut"))?;
        Ok((body.len() as u64, started.elapsed()))
    }
}
