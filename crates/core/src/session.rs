//! Per-camera session state machine
//!
//! A [`Session`] drives one camera through
//! `Idle → Initializing → Connecting → Playing ⇄ Buffering → Retrying → Offline`,
//! with `Destroyed` reachable from anywhere. It owns at most one
//! [`PlaybackBinding`], its retry counter, its synchronizer and an arena of
//! timers. Nothing here is async: every input (engine signal, timer expiry,
//! command) is applied synchronously by the registry, and the session asks
//! for time only by arming deadlines.
//!
//! Timer deliveries are validated against the session epoch and a per-timer
//! sequence number, and engine signals against the current binding id, so a
//! late timer or a signal from a released engine has no effect.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::binding::PlaybackBinding;
use crate::camera::{CameraId, CameraRecord, Quality};
use crate::config::ViewProfile;
use crate::engine::{
    BindRequest, BindingId, EngineError, EngineEvent, EngineEvents, EngineFactory, EngineFault,
    EngineTuning, SegmentTiming, SinkId,
};
use crate::fault::{
    classify, FaultCategory, FaultClass, NonFatalAction, RecoveryAction, SessionFault,
};
use crate::policy::PlaybackPlan;
use crate::resolver::{StreamDescriptor, StreamResolver};
use crate::retry::{RetryCounter, RetryPolicy};
use crate::sync::{LiveEdgeSynchronizer, StreamStats, SyncDecision};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not started yet
    Idle,
    /// Resolving the descriptor, or about to bind
    Initializing,
    /// Engine bound and loading, nothing rendered yet
    Connecting,
    Playing,
    /// Rendering interrupted by a wait or stall; not an error
    Buffering,
    /// Binding released, waiting out the retry delay
    Retrying,
    /// Retries exhausted; only a manual retry brings it back
    Offline,
    /// Terminal
    Destroyed,
}

/// Status shown to the view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationStatus {
    Initializing,
    Connecting,
    Playing,
    Buffering,
    Error { message: String },
    Offline,
}

impl fmt::Display for PresentationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresentationStatus::Initializing => f.write_str("initializing"),
            PresentationStatus::Connecting => f.write_str("connecting"),
            PresentationStatus::Playing => f.write_str("playing"),
            PresentationStatus::Buffering => f.write_str("buffering"),
            PresentationStatus::Error { message } => write!(f, "error:{}", message),
            PresentationStatus::Offline => f.write_str("offline"),
        }
    }
}

impl Serialize for PresentationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Timers a session can arm; at most one of each kind is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Zero-delay hop from `Initializing` to binding
    Bind,
    ConnectPatience,
    BufferingPatience,
    SelfHealGrace,
    RetryDelay,
    PlayRetry,
}

/// Address of one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub camera_id: CameraId,
    pub epoch: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    seq: u64,
    kind: TimerKind,
    deadline: Instant,
}

/// Timer arena owned by a session
#[derive(Debug, Default)]
pub(crate) struct SessionTimers {
    next_seq: u64,
    armed: Vec<ArmedTimer>,
}

impl SessionTimers {
    /// Arm `kind`, replacing any pending timer of the same kind
    pub(crate) fn arm(&mut self, kind: TimerKind, deadline: Instant) -> u64 {
        self.cancel(kind);
        self.next_seq += 1;
        self.armed.push(ArmedTimer {
            seq: self.next_seq,
            kind,
            deadline,
        });
        self.next_seq
    }

    pub(crate) fn cancel(&mut self, kind: TimerKind) {
        self.armed.retain(|t| t.kind != kind);
    }

    pub(crate) fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.iter().any(|t| t.kind == kind)
    }

    pub(crate) fn clear(&mut self) {
        self.armed.clear();
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.armed.iter().map(|t| t.deadline).min()
    }

    /// Remove and return the earliest timer due at `now`
    pub(crate) fn take_due(&mut self, now: Instant) -> Option<TimerKind> {
        let index = self
            .armed
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .min_by_key(|(_, t)| (t.deadline, t.seq))
            .map(|(i, _)| i)?;
        Some(self.armed.remove(index).kind)
    }

    pub(crate) fn take(&mut self, seq: u64) -> Option<TimerKind> {
        let index = self.armed.iter().position(|t| t.seq == seq)?;
        Some(self.armed.remove(index).kind)
    }

    fn seqs(&self) -> impl Iterator<Item = (u64, TimerKind)> + '_ {
        self.armed.iter().map(|t| (t.seq, t.kind))
    }
}

/// Observable session changes, in the order they happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Created {
        camera_id: CameraId,
        session_id: String,
        quality: Quality,
    },
    StatusChanged {
        camera_id: CameraId,
        session_id: String,
        status: PresentationStatus,
    },
    LiveEdgeSeek {
        camera_id: CameraId,
        session_id: String,
        lag: f64,
        to: f64,
    },
    Destroyed {
        camera_id: CameraId,
        session_id: String,
    },
}

impl SessionEvent {
    pub fn camera_id(&self) -> CameraId {
        match self {
            SessionEvent::Created { camera_id, .. }
            | SessionEvent::StatusChanged { camera_id, .. }
            | SessionEvent::LiveEdgeSeek { camera_id, .. }
            | SessionEvent::Destroyed { camera_id, .. } => *camera_id,
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub camera_id: CameraId,
    pub camera_name: String,
    pub state: SessionState,
    pub status: Option<PresentationStatus>,
    pub retries: u32,
    pub quality: Quality,
    pub audio_enabled: bool,
    pub sink: SinkId,
    pub binding: Option<BindingId>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<SessionFault>,
    pub stats: StreamStats,
}

/// Shared resources a session borrows while handling one input
pub(crate) struct SessionEnv<'a> {
    pub factory: &'a mut dyn EngineFactory,
    pub resolver: &'a StreamResolver,
    pub events: &'a EngineEvents,
    pub next_binding: &'a mut u64,
    pub outbox: &'a mut Vec<SessionEvent>,
    pub now: Instant,
}

/// One camera's playback session
#[derive(Debug)]
pub struct Session {
    id: String,
    camera: CameraRecord,
    epoch: u64,
    state: SessionState,
    retries: RetryCounter,
    policy: RetryPolicy,
    last_fault: Option<SessionFault>,
    quality: Quality,
    audio_enabled: bool,
    sink: SinkId,
    binding: Option<PlaybackBinding>,
    descriptor: Option<StreamDescriptor>,
    sync: LiveEdgeSynchronizer,
    timers: SessionTimers,
    profile: ViewProfile,
    tuning: EngineTuning,
    healing: bool,
    play_retry_used: bool,
    created_at: DateTime<Utc>,
    last_status: Option<PresentationStatus>,
}

impl Session {
    pub(crate) fn new(
        camera: CameraRecord,
        epoch: u64,
        sink: SinkId,
        profile: &ViewProfile,
        plan: PlaybackPlan,
    ) -> Self {
        let id = format!("sess_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        Self {
            id,
            camera,
            epoch,
            state: SessionState::Idle,
            retries: RetryCounter::default(),
            policy: profile.retry_policy(),
            last_fault: None,
            quality: plan.quality,
            audio_enabled: plan.audio_enabled,
            sink,
            binding: None,
            descriptor: None,
            sync: LiveEdgeSynchronizer::new(profile.sync_config()),
            timers: SessionTimers::default(),
            profile: profile.clone(),
            tuning: plan.tuning,
            healing: false,
            play_retry_used: false,
            created_at: Utc::now(),
            last_status: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera.id
    }

    pub fn camera(&self) -> &CameraRecord {
        &self.camera
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries.get()
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn sink(&self) -> SinkId {
        self.sink
    }

    pub fn binding_id(&self) -> Option<BindingId> {
        self.binding.as_ref().map(|b| b.id())
    }

    pub fn descriptor(&self) -> Option<&StreamDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn last_fault(&self) -> Option<&SessionFault> {
        self.last_fault.as_ref()
    }

    pub fn stats(&self) -> StreamStats {
        self.sync.stats()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Keys of every pending timer
    pub fn timer_keys(&self) -> Vec<(TimerKey, TimerKind)> {
        self.timers
            .seqs()
            .map(|(seq, kind)| {
                (
                    TimerKey {
                        camera_id: self.camera.id,
                        epoch: self.epoch,
                        seq,
                    },
                    kind,
                )
            })
            .collect()
    }

    /// Status for the view; `None` once destroyed
    pub fn presentation(&self) -> Option<PresentationStatus> {
        let status = match self.state {
            SessionState::Idle | SessionState::Initializing => match &self.last_fault {
                Some(fault) if fault.is_resolution_failure() => PresentationStatus::Error {
                    message: fault.message.clone(),
                },
                _ => PresentationStatus::Initializing,
            },
            SessionState::Connecting => PresentationStatus::Connecting,
            SessionState::Playing => PresentationStatus::Playing,
            SessionState::Buffering => PresentationStatus::Buffering,
            SessionState::Retrying => {
                let reason = self
                    .last_fault
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or("Stream failed");
                PresentationStatus::Error {
                    message: format!(
                        "{} (retry {}/{})",
                        reason,
                        self.retries.get(),
                        self.policy.max_attempts()
                    ),
                }
            }
            SessionState::Offline => PresentationStatus::Offline,
            SessionState::Destroyed => return None,
        };
        Some(status)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            camera_id: self.camera.id,
            camera_name: self.camera.name.clone(),
            state: self.state,
            status: self.presentation(),
            retries: self.retries.get(),
            quality: self.quality,
            audio_enabled: self.audio_enabled,
            sink: self.sink,
            binding: self.binding_id(),
            url: self.descriptor.as_ref().map(|d| d.url.to_string()),
            created_at: self.created_at,
            last_error: self.last_fault.clone(),
            stats: self.sync.stats(),
        }
    }

    /// `Idle → Initializing`
    pub(crate) fn start(&mut self, env: &mut SessionEnv<'_>) {
        if self.state != SessionState::Idle {
            return;
        }
        info!(
            camera_id = %self.camera.id,
            session_id = %self.id,
            quality = %self.quality,
            sink = %self.sink,
            "Session created"
        );
        env.outbox.push(SessionEvent::Created {
            camera_id: self.camera.id,
            session_id: self.id.clone(),
            quality: self.quality,
        });
        self.initialize(env);
    }

    fn initialize(&mut self, env: &mut SessionEnv<'_>) {
        self.release_binding();
        self.timers.clear();
        self.healing = false;
        self.state = SessionState::Initializing;

        match env.resolver.resolve(&self.camera, self.quality) {
            Ok(descriptor) => {
                if self.last_fault.as_ref().is_some_and(|f| f.is_resolution_failure()) {
                    self.last_fault = None;
                }
                self.descriptor = Some(descriptor);
                self.timers.arm(TimerKind::Bind, env.now);
            }
            Err(e) => {
                warn!(
                    camera_id = %self.camera.id,
                    session_id = %self.id,
                    error = %e,
                    "No usable stream descriptor"
                );
                self.descriptor = None;
                self.last_fault = Some(SessionFault::resolution(e.to_string()));
            }
        }
        self.publish(env);
    }

    /// Build a fresh binding for the current descriptor and start loading
    fn connect(&mut self, env: &mut SessionEnv<'_>) {
        self.release_binding();

        let Some(descriptor) = self.descriptor.as_ref() else {
            return;
        };
        let url = descriptor.url.clone();

        *env.next_binding += 1;
        let binding_id = BindingId(*env.next_binding);
        let request = BindRequest {
            camera_id: self.camera.id,
            binding: binding_id,
            sink: self.sink,
            descriptor,
            tuning: &self.tuning,
            audio_enabled: self.audio_enabled,
            events: env.events.clone(),
        };

        match PlaybackBinding::bind(&mut *env.factory, request) {
            Ok(binding) => {
                self.binding = Some(binding);
                self.state = SessionState::Connecting;
                self.healing = false;
                self.play_retry_used = false;
                self.sync.reset();
                self.timers.arm(
                    TimerKind::ConnectPatience,
                    env.now + self.profile.connect_patience(),
                );
                info!(
                    camera_id = %self.camera.id,
                    session_id = %self.id,
                    binding = %binding_id,
                    %url,
                    attempt = self.retries.get(),
                    "Connecting"
                );
                self.publish(env);
            }
            Err(e) => {
                error!(
                    camera_id = %self.camera.id,
                    session_id = %self.id,
                    error = %e,
                    "Failed to bind playback engine"
                );
                self.escalate(env, SessionFault::hard(format!("Engine unavailable: {}", e)));
            }
        }
    }

    /// Apply one engine notification
    pub(crate) fn handle_engine(
        &mut self,
        env: &mut SessionEnv<'_>,
        binding: BindingId,
        event: EngineEvent,
    ) {
        if matches!(self.state, SessionState::Offline | SessionState::Destroyed) {
            return;
        }
        if self.binding_id() != Some(binding) {
            debug!(
                camera_id = %self.camera.id,
                binding = %binding,
                current = ?self.binding_id(),
                "Ignoring signal from stale binding"
            );
            return;
        }

        match event {
            EngineEvent::ManifestParsed {
                levels,
                audio_tracks,
            } => {
                debug!(camera_id = %self.camera.id, levels, audio_tracks, "Manifest parsed");
                let audio = self.audio_enabled;
                let _ = self.with_binding("set_audio_enabled", |b| b.set_audio_enabled(audio));
                let _ = self.with_binding("play", |b| b.play());
            }
            EngineEvent::Playing => self.on_playing(env),
            EngineEvent::Waiting => self.on_waiting(env, false),
            EngineEvent::Stalled => self.on_waiting(env, true),
            EngineEvent::Paused => {
                if self.state == SessionState::Playing {
                    debug!(camera_id = %self.camera.id, "Unexpected pause, resuming");
                    let _ = self.with_binding("play", |b| b.play());
                }
            }
            EngineEvent::PlayRejected { aborted, reason } => {
                if aborted && !self.play_retry_used {
                    debug!(camera_id = %self.camera.id, %reason, "Play request aborted, retrying");
                    self.play_retry_used = true;
                    self.timers.arm(
                        TimerKind::PlayRetry,
                        env.now + self.profile.play_retry_delay(),
                    );
                } else {
                    error!(camera_id = %self.camera.id, %reason, "Play request rejected");
                    self.escalate(env, SessionFault::hard(format!("Playback failed: {}", reason)));
                }
            }
            EngineEvent::SegmentLoaded(timing) => self.on_segment(env, timing),
            EngineEvent::LevelSwitched(level) => {
                debug!(
                    camera_id = %self.camera.id,
                    resolution = ?level.resolution,
                    bitrate = ?level.bitrate,
                    "Level switched"
                );
                self.sync.observe_level(level);
            }
            EngineEvent::Frames(counters) => self.sync.observe_frames(counters, env.now),
            EngineEvent::RateChanged(rate) => {
                if let Some(pinned) = self.sync.rate_correction(rate) {
                    debug!(camera_id = %self.camera.id, rate, "Restoring playback rate");
                    let _ = self.with_binding("set_playback_rate", |b| b.set_playback_rate(pinned));
                }
            }
            EngineEvent::Fault(fault) => self.handle_fault(env, fault),
        }
    }

    fn on_playing(&mut self, env: &mut SessionEnv<'_>) {
        let previous = self.state;
        if !matches!(
            previous,
            SessionState::Connecting | SessionState::Playing | SessionState::Buffering
        ) {
            return;
        }

        for kind in [
            TimerKind::ConnectPatience,
            TimerKind::BufferingPatience,
            TimerKind::SelfHealGrace,
            TimerKind::PlayRetry,
        ] {
            self.timers.cancel(kind);
        }
        self.retries.reset();
        self.last_fault = None;
        self.healing = false;
        self.state = SessionState::Playing;

        if previous == SessionState::Connecting {
            info!(camera_id = %self.camera.id, session_id = %self.id, "Playback started");
        } else if previous == SessionState::Buffering {
            debug!(camera_id = %self.camera.id, "Playback resumed");
        }
        self.publish(env);
    }

    fn on_waiting(&mut self, env: &mut SessionEnv<'_>, stalled: bool) {
        match self.state {
            SessionState::Playing => {
                self.state = SessionState::Buffering;
                self.timers.arm(
                    TimerKind::BufferingPatience,
                    env.now + self.profile.buffering_patience(),
                );
                debug!(camera_id = %self.camera.id, stalled, "Buffering");
                self.publish(env);
            }
            SessionState::Buffering => {}
            _ => return,
        }
        if stalled {
            let _ = self.with_binding("restart_loading", |b| b.restart_loading());
        }
    }

    fn on_segment(&mut self, env: &mut SessionEnv<'_>, timing: SegmentTiming) {
        if self.healing {
            debug!(camera_id = %self.camera.id, "Segment arrived, self-heal succeeded");
            self.healing = false;
            self.timers.cancel(TimerKind::SelfHealGrace);
        }

        let actively_playing = self.state == SessionState::Playing;
        if let SyncDecision::Seek { to, lag } = self.sync.observe(&timing, actively_playing) {
            if self.with_binding("seek", |b| b.seek(to)).is_ok() {
                self.sync.record_seek(to);
                debug!(camera_id = %self.camera.id, lag, to, "Jumped to live edge");
                env.outbox.push(SessionEvent::LiveEdgeSeek {
                    camera_id: self.camera.id,
                    session_id: self.id.clone(),
                    lag,
                    to,
                });
            }
        }
    }

    fn handle_fault(&mut self, env: &mut SessionEnv<'_>, fault: EngineFault) {
        match classify(&fault) {
            FaultClass::NonFatal(NonFatalAction::Ignore) => {
                debug!(camera_id = %self.camera.id, %fault, "Non-fatal engine fault");
            }
            FaultClass::NonFatal(NonFatalAction::RestartLoading) => {
                warn!(camera_id = %self.camera.id, %fault, "Non-fatal engine fault, restarting load");
                let _ = self.with_binding("restart_loading", |b| b.restart_loading());
            }
            FaultClass::NonFatal(NonFatalAction::SkipStall) => {
                if !matches!(self.state, SessionState::Playing | SessionState::Buffering) {
                    return;
                }
                if let Some(to) = self.sync.stall_skip() {
                    if self.with_binding("seek", |b| b.seek(to)).is_ok() {
                        self.sync.record_seek(to);
                        debug!(camera_id = %self.camera.id, to, "Skipped buffer stall");
                    }
                }
            }
            FaultClass::RecoverableFatal(action) => {
                warn!(
                    camera_id = %self.camera.id,
                    session_id = %self.id,
                    %fault,
                    ?action,
                    "Recoverable engine fault"
                );
                let healed = match action {
                    RecoveryAction::RestartLoading => {
                        self.with_binding("restart_loading", |b| b.restart_loading())
                    }
                    RecoveryAction::RecoverMedia => {
                        self.with_binding("recover_media", |b| b.recover_media())
                    }
                    RecoveryAction::Rebuild => Err(EngineError::Unsupported("rebuild")),
                };

                let reason = SessionFault::recoverable(fault.to_string());
                match healed {
                    Ok(()) => {
                        self.healing = true;
                        self.last_fault = Some(reason);
                        if matches!(self.state, SessionState::Playing | SessionState::Buffering)
                            && !self.timers.is_armed(TimerKind::SelfHealGrace)
                        {
                            self.timers.arm(
                                TimerKind::SelfHealGrace,
                                env.now + self.profile.self_heal_grace(),
                            );
                        }
                    }
                    Err(_) => self.escalate(env, reason),
                }
            }
            FaultClass::HardFatal => {
                error!(
                    camera_id = %self.camera.id,
                    session_id = %self.id,
                    %fault,
                    "Fatal engine fault"
                );
                self.escalate(env, SessionFault::hard(fault.to_string()));
            }
        }
    }

    /// Release the binding and enter `Retrying`, or `Offline` once the cap is hit
    fn escalate(&mut self, env: &mut SessionEnv<'_>, fault: SessionFault) {
        self.release_binding();
        self.timers.clear();
        self.healing = false;

        let attempt = self.retries.increment();
        self.state = SessionState::Retrying;
        warn!(
            camera_id = %self.camera.id,
            session_id = %self.id,
            attempt,
            max_attempts = self.policy.max_attempts(),
            error = %fault,
            "Session failed"
        );
        self.last_fault = Some(fault);
        self.publish(env);

        match self.policy.delay_for_attempt(attempt) {
            Some(delay) => {
                self.timers.arm(TimerKind::RetryDelay, env.now + delay);
            }
            None => self.go_offline(env),
        }
    }

    fn go_offline(&mut self, env: &mut SessionEnv<'_>) {
        self.release_binding();
        self.timers.clear();
        self.state = SessionState::Offline;
        self.last_fault = Some(SessionFault::new(
            FaultCategory::RetryExhausted,
            format!("Gave up after {} attempts", self.retries.get()),
        ));
        error!(
            camera_id = %self.camera.id,
            session_id = %self.id,
            attempts = self.retries.get(),
            "Retries exhausted, session offline"
        );
        self.publish(env);
    }

    /// `Retrying → Connecting` with a re-resolved descriptor
    fn rebind(&mut self, env: &mut SessionEnv<'_>) {
        match env.resolver.resolve(&self.camera, self.quality) {
            Ok(descriptor) => self.descriptor = Some(descriptor),
            Err(e) if self.descriptor.is_some() => {
                warn!(camera_id = %self.camera.id, error = %e, "Re-resolution failed, reusing descriptor");
            }
            Err(e) => {
                warn!(camera_id = %self.camera.id, error = %e, "No usable stream descriptor");
                self.state = SessionState::Initializing;
                self.last_fault = Some(SessionFault::resolution(e.to_string()));
                self.publish(env);
                return;
            }
        }
        self.connect(env);
    }

    fn on_timer(&mut self, env: &mut SessionEnv<'_>, kind: TimerKind) {
        match kind {
            TimerKind::Bind => {
                if self.state == SessionState::Initializing {
                    self.connect(env);
                }
            }
            TimerKind::ConnectPatience => {
                if self.state == SessionState::Connecting {
                    let message = match &self.last_fault {
                        Some(fault) => format!("Stream did not start: {}", fault.message),
                        None => "Stream did not start".to_string(),
                    };
                    self.escalate(env, SessionFault::recoverable(message));
                }
            }
            TimerKind::BufferingPatience => {
                if self.state == SessionState::Buffering {
                    self.escalate(env, SessionFault::recoverable("Buffering timed out"));
                }
            }
            TimerKind::SelfHealGrace => {
                if self.healing
                    && matches!(self.state, SessionState::Playing | SessionState::Buffering)
                {
                    let message = match &self.last_fault {
                        Some(fault) => format!("Recovery failed: {}", fault.message),
                        None => "Recovery failed".to_string(),
                    };
                    self.escalate(env, SessionFault::recoverable(message));
                }
            }
            TimerKind::RetryDelay => {
                if self.state == SessionState::Retrying {
                    self.rebind(env);
                }
            }
            TimerKind::PlayRetry => {
                if matches!(
                    self.state,
                    SessionState::Connecting | SessionState::Playing | SessionState::Buffering
                ) {
                    let _ = self.with_binding("play", |b| b.play());
                }
            }
        }
    }

    /// Fire the earliest timer due at `env.now`; false when none is due
    pub(crate) fn fire_next_due(&mut self, env: &mut SessionEnv<'_>) -> bool {
        match self.timers.take_due(env.now) {
            Some(kind) => {
                self.on_timer(env, kind);
                true
            }
            None => false,
        }
    }

    /// Deliver a specific timer; stale keys are rejected
    pub(crate) fn fire_timer(&mut self, env: &mut SessionEnv<'_>, key: TimerKey) -> bool {
        if key.camera_id != self.camera.id || key.epoch != self.epoch {
            return false;
        }
        match self.timers.take(key.seq) {
            Some(kind) => {
                self.on_timer(env, kind);
                true
            }
            None => false,
        }
    }

    /// Manual retry; only accepted while `Offline`
    pub(crate) fn manual_retry(&mut self, env: &mut SessionEnv<'_>) -> bool {
        if self.state != SessionState::Offline {
            debug!(camera_id = %self.camera.id, state = ?self.state, "Manual retry ignored");
            return false;
        }
        info!(camera_id = %self.camera.id, session_id = %self.id, "Manual retry");
        self.retries.reset();
        self.last_fault = None;
        self.initialize(env);
        true
    }

    fn awaiting_descriptor(&self) -> bool {
        self.state == SessionState::Initializing
            && self.binding.is_none()
            && !self.timers.is_armed(TimerKind::Bind)
    }

    /// Re-initialize a session that is idle, offline or stuck without a descriptor
    pub(crate) fn start_stream(&mut self, env: &mut SessionEnv<'_>) -> bool {
        if !matches!(self.state, SessionState::Idle | SessionState::Offline) && !self.awaiting_descriptor()
        {
            debug!(camera_id = %self.camera.id, state = ?self.state, "Start stream ignored");
            return false;
        }
        info!(camera_id = %self.camera.id, session_id = %self.id, "Starting stream");
        self.retries.reset();
        self.last_fault = None;
        self.initialize(env);
        true
    }

    /// Take a new camera snapshot; returns true when it unblocked the session
    pub(crate) fn update_camera(&mut self, env: &mut SessionEnv<'_>, camera: CameraRecord) -> bool {
        self.camera = camera;
        if self.awaiting_descriptor() && env.resolver.resolve(&self.camera, self.quality).is_ok() {
            info!(camera_id = %self.camera.id, "Stream descriptor became available");
            self.initialize(env);
            return true;
        }
        false
    }

    pub(crate) fn set_audio_enabled(&mut self, enabled: bool) {
        if self.audio_enabled == enabled {
            return;
        }
        self.audio_enabled = enabled;
        debug!(camera_id = %self.camera.id, enabled, "Audio changed");
        let _ = self.with_binding("set_audio_enabled", |b| b.set_audio_enabled(enabled));
    }

    /// Tear down: timers first, then the binding
    pub(crate) fn destroy(&mut self, env: &mut SessionEnv<'_>) {
        if self.state == SessionState::Destroyed {
            return;
        }
        self.timers.clear();
        self.release_binding();
        self.state = SessionState::Destroyed;
        self.last_status = None;
        info!(camera_id = %self.camera.id, session_id = %self.id, "Session destroyed");
        env.outbox.push(SessionEvent::Destroyed {
            camera_id: self.camera.id,
            session_id: self.id.clone(),
        });
    }

    fn release_binding(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.release();
        }
    }

    fn with_binding(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut PlaybackBinding) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let Some(binding) = self.binding.as_mut() else {
            return Err(EngineError::Failed("no binding".to_string()));
        };
        let result = f(binding);
        if let Err(e) = &result {
            if !matches!(e, EngineError::Unsupported(_)) {
                warn!(camera_id = %self.camera.id, op, error = %e, "Engine request failed");
            }
        }
        result
    }

    fn publish(&mut self, env: &mut SessionEnv<'_>) {
        let Some(status) = self.presentation() else {
            return;
        };
        if self.last_status.as_ref() == Some(&status) {
            return;
        }
        env.outbox.push(SessionEvent::StatusChanged {
            camera_id: self.camera.id,
            session_id: self.id.clone(),
            status: status.clone(),
        });
        self.last_status = Some(status);
    }
}
