//! Session registry
//!
//! Holds every live session of one view, keyed by camera. Each camera-list
//! refresh is diffed against the current set: new cameras get a session as
//! soon as the view has attached a sink for them, removed cameras have their
//! session destroyed. Reconciliation is idempotent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::camera::{CameraId, CameraRecord, Quality};
use crate::clock::Clock;
use crate::engine::{EngineEvents, EngineFactory, EngineSignal, SinkId};
use crate::policy::{QualityAudioPolicy, ViewContext};
use crate::resolver::StreamResolver;
use crate::session::{
    PresentationStatus, Session, SessionEnv, SessionEvent, SessionSnapshot, SessionState, TimerKey,
};

/// Outcome of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<CameraId>,
    pub destroyed: Vec<CameraId>,
    pub unchanged: Vec<CameraId>,
    /// Listed cameras still waiting for a sink
    pub pending: Vec<CameraId>,
}

impl ReconcileReport {
    /// True when nothing was created or destroyed
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.destroyed.is_empty()
    }
}

/// Resources shared by all sessions
struct Runtime {
    factory: Box<dyn EngineFactory>,
    resolver: StreamResolver,
    events: EngineEvents,
    clock: Arc<dyn Clock>,
    next_binding: u64,
    outbox: Vec<SessionEvent>,
}

impl Runtime {
    fn env(&mut self, now: Instant) -> SessionEnv<'_> {
        SessionEnv {
            factory: &mut *self.factory,
            resolver: &self.resolver,
            events: &self.events,
            next_binding: &mut self.next_binding,
            outbox: &mut self.outbox,
            now,
        }
    }
}

pub struct SessionRegistry {
    view: ViewContext,
    runtime: Runtime,
    sessions: BTreeMap<CameraId, Session>,
    cameras: BTreeMap<CameraId, CameraRecord>,
    sinks: BTreeMap<CameraId, SinkId>,
    quality_overrides: BTreeMap<CameraId, Quality>,
    next_epoch: u64,
}

impl SessionRegistry {
    /// Create a registry for one view
    ///
    /// Engines get a detached signal sink until [`Self::set_engine_events`]
    /// is called; signals can also be fed in by hand through
    /// [`Self::handle_engine_signal`].
    pub fn new(
        view: ViewContext,
        resolver: StreamResolver,
        factory: Box<dyn EngineFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            view,
            runtime: Runtime {
                factory,
                resolver,
                events: EngineEvents::detached(),
                clock,
                next_binding: 0,
                outbox: Vec::new(),
            },
            sessions: BTreeMap::new(),
            cameras: BTreeMap::new(),
            sinks: BTreeMap::new(),
            quality_overrides: BTreeMap::new(),
            next_epoch: 0,
        }
    }

    /// Route signals of engines bound from now on to `events`
    pub fn set_engine_events(&mut self, events: EngineEvents) {
        self.runtime.events = events;
    }

    pub fn view(&self) -> &ViewContext {
        &self.view
    }

    /// Diff the camera list against the live sessions
    pub fn reconcile(&mut self, cameras: &[CameraRecord]) -> ReconcileReport {
        let now = self.runtime.clock.now();
        let mut report = ReconcileReport::default();

        let mut incoming: BTreeMap<CameraId, CameraRecord> = BTreeMap::new();
        for camera in cameras {
            if incoming.insert(camera.id, camera.clone()).is_some() {
                warn!(camera_id = %camera.id, "Duplicate camera in list, keeping the last entry");
            }
        }

        let removed: Vec<CameraId> = self
            .cameras
            .keys()
            .chain(self.sessions.keys())
            .filter(|id| !incoming.contains_key(id))
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for id in removed {
            if let Some(mut session) = self.sessions.remove(&id) {
                session.destroy(&mut self.runtime.env(now));
                report.destroyed.push(id);
            }
            self.cameras.remove(&id);
            self.sinks.remove(&id);
            self.quality_overrides.remove(&id);
        }

        for (id, camera) in incoming {
            self.cameras.insert(id, camera.clone());
            match self.sessions.get_mut(&id) {
                Some(session) => {
                    session.update_camera(&mut self.runtime.env(now), camera);
                    report.unchanged.push(id);
                }
                None => match self.sinks.get(&id).copied() {
                    Some(sink) => {
                        self.create_session(camera, sink, now);
                        report.created.push(id);
                    }
                    None => report.pending.push(id),
                },
            }
        }

        self.rebalance_audio();

        if report.is_noop() {
            debug!(sessions = self.sessions.len(), "Reconcile: no changes");
        } else {
            info!(
                created = ?report.created,
                destroyed = ?report.destroyed,
                pending = report.pending.len(),
                sessions = self.sessions.len(),
                "Reconciled camera list"
            );
        }
        report
    }

    /// Give a camera a rendering surface; creates its session if it is listed
    ///
    /// Returns false when the camera already has a session on this sink.
    pub fn attach_sink(&mut self, camera_id: CameraId, sink: SinkId) -> bool {
        let now = self.runtime.clock.now();

        if let Some(session) = self.sessions.get_mut(&camera_id) {
            if session.sink() == sink {
                return false;
            }
            debug!(camera_id = %camera_id, %sink, "Sink replaced, rebuilding session");
            session.destroy(&mut self.runtime.env(now));
            self.sessions.remove(&camera_id);
        }

        self.sinks.insert(camera_id, sink);
        if let Some(camera) = self.cameras.get(&camera_id).cloned() {
            self.create_session(camera, sink, now);
            self.rebalance_audio();
        }
        true
    }

    /// Withdraw a camera's sink, destroying its session
    pub fn detach_sink(&mut self, camera_id: CameraId) -> bool {
        let now = self.runtime.clock.now();
        let had_sink = self.sinks.remove(&camera_id).is_some();
        if let Some(mut session) = self.sessions.remove(&camera_id) {
            session.destroy(&mut self.runtime.env(now));
            self.rebalance_audio();
        }
        had_sink
    }

    fn create_session(&mut self, camera: CameraRecord, sink: SinkId, now: Instant) {
        self.next_epoch += 1;
        let id = camera.id;
        let concurrent = self.sessions.len() + 1;
        let plan = QualityAudioPolicy::plan(
            &self.view,
            self.quality_overrides.get(&id).copied(),
            concurrent,
        );
        let mut session = Session::new(camera, self.next_epoch, sink, &self.view.profile, plan);
        session.start(&mut self.runtime.env(now));
        self.sessions.insert(id, session);
    }

    fn rebalance_audio(&mut self) {
        let allowed = QualityAudioPolicy::audio_allowed(&self.view, self.sessions.len());
        if allowed {
            return;
        }
        for session in self.sessions.values_mut() {
            session.set_audio_enabled(false);
        }
    }

    /// Re-initialize an idle, offline or descriptor-less session
    pub fn start_stream(&mut self, camera_id: CameraId) -> bool {
        let now = self.runtime.clock.now();
        match self.sessions.get_mut(&camera_id) {
            Some(session) => session.start_stream(&mut self.runtime.env(now)),
            None => false,
        }
    }

    /// Manual retry; a no-op unless the session is offline
    pub fn retry(&mut self, camera_id: CameraId) -> bool {
        let now = self.runtime.clock.now();
        match self.sessions.get_mut(&camera_id) {
            Some(session) => session.manual_retry(&mut self.runtime.env(now)),
            None => false,
        }
    }

    /// Switch tier by rebuilding the session
    pub fn change_quality(&mut self, camera_id: CameraId, quality: Quality) -> bool {
        let now = self.runtime.clock.now();
        let Some(session) = self.sessions.get(&camera_id) else {
            return false;
        };
        if session.quality() == quality {
            return false;
        }

        let sink = session.sink();
        let camera = session.camera().clone();
        info!(camera_id = %camera_id, from = %session.quality(), to = %quality, "Changing quality");

        if let Some(mut old) = self.sessions.remove(&camera_id) {
            old.destroy(&mut self.runtime.env(now));
        }
        self.quality_overrides.insert(camera_id, quality);
        self.create_session(camera, sink, now);
        true
    }

    /// Flip audio where the policy allows it
    pub fn toggle_audio(&mut self, camera_id: CameraId) -> bool {
        if !QualityAudioPolicy::audio_allowed(&self.view, self.sessions.len()) {
            debug!(camera_id = %camera_id, "Audio not allowed in this view");
            return false;
        }
        match self.sessions.get_mut(&camera_id) {
            Some(session) => {
                let enabled = !session.audio_enabled();
                session.set_audio_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Route an engine signal to its session
    pub fn handle_engine_signal(&mut self, signal: EngineSignal) {
        let now = self.runtime.clock.now();
        match self.sessions.get_mut(&signal.camera_id) {
            Some(session) => {
                session.handle_engine(&mut self.runtime.env(now), signal.binding, signal.event)
            }
            None => debug!(camera_id = %signal.camera_id, "Signal for unknown camera ignored"),
        }
    }

    /// Fire every timer due now, earliest first; returns how many fired
    pub fn advance(&mut self) -> usize {
        let now = self.runtime.clock.now();
        let mut fired = 0;
        loop {
            let due = self
                .sessions
                .iter()
                .filter_map(|(id, s)| s.next_deadline().map(|d| (d, *id)))
                .filter(|(d, _)| *d <= now)
                .min();
            let Some((_, id)) = due else {
                break;
            };
            let Some(session) = self.sessions.get_mut(&id) else {
                break;
            };
            if !session.fire_next_due(&mut self.runtime.env(now)) {
                break;
            }
            fired += 1;
        }
        fired
    }

    /// Deliver one timer by key; stale keys are ignored
    pub fn fire_timer(&mut self, key: TimerKey) -> bool {
        let now = self.runtime.clock.now();
        match self.sessions.get_mut(&key.camera_id) {
            Some(session) => session.fire_timer(&mut self.runtime.env(now), key),
            None => false,
        }
    }

    /// Earliest pending deadline over all sessions
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions.values().filter_map(|s| s.next_deadline()).min()
    }

    /// Tear everything down (view unmount)
    pub fn destroy_all(&mut self) {
        let now = self.runtime.clock.now();
        let count = self.sessions.len();
        for (_, mut session) in std::mem::take(&mut self.sessions) {
            session.destroy(&mut self.runtime.env(now));
        }
        self.sinks.clear();
        self.quality_overrides.clear();
        if count > 0 {
            info!(sessions = count, "Destroyed all sessions");
        }
    }

    pub fn session(&self, camera_id: CameraId) -> Option<&Session> {
        self.sessions.get(&camera_id)
    }

    pub fn state(&self, camera_id: CameraId) -> Option<SessionState> {
        self.sessions.get(&camera_id).map(|s| s.state())
    }

    pub fn status(&self, camera_id: CameraId) -> Option<PresentationStatus> {
        self.sessions.get(&camera_id).and_then(|s| s.presentation())
    }

    pub fn snapshot(&self, camera_id: CameraId) -> Option<SessionSnapshot> {
        self.sessions.get(&camera_id).map(|s| s.snapshot())
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions.values().map(|s| s.snapshot()).collect()
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.sessions.keys().copied().collect()
    }

    /// Listed cameras without a sink
    pub fn pending(&self) -> Vec<CameraId> {
        self.cameras
            .keys()
            .filter(|id| !self.sessions.contains_key(id))
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Take the events produced since the last call
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.runtime.outbox)
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::MockEngineFactory;

    fn registry(factory: &MockEngineFactory) -> SessionRegistry {
        SessionRegistry::new(
            ViewContext::grid(),
            StreamResolver::from_base("http://origin.local").unwrap(),
            Box::new(factory.clone()),
            Arc::new(ManualClock::new()),
        )
    }

    #[test]
    fn test_camera_without_sink_is_pending() {
        let factory = MockEngineFactory::new();
        let mut registry = registry(&factory);

        let report = registry.reconcile(&[CameraRecord::new(1, "Gate")]);
        assert_eq!(report.pending, vec![CameraId(1)]);
        assert!(registry.is_empty());

        assert!(registry.attach_sink(CameraId(1), SinkId(10)));
        assert_eq!(registry.state(CameraId(1)), Some(SessionState::Initializing));
        assert!(registry.pending().is_empty());
    }

    #[test]
    fn test_attach_same_sink_twice_is_noop() {
        let factory = MockEngineFactory::new();
        let mut registry = registry(&factory);
        registry.attach_sink(CameraId(1), SinkId(10));
        registry.reconcile(&[CameraRecord::new(1, "Gate")]);
        registry.advance();

        assert!(!registry.attach_sink(CameraId(1), SinkId(10)));
        assert_eq!(factory.created(CameraId(1)), 1);
    }

    #[test]
    fn test_detach_sink_destroys_session() {
        let factory = MockEngineFactory::new();
        let mut registry = registry(&factory);
        registry.attach_sink(CameraId(1), SinkId(10));
        registry.reconcile(&[CameraRecord::new(1, "Gate")]);
        registry.advance();
        assert_eq!(factory.live_count(CameraId(1)), 1);

        assert!(registry.detach_sink(CameraId(1)));
        assert!(registry.is_empty());
        assert_eq!(factory.live_count(CameraId(1)), 0);
        assert_eq!(registry.pending(), vec![CameraId(1)]);
    }

    #[test]
    fn test_drop_releases_engines() {
        let factory = MockEngineFactory::new();
        {
            let mut registry = registry(&factory);
            registry.attach_sink(CameraId(1), SinkId(1));
            registry.attach_sink(CameraId(2), SinkId(2));
            registry.reconcile(&[CameraRecord::new(1, "A"), CameraRecord::new(2, "B")]);
            registry.advance();
            assert_eq!(factory.total_live(), 2);
        }
        assert_eq!(factory.total_live(), 0);
    }

    #[test]
    fn test_destroy_all() {
        let factory = MockEngineFactory::new();
        let mut registry = registry(&factory);
        registry.attach_sink(CameraId(1), SinkId(1));
        registry.reconcile(&[CameraRecord::new(1, "A")]);
        registry.advance();
        registry.drain_events();

        registry.destroy_all();
        assert!(registry.is_empty());
        assert!(registry.next_deadline().is_none());
        assert!(matches!(
            registry.drain_events().as_slice(),
            [SessionEvent::Destroyed { .. }]
        ));
    }
}
