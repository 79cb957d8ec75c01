//! Test doubles for the engine seam
//!
//! [`MockEngineFactory`] builds engines that do nothing but record the
//! requests they receive in a shared ledger. Clones share the ledger, so a
//! test keeps one clone and hands another to the registry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::camera::CameraId;
use crate::engine::{
    BindRequest, BindingId, EngineError, EngineEvent, EngineEvents, EngineFactory, EngineSignal,
    PlaybackEngine,
};

/// A request received by a mock engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Load { url: String, audio: bool },
    Play,
    RestartLoading,
    RecoverMedia,
    SetAudio(bool),
    Seek(f64),
    SetRate(f64),
    Destroy,
}

#[derive(Debug)]
struct EngineRecord {
    camera_id: CameraId,
    binding: BindingId,
    url: String,
    audio: bool,
    events: EngineEvents,
    calls: Vec<EngineCall>,
    live: bool,
}

#[derive(Debug)]
struct Ledger {
    engines: Vec<EngineRecord>,
    peak_live: HashMap<CameraId, usize>,
    self_heal: bool,
    fail_binds: usize,
    fail_loads: usize,
}

impl Ledger {
    fn live_count(&self, camera_id: CameraId) -> usize {
        self.engines
            .iter()
            .filter(|e| e.camera_id == camera_id && e.live)
            .count()
    }

    fn record(&mut self, index: usize, call: EngineCall) {
        if let Some(engine) = self.engines.get_mut(index) {
            engine.calls.push(call);
        }
    }
}

/// Engine factory that records every call
#[derive(Debug, Clone)]
pub struct MockEngineFactory {
    ledger: Arc<Mutex<Ledger>>,
}

impl Default for MockEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger {
                engines: Vec::new(),
                peak_live: HashMap::new(),
                self_heal: true,
                fail_binds: 0,
                fail_loads: 0,
            })),
        }
    }

    /// Whether engines expose restart-loading and media recovery
    pub fn set_self_heal_supported(&self, supported: bool) {
        self.ledger.lock().self_heal = supported;
    }

    /// Make the next `create` fail
    pub fn fail_next_bind(&self) {
        self.ledger.lock().fail_binds += 1;
    }

    /// Make the next engine's `load` fail
    pub fn fail_next_load(&self) {
        self.ledger.lock().fail_loads += 1;
    }

    /// Every binding created for a camera, oldest first
    pub fn bindings(&self, camera_id: CameraId) -> Vec<BindingId> {
        self.ledger
            .lock()
            .engines
            .iter()
            .filter(|e| e.camera_id == camera_id)
            .map(|e| e.binding)
            .collect()
    }

    pub fn last_binding(&self, camera_id: CameraId) -> Option<BindingId> {
        self.bindings(camera_id).last().copied()
    }

    /// Number of engines ever created for a camera
    pub fn created(&self, camera_id: CameraId) -> usize {
        self.bindings(camera_id).len()
    }

    /// Engines created and not yet destroyed for a camera
    pub fn live_count(&self, camera_id: CameraId) -> usize {
        self.ledger.lock().live_count(camera_id)
    }

    /// Most engines ever live at once for a camera
    pub fn peak_live(&self, camera_id: CameraId) -> usize {
        self.ledger
            .lock()
            .peak_live
            .get(&camera_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_live(&self) -> usize {
        self.ledger.lock().engines.iter().filter(|e| e.live).count()
    }

    pub fn calls(&self, binding: BindingId) -> Vec<EngineCall> {
        self.ledger
            .lock()
            .engines
            .iter()
            .find(|e| e.binding == binding)
            .map(|e| e.calls.clone())
            .unwrap_or_default()
    }

    /// Playlist URL the binding was created for
    pub fn url(&self, binding: BindingId) -> Option<String> {
        self.ledger
            .lock()
            .engines
            .iter()
            .find(|e| e.binding == binding)
            .map(|e| e.url.clone())
    }

    /// Audio flag the binding was created with
    pub fn created_with_audio(&self, binding: BindingId) -> Option<bool> {
        self.ledger
            .lock()
            .engines
            .iter()
            .find(|e| e.binding == binding)
            .map(|e| e.audio)
    }

    /// Build a signal from the camera's newest binding
    pub fn signal(&self, camera_id: CameraId, event: EngineEvent) -> Option<EngineSignal> {
        self.last_binding(camera_id).map(|binding| EngineSignal {
            camera_id,
            binding,
            event,
        })
    }

    /// Emit an event through the newest binding's signal channel
    pub fn emit(&self, camera_id: CameraId, event: EngineEvent) -> bool {
        let ledger = self.ledger.lock();
        let Some(engine) = ledger.engines.iter().rev().find(|e| e.camera_id == camera_id) else {
            return false;
        };
        engine.events.emit(EngineSignal {
            camera_id,
            binding: engine.binding,
            event,
        })
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&mut self, request: BindRequest<'_>) -> Result<Box<dyn PlaybackEngine>, EngineError> {
        let mut ledger = self.ledger.lock();
        if ledger.fail_binds > 0 {
            ledger.fail_binds -= 1;
            return Err(EngineError::Failed("mock bind failure".to_string()));
        }

        let fail_load = ledger.fail_loads > 0;
        if fail_load {
            ledger.fail_loads -= 1;
        }

        ledger.engines.push(EngineRecord {
            camera_id: request.camera_id,
            binding: request.binding,
            url: request.descriptor.url.to_string(),
            audio: request.audio_enabled,
            events: request.events.clone(),
            calls: Vec::new(),
            live: true,
        });
        let index = ledger.engines.len() - 1;

        let live = ledger.live_count(request.camera_id);
        let peak = ledger.peak_live.entry(request.camera_id).or_insert(0);
        *peak = (*peak).max(live);

        Ok(Box::new(MockEngine {
            ledger: Arc::clone(&self.ledger),
            index,
            fail_load,
        }))
    }
}

struct MockEngine {
    ledger: Arc<Mutex<Ledger>>,
    index: usize,
    fail_load: bool,
}

impl MockEngine {
    fn record(&self, call: EngineCall) {
        self.ledger.lock().record(self.index, call);
    }

    fn self_heal(&self, call: EngineCall, op: &'static str) -> Result<(), EngineError> {
        let mut ledger = self.ledger.lock();
        if !ledger.self_heal {
            return Err(EngineError::Unsupported(op));
        }
        ledger.record(self.index, call);
        Ok(())
    }
}

impl PlaybackEngine for MockEngine {
    fn load(&mut self) -> Result<(), EngineError> {
        let mut ledger = self.ledger.lock();
        let (url, audio) = match ledger.engines.get(self.index) {
            Some(e) => (e.url.clone(), e.audio),
            None => return Err(EngineError::Failed("unknown engine".to_string())),
        };
        ledger.record(self.index, EngineCall::Load { url, audio });
        if self.fail_load {
            return Err(EngineError::Failed("mock load failure".to_string()));
        }
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.record(EngineCall::Play);
        Ok(())
    }

    fn set_audio_enabled(&mut self, enabled: bool) -> Result<(), EngineError> {
        self.record(EngineCall::SetAudio(enabled));
        Ok(())
    }

    fn seek(&mut self, position: f64) -> Result<(), EngineError> {
        self.record(EngineCall::Seek(position));
        Ok(())
    }

    fn set_playback_rate(&mut self, rate: f64) -> Result<(), EngineError> {
        self.record(EngineCall::SetRate(rate));
        Ok(())
    }

    fn restart_loading(&mut self) -> Result<(), EngineError> {
        self.self_heal(EngineCall::RestartLoading, "restart_loading")
    }

    fn recover_media(&mut self) -> Result<(), EngineError> {
        self.self_heal(EngineCall::RecoverMedia, "recover_media")
    }

    fn destroy(&mut self) {
        let mut ledger = self.ledger.lock();
        ledger.record(self.index, EngineCall::Destroy);
        if let Some(engine) = ledger.engines.get_mut(self.index) {
            engine.live = false;
        }
    }
}
