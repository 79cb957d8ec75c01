//! Ownership wrapper around one engine instance

use tracing::{debug, warn};

use crate::camera::CameraId;
use crate::engine::{BindRequest, BindingId, EngineError, EngineFactory, PlaybackEngine, SinkId};

/// One live engine bound to one sink
///
/// The engine is destroyed exactly once: explicitly through
/// [`PlaybackBinding::release`] or implicitly on drop.
pub struct PlaybackBinding {
    id: BindingId,
    camera_id: CameraId,
    sink: SinkId,
    engine: Box<dyn PlaybackEngine>,
    released: bool,
}

impl std::fmt::Debug for PlaybackBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackBinding")
            .field("id", &self.id)
            .field("camera_id", &self.camera_id)
            .field("sink", &self.sink)
            .field("released", &self.released)
            .finish()
    }
}

impl PlaybackBinding {
    /// Create an engine through the factory and tell it to load
    ///
    /// A load failure destroys the fresh engine before returning.
    pub fn bind(
        factory: &mut dyn EngineFactory,
        request: BindRequest<'_>,
    ) -> Result<Self, EngineError> {
        let id = request.binding;
        let camera_id = request.camera_id;
        let sink = request.sink;
        let url = request.descriptor.url.clone();

        let engine = factory.create(request)?;
        let mut binding = Self {
            id,
            camera_id,
            sink,
            engine,
            released: false,
        };

        if let Err(e) = binding.engine.load() {
            binding.release();
            return Err(e);
        }

        debug!(camera_id = %camera_id, binding = %id, %url, "Engine bound and loading");
        Ok(binding)
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn sink(&self) -> SinkId {
        self.sink
    }

    pub fn play(&mut self) -> Result<(), EngineError> {
        self.engine.play()
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) -> Result<(), EngineError> {
        self.engine.set_audio_enabled(enabled)
    }

    pub fn seek(&mut self, position: f64) -> Result<(), EngineError> {
        self.engine.seek(position)
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<(), EngineError> {
        self.engine.set_playback_rate(rate)
    }

    pub fn restart_loading(&mut self) -> Result<(), EngineError> {
        self.engine.restart_loading()
    }

    pub fn recover_media(&mut self) -> Result<(), EngineError> {
        self.engine.recover_media()
    }

    /// Destroy the engine and detach it from the sink
    pub fn release(mut self) {
        self.destroy_engine();
    }

    fn destroy_engine(&mut self) {
        if !self.released {
            self.released = true;
            self.engine.destroy();
            debug!(camera_id = %self.camera_id, binding = %self.id, "Engine destroyed");
        }
    }
}

impl Drop for PlaybackBinding {
    fn drop(&mut self) {
        if !self.released {
            warn!(camera_id = %self.camera_id, binding = %self.id, "Binding dropped without release");
            self.destroy_engine();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Quality;
    use crate::engine::{EngineEvents, EngineTuning};
    use crate::policy::ViewKind;
    use crate::resolver::StreamDescriptor;
    use crate::testing::{EngineCall, MockEngineFactory};

    fn descriptor() -> StreamDescriptor {
        StreamDescriptor {
            camera_id: CameraId(1),
            quality: Quality::Low,
            url: url::Url::parse("http://origin/hls/cam/1/low/index.m3u8").unwrap(),
        }
    }

    fn request<'a>(d: &'a StreamDescriptor, t: &'a EngineTuning, binding: u64) -> BindRequest<'a> {
        BindRequest {
            camera_id: CameraId(1),
            binding: BindingId(binding),
            sink: SinkId(1),
            descriptor: d,
            tuning: t,
            audio_enabled: false,
            events: EngineEvents::detached(),
        }
    }

    #[test]
    fn test_bind_loads_and_release_destroys() {
        let mut factory = MockEngineFactory::new();
        let d = descriptor();
        let t = EngineTuning::for_view(ViewKind::Grid, Quality::Low);

        let binding = PlaybackBinding::bind(&mut factory, request(&d, &t, 1)).unwrap();
        assert_eq!(factory.live_count(CameraId(1)), 1);

        binding.release();
        assert_eq!(factory.live_count(CameraId(1)), 0);
        let calls = factory.calls(BindingId(1));
        assert!(matches!(calls.first(), Some(EngineCall::Load { .. })));
        assert_eq!(calls.last(), Some(&EngineCall::Destroy));
    }

    #[test]
    fn test_drop_destroys_once() {
        let mut factory = MockEngineFactory::new();
        let d = descriptor();
        let t = EngineTuning::for_view(ViewKind::Grid, Quality::Low);

        {
            let _binding = PlaybackBinding::bind(&mut factory, request(&d, &t, 2)).unwrap();
        }

        let destroys = factory
            .calls(BindingId(2))
            .into_iter()
            .filter(|c| *c == EngineCall::Destroy)
            .count();
        assert_eq!(destroys, 1);
    }

    #[test]
    fn test_failed_load_releases_engine() {
        let mut factory = MockEngineFactory::new();
        factory.fail_next_load();
        let d = descriptor();
        let t = EngineTuning::for_view(ViewKind::Grid, Quality::Low);

        let result = PlaybackBinding::bind(&mut factory, request(&d, &t, 3));
        assert!(result.is_err());
        assert_eq!(factory.live_count(CameraId(1)), 0);
    }
}
