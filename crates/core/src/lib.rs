//! camwall core
//!
//! Multi-camera live session manager. For a changing set of cameras this
//! crate opens, supervises, resynchronizes, retries and tears down one
//! live segmented-media playback session per camera, each bound to a single
//! rendering surface (a sink). Media itself is handled by an external
//! engine behind the [`PlaybackEngine`] trait; this crate owns only
//! session-level policy.
//!
//! - [`StreamResolver`] - camera record + quality tier to playlist URL
//! - [`PlaybackBinding`] - one engine instance bound to one sink
//! - [`LiveEdgeSynchronizer`] - lag measurement and corrective seeks
//! - [`Session`] - per-camera state machine with bounded retries
//! - [`SessionRegistry`] - diffing of camera lists into sessions
//! - [`QualityAudioPolicy`] - tier and audio selection per view
//! - [`SessionSupervisor`] - async driver owning a registry on one task
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use camwall_core::{
//!     CameraRecord, EngineFactory, SessionRegistry, SessionSupervisor, SinkId, StreamResolver,
//!     TokioClock, ViewContext,
//! };
//!
//! # async fn run(engines: Box<dyn EngineFactory>) -> camwall_core::Result<()> {
//! let registry = SessionRegistry::new(
//!     ViewContext::grid(),
//!     StreamResolver::from_base("http://localhost:8000")?,
//!     engines,
//!     Arc::new(TokioClock),
//! );
//! let (supervisor, handle) = SessionSupervisor::new(registry);
//! supervisor.spawn();
//!
//! let camera = CameraRecord::new(1, "Gate");
//! handle.attach_sink(camera.id, SinkId(1)).await?;
//! handle.reconcile(vec![camera]).await?;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod camera;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod fault;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod supervisor;
pub mod sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use binding::PlaybackBinding;
pub use camera::{CameraId, CameraRecord, Quality, StreamUrls};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{BackendConfig, ViewProfile, ViewProfiles, WallConfig};
pub use engine::{
    BindRequest, BindingId, EngineError, EngineEvent, EngineEvents, EngineFactory, EngineFault,
    EngineSignal, EngineTuning, FaultKind, FrameCounters, LevelInfo, PlaybackEngine, Resolution,
    SegmentTiming, SinkId,
};
pub use error::{Error, Result};
pub use fault::{classify, FaultCategory, FaultClass, SessionFault};
pub use policy::{PlaybackPlan, QualityAudioPolicy, ViewContext, ViewKind};
pub use registry::{ReconcileReport, SessionRegistry};
pub use resolver::{ResolveError, StreamDescriptor, StreamResolver};
pub use retry::RetryPolicy;
pub use session::{
    PresentationStatus, Session, SessionEvent, SessionSnapshot, SessionState, TimerKey, TimerKind,
};
pub use supervisor::{ControlAction, SessionSupervisor, SupervisorHandle};
pub use sync::{LiveEdgeSynchronizer, StreamStats, SyncConfig, SyncDecision};
