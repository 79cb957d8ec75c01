//! Quality tier and audio selection per view context

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::camera::Quality;
use crate::config::{ViewProfile, WallConfig};
use crate::engine::EngineTuning;

/// Kind of view hosting the sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    /// Many small tiles
    Grid,
    /// One focused camera page
    Detail,
    /// Focused overlay on top of a grid
    Modal,
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViewKind::Grid => "grid",
            ViewKind::Detail => "detail",
            ViewKind::Modal => "modal",
        })
    }
}

/// Caller-provided context for a set of sessions
#[derive(Debug, Clone, PartialEq)]
pub struct ViewContext {
    pub kind: ViewKind,
    /// Default tier for sessions in this view
    pub quality: Quality,
    /// Whether the view wants sound when it is allowed
    pub audio_required: bool,
    /// Timing parameters
    pub profile: ViewProfile,
}

impl ViewContext {
    pub fn grid() -> Self {
        Self::new(ViewKind::Grid, ViewProfile::grid())
    }

    pub fn detail(quality: Quality) -> Self {
        Self::new(ViewKind::Detail, ViewProfile::detail()).with_quality(quality)
    }

    pub fn modal(quality: Quality) -> Self {
        Self::new(ViewKind::Modal, ViewProfile::modal()).with_quality(quality)
    }

    /// Build the context for a view kind from loaded configuration
    pub fn from_config(kind: ViewKind, config: &WallConfig) -> Self {
        Self::new(kind, config.views.profile(kind).clone())
    }

    fn new(kind: ViewKind, profile: ViewProfile) -> Self {
        Self {
            kind,
            quality: profile.quality,
            audio_required: kind != ViewKind::Grid,
            profile,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }
}

/// What a new session should be built with
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackPlan {
    pub quality: Quality,
    pub audio_enabled: bool,
    pub tuning: EngineTuning,
}

/// Stateless tier and audio rules
pub struct QualityAudioPolicy;

impl QualityAudioPolicy {
    /// Plan a session for `view` given how many sessions share it
    pub fn plan(view: &ViewContext, quality_override: Option<Quality>, concurrent: usize) -> PlaybackPlan {
        let quality = quality_override.unwrap_or(view.quality);
        PlaybackPlan {
            quality,
            audio_enabled: view.audio_required && Self::audio_allowed(view, concurrent),
            tuning: EngineTuning::for_view(view.kind, quality),
        }
    }

    /// Audio is only ever on for a single focused session
    pub fn audio_allowed(view: &ViewContext, concurrent: usize) -> bool {
        view.kind != ViewKind::Grid && concurrent <= 1
    }
}
