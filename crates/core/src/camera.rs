//! Camera records as reported by the backend registry
//!
//! The core never mutates these; it only observes successive snapshots
//! delivered by `GET /api/cameras`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Backend identity of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub i64);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CameraId {
    fn from(id: i64) -> Self {
        CameraId(id)
    }
}

/// Stream quality tier
///
/// The origin exposes each tier as a distinct static playlist rather than
/// an adaptive ladder, so switching tiers means rebuilding the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// 2880x1620 @ ~6 Mbps
    High,
    /// Intermediate tier, served through the fallback path only
    Medium,
    /// 854x480 @ ~800 kbps, used for grids
    #[default]
    Low,
}

impl Quality {
    /// All tiers, best first
    pub const ALL: [Quality; 3] = [Quality::High, Quality::Medium, Quality::Low];

    /// Lowercase tier name as used in URLs and config files
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::High => "high",
            Quality::Medium => "medium",
            Quality::Low => "low",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Quality::High),
            "medium" => Ok(Quality::Medium),
            "low" => Ok(Quality::Low),
            other => Err(Error::InvalidQuality(other.to_string())),
        }
    }
}

/// Per-quality playlist paths published by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamUrls {
    /// High tier playlist (relative or absolute)
    #[serde(default)]
    pub high: Option<String>,

    /// Low tier playlist (relative or absolute)
    #[serde(default)]
    pub low: Option<String>,
}

impl StreamUrls {
    /// Playlist path for a tier, ignoring blank entries
    pub fn for_quality(&self, quality: Quality) -> Option<&str> {
        let path = match quality {
            Quality::High => self.high.as_deref(),
            Quality::Low => self.low.as_deref(),
            Quality::Medium => None,
        };
        path.map(str::trim).filter(|p| !p.is_empty())
    }
}

/// One camera as listed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    /// Camera identity
    pub id: CameraId,

    /// Display name
    pub name: String,

    /// Upstream RTSP source
    #[serde(default)]
    pub rtsp_url: String,

    /// Path of the stream on the media relay
    #[serde(default)]
    pub mediamtx_path: String,

    /// Reachability flag reported by the backend
    #[serde(default)]
    pub online: bool,

    /// Person recognition enabled
    #[serde(default)]
    pub enable_recognition: bool,

    /// License plate recognition enabled
    #[serde(default)]
    pub enable_anpr: bool,

    /// Creation time as sent by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    /// Per-quality playlist paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<StreamUrls>,

    /// WebRTC endpoint, unused by the session manager
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webrtc_url: Option<String>,
}

impl CameraRecord {
    /// Create a minimal reachable record without stream descriptors
    pub fn new(id: impl Into<CameraId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rtsp_url: String::new(),
            mediamtx_path: String::new(),
            online: true,
            enable_recognition: false,
            enable_anpr: false,
            created_at: None,
            hls_url: None,
            webrtc_url: None,
        }
    }

    /// Set the playlist path for a tier
    pub fn with_stream(mut self, quality: Quality, path: impl Into<String>) -> Self {
        let urls = self.hls_url.get_or_insert_with(StreamUrls::default);
        match quality {
            Quality::High => urls.high = Some(path.into()),
            Quality::Low => urls.low = Some(path.into()),
            Quality::Medium => {}
        }
        self
    }

    /// Set the reachability flag
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Playlist path published for a tier, if any
    pub fn stream_path(&self, quality: Quality) -> Option<&str> {
        self.hls_url.as_ref().and_then(|u| u.for_quality(quality))
    }
}
