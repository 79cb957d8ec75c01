//! Stream descriptor resolution
//!
//! Maps a camera record and a quality tier to a concrete playlist URL.
//! Pure: no state beyond the base URL and the fallback path template.

use url::Url;

use crate::camera::{CameraId, CameraRecord, Quality};

/// Fallback playlist path used when the backend publishes no descriptor
pub const DEFAULT_FALLBACK_TEMPLATE: &str = "/hls/cam/{id}/{quality}/index.m3u8";

/// A resolved, playable stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Camera the stream belongs to
    pub camera_id: CameraId,

    /// Tier the URL was resolved for
    pub quality: Quality,

    /// Absolute playlist URL
    pub url: Url,
}

/// Why a descriptor could not be produced
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("camera {camera_id} has no {quality} stream descriptor")]
    NoDescriptor { camera_id: CameraId, quality: Quality },

    #[error("invalid stream URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported stream URL scheme {scheme:?}")]
    UnsupportedScheme { scheme: String },
}

/// Resolves playlist URLs against the backend origin
#[derive(Debug, Clone)]
pub struct StreamResolver {
    base_url: Url,
    fallback_template: Option<String>,
}

impl StreamResolver {
    /// Create a resolver for the given origin, with the default fallback path
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            fallback_template: Some(DEFAULT_FALLBACK_TEMPLATE.to_string()),
        }
    }

    /// Parse the origin and create a resolver
    pub fn from_base(base_url: &str) -> Result<Self, ResolveError> {
        let url = Url::parse(base_url).map_err(|e| ResolveError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(url))
    }

    /// Replace the fallback template (`None` disables the fallback)
    ///
    /// `{id}` and `{quality}` are substituted.
    pub fn with_fallback_template(mut self, template: Option<String>) -> Self {
        self.fallback_template = template;
        self
    }

    /// Origin the relative paths are joined to
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve the playlist URL for a camera and tier
    pub fn resolve(
        &self,
        camera: &CameraRecord,
        quality: Quality,
    ) -> Result<StreamDescriptor, ResolveError> {
        let path = match camera.stream_path(quality) {
            Some(path) => path.to_string(),
            None => self
                .fallback_template
                .as_ref()
                .map(|t| {
                    t.replace("{id}", &camera.id.to_string())
                        .replace("{quality}", quality.as_str())
                })
                .ok_or(ResolveError::NoDescriptor {
                    camera_id: camera.id,
                    quality,
                })?,
        };

        let url = if path.contains("://") {
            Url::parse(&path)
        } else {
            self.base_url.join(&path)
        }
        .map_err(|e| ResolveError::InvalidUrl {
            url: path.clone(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(StreamDescriptor {
                camera_id: camera.id,
                quality,
                url,
            }),
            other => Err(ResolveError::UnsupportedScheme {
                scheme: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> StreamResolver {
        StreamResolver::from_base("http://backend.local:8000").unwrap()
    }

    #[test]
    fn test_relative_path_joins_origin() {
        let camera = CameraRecord::new(3, "Dock").with_stream(Quality::Low, "/hls/cam/3/low/index.m3u8");
        let descriptor = resolver().resolve(&camera, Quality::Low).unwrap();
        assert_eq!(
            descriptor.url.as_str(),
            "http://backend.local:8000/hls/cam/3/low/index.m3u8"
        );
        assert_eq!(descriptor.quality, Quality::Low);
    }

    #[test]
    fn test_absolute_url_used_as_is() {
        let camera = CameraRecord::new(3, "Dock")
            .with_stream(Quality::High, "https://cdn.example.com/cam3/high.m3u8");
        let descriptor = resolver().resolve(&camera, Quality::High).unwrap();
        assert_eq!(descriptor.url.host_str(), Some("cdn.example.com"));
    }

    #[test]
    fn test_fallback_template() {
        let camera = CameraRecord::new(9, "Yard");
        let descriptor = resolver().resolve(&camera, Quality::Medium).unwrap();
        assert_eq!(descriptor.url.path(), "/hls/cam/9/medium/index.m3u8");
    }

    #[test]
    fn test_no_descriptor_without_fallback() {
        let camera = CameraRecord::new(9, "Yard");
        let err = resolver()
            .with_fallback_template(None)
            .resolve(&camera, Quality::Low)
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::NoDescriptor {
                camera_id: CameraId(9),
                quality: Quality::Low
            }
        );
    }

    #[test]
    fn test_rtsp_scheme_rejected() {
        let camera = CameraRecord::new(2, "Cam").with_stream(Quality::Low, "rtsp://10.0.0.2/live");
        assert!(matches!(
            resolver().resolve(&camera, Quality::Low),
            Err(ResolveError::UnsupportedScheme { .. })
        ));
    }
}
