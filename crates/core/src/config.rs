//! Configuration for the live wall
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file) yields a working configuration:
//!
//! ```toml
//! [backend]
//! base_url = "http://nvr.local:8000"
//! poll_interval_secs = 30
//!
//! [views.grid]
//! lag_threshold_secs = 2.0
//!
//! [views.detail]
//! quality = "high"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::camera::Quality;
use crate::policy::ViewKind;
use crate::retry::RetryPolicy;
use crate::sync::SyncConfig;
use crate::{Error, Result};

/// Backend registry connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Origin of the REST API and of relative playlist paths
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Prefix of the REST routes
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Camera list polling interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Bearer token sent with every request
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Playlist path used when a camera publishes none; `{id}` and
    /// `{quality}` are substituted
    #[serde(default)]
    pub fallback_path_template: Option<String>,

    /// Delay before refreshing after a start-stream request
    #[serde(default = "default_start_settle_ms")]
    pub start_settle_ms: u64,

    /// Delay before refreshing after a restart-stream request
    #[serde(default = "default_restart_settle_ms")]
    pub restart_settle_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_start_settle_ms() -> u64 {
    3000
}

fn default_restart_settle_ms() -> u64 {
    5000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_prefix: default_api_prefix(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            auth_token: None,
            fallback_path_template: None,
            start_settle_ms: default_start_settle_ms(),
            restart_settle_ms: default_restart_settle_ms(),
        }
    }
}

impl BackendConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn start_settle(&self) -> Duration {
        Duration::from_millis(self.start_settle_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    /// Set base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set bearer token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Session timing parameters for one view kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewProfile {
    /// Default quality tier
    pub quality: Quality,
    pub lag_threshold_secs: f64,
    pub seek_margin_secs: f64,
    pub buffering_patience_ms: u64,
    pub connect_patience_ms: u64,
    pub self_heal_grace_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
    pub play_retry_delay_ms: u64,
}

impl ViewProfile {
    pub fn grid() -> Self {
        Self {
            quality: Quality::Low,
            lag_threshold_secs: 2.0,
            seek_margin_secs: 0.5,
            buffering_patience_ms: 20_000,
            connect_patience_ms: 20_000,
            self_heal_grace_ms: 3_000,
            retry_delay_ms: 3_000,
            max_retries: 30,
            play_retry_delay_ms: 1_000,
        }
    }

    pub fn detail() -> Self {
        Self {
            lag_threshold_secs: 6.0,
            seek_margin_secs: 1.0,
            ..Self::grid()
        }
    }

    pub fn modal() -> Self {
        Self::detail()
    }

    pub fn buffering_patience(&self) -> Duration {
        Duration::from_millis(self.buffering_patience_ms)
    }

    pub fn connect_patience(&self) -> Duration {
        Duration::from_millis(self.connect_patience_ms)
    }

    pub fn self_heal_grace(&self) -> Duration {
        Duration::from_millis(self.self_heal_grace_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn play_retry_delay(&self) -> Duration {
        Duration::from_millis(self.play_retry_delay_ms)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            lag_threshold: self.lag_threshold_secs,
            seek_margin: self.seek_margin_secs,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, self.retry_delay())
    }

    /// Check internal consistency
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.lag_threshold_secs <= 0.0 {
            return Err(Error::config(format!(
                "views.{}: lag_threshold_secs must be positive",
                name
            )));
        }
        if self.seek_margin_secs < 0.0 || self.seek_margin_secs >= self.lag_threshold_secs {
            return Err(Error::config(format!(
                "views.{}: seek_margin_secs ({}) must be in [0, lag_threshold_secs ({}))",
                name, self.seek_margin_secs, self.lag_threshold_secs
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::config(format!("views.{}: max_retries must be at least 1", name)));
        }
        if self.connect_patience_ms == 0 || self.buffering_patience_ms == 0 {
            return Err(Error::config(format!("views.{}: patience windows must be non-zero", name)));
        }
        Ok(())
    }
}

/// Partial profile as written in the config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ViewProfileOverride {
    quality: Option<Quality>,
    lag_threshold_secs: Option<f64>,
    seek_margin_secs: Option<f64>,
    buffering_patience_ms: Option<u64>,
    connect_patience_ms: Option<u64>,
    self_heal_grace_ms: Option<u64>,
    retry_delay_ms: Option<u64>,
    max_retries: Option<u32>,
    play_retry_delay_ms: Option<u64>,
}

impl ViewProfileOverride {
    fn apply(self, base: ViewProfile) -> ViewProfile {
        ViewProfile {
            quality: self.quality.unwrap_or(base.quality),
            lag_threshold_secs: self.lag_threshold_secs.unwrap_or(base.lag_threshold_secs),
            seek_margin_secs: self.seek_margin_secs.unwrap_or(base.seek_margin_secs),
            buffering_patience_ms: self.buffering_patience_ms.unwrap_or(base.buffering_patience_ms),
            connect_patience_ms: self.connect_patience_ms.unwrap_or(base.connect_patience_ms),
            self_heal_grace_ms: self.self_heal_grace_ms.unwrap_or(base.self_heal_grace_ms),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(base.retry_delay_ms),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            play_retry_delay_ms: self.play_retry_delay_ms.unwrap_or(base.play_retry_delay_ms),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ViewProfilesFile {
    #[serde(default)]
    grid: ViewProfileOverride,
    #[serde(default)]
    detail: ViewProfileOverride,
    #[serde(default)]
    modal: ViewProfileOverride,
}

/// Profiles for every view kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ViewProfilesFile")]
pub struct ViewProfiles {
    pub grid: ViewProfile,
    pub detail: ViewProfile,
    pub modal: ViewProfile,
}

impl From<ViewProfilesFile> for ViewProfiles {
    fn from(file: ViewProfilesFile) -> Self {
        Self {
            grid: file.grid.apply(ViewProfile::grid()),
            detail: file.detail.apply(ViewProfile::detail()),
            modal: file.modal.apply(ViewProfile::modal()),
        }
    }
}

impl Default for ViewProfiles {
    fn default() -> Self {
        ViewProfilesFile::default().into()
    }
}

impl ViewProfiles {
    pub fn profile(&self, kind: ViewKind) -> &ViewProfile {
        match kind {
            ViewKind::Grid => &self.grid,
            ViewKind::Detail => &self.detail,
            ViewKind::Modal => &self.modal,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WallConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub views: ViewProfiles,
}

impl WallConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: WallConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from a file, falling back to defaults when it does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(Error::config("backend.base_url must not be empty"));
        }
        if self.backend.poll_interval_secs == 0 {
            return Err(Error::config("backend.poll_interval_secs must be at least 1"));
        }
        self.views.grid.validate("grid")?;
        self.views.detail.validate("detail")?;
        self.views.modal.validate("modal")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = WallConfig::from_toml_str("").unwrap();
        assert_eq!(config, WallConfig::default());
        assert_eq!(config.backend.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.views.grid.lag_threshold_secs, 2.0);
        assert_eq!(config.views.detail.seek_margin_secs, 1.0);
    }

    #[test]
    fn test_partial_view_override_keeps_view_defaults() {
        let config = WallConfig::from_toml_str(
            r#"
            [backend]
            base_url = "http://nvr.local:8000"
            auth_token = "secret"

            [views.detail]
            quality = "high"
            max_retries = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.base_url, "http://nvr.local:8000");
        assert_eq!(config.backend.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.views.detail.quality, Quality::High);
        assert_eq!(config.views.detail.max_retries, 5);
        assert_eq!(config.views.detail.lag_threshold_secs, 6.0);
        assert_eq!(config.views.grid, ViewProfile::grid());
    }

    #[test]
    fn test_margin_must_be_below_threshold() {
        let err = WallConfig::from_toml_str(
            r#"
            [views.grid]
            lag_threshold_secs = 1.0
            seek_margin_secs = 1.5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let err = WallConfig::from_toml_str("[views.modal]\nmax_retries = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_unknown_view_field_rejected() {
        assert!(WallConfig::from_toml_str("[views.grid]\nlag = 3.0\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\npoll_interval_secs = 5").unwrap();

        let config = WallConfig::from_file(file.path()).unwrap();
        assert_eq!(config.backend.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WallConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, WallConfig::default());
    }
}
