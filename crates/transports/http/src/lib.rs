//! Backend transport for the camera wall
//!
//! Talks to the NVR backend over REST: fetches the camera list, issues
//! per-camera control actions and keeps the session registry reconciled with
//! what the backend reports.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use camwall_http::{BackendClient, CameraPoller};
//! # async fn example(handle: camwall_core::SupervisorHandle) -> camwall_http::Result<()> {
//! let config = camwall_core::BackendConfig::default();
//! let client = Arc::new(BackendClient::new(&config)?);
//! let mut poller = CameraPoller::new(client, handle, config.poll_interval());
//! poller.poll_once().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod controller;
pub mod error;
pub mod poller;

pub use client::{ActionResponse, BackendClient, CameraAction, CameraBackend};
pub use controller::WallController;
pub use error::{Error, Result};
pub use poller::{CameraPoller, RefreshTrigger};
