//! Provides `glimpse-capture`, a preview renderer for 3D model files.
//!
//! A model is handed to a browser-hosted rendering harness through a local
//! static server. The crate decides when the harness has drawn a stable frame
//! (network quiescence, a settle delay scaled by payload size, then a
//! render-finished flag), screenshots it, and writes a fixed-size PNG.
//!
//! # Build
//! ```text
//! cargo build --release
//! ```
//!
//! # Examples
//! ```no_run
//! use std::path::Path;
//!
//! use glimpse_capture::config::CaptureConfig;
//! use glimpse_capture::engine::chrome::ChromeLauncher;
//! use glimpse_capture::session::RenderSession;
//!
//! # async fn run() -> glimpse_capture::error::Result<()> {
//! let config = CaptureConfig::default();
//! let launcher = ChromeLauncher::default();
//! let mut session = RenderSession::start(config, &launcher).await?;
//! let result = session.render(Path::new("model.glb"), Path::new("model.png")).await;
//! session.teardown().await;
//! result
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod delivery;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod formats;
pub mod network;
pub mod protocol;
pub mod server;
pub mod session;

pub use error::{CaptureError, Result};
