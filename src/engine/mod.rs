//! Provides the interface to the rendering engine collaborator.
//!
//! The engine hosts the harness page. It is driven through two traits:
//! [`EngineLauncher`] starts an engine with a fixed viewport, and
//! [`RenderEngine`] opens a [`HarnessPage`] whose request interception,
//! console output, and network activity are wired to a set of
//! [`PageHooks`] before anything is loaded.
//!
//! [`chrome`] binds these traits to a headless Chromium.

pub mod chrome;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::delivery::AssetDelivery;
use crate::diagnostics::DiagnosticAggregator;
use crate::network::NetworkMonitor;

/// Errors reported by the rendering engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine process could not be started.
    #[error("failed to launch rendering engine: {0}")]
    Launch(String),
    /// Navigation did not complete.
    #[error("{0}")]
    Navigation(String),
    /// A script evaluated in the page threw or could not be run.
    #[error("{0}")]
    Script(String),
    /// The engine could not produce a frame.
    #[error("screenshot failed: {0}")]
    Capture(String),
    /// The engine went away mid-command.
    #[error("rendering engine closed: {0}")]
    Closed(String),
}

/// Viewport of the harness page in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Viewport {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Session components the engine reports page activity to.
#[derive(Clone)]
pub struct PageHooks {
    pub delivery: Arc<AssetDelivery>,
    pub diagnostics: Arc<DiagnosticAggregator>,
    pub network: Arc<NetworkMonitor>,
}

/// A page hosting the harness document.
#[async_trait]
pub trait HarnessPage: Send + Sync {
    /// Registers `source` to run in every new document before its own scripts.
    async fn add_init_script(&self, source: &str) -> Result<(), EngineError>;

    /// Loads `url` and waits for its load event, bounded by `timeout`.
    async fn navigate(&self, url: &str, timeout: Option<Duration>) -> Result<(), EngineError>;

    /// Evaluates `expression`, awaiting a returned promise, and returns its
    /// JSON value (`Null` for values that do not serialize).
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, EngineError>;

    /// Captures the viewport as PNG with the page background left transparent.
    async fn screenshot(&self) -> Result<Vec<u8>, EngineError>;
}

/// A running rendering engine.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Opens a page wired to `hooks`.
    async fn open_page(&self, hooks: PageHooks) -> Result<Arc<dyn HarnessPage>, EngineError>;

    /// Stops the engine. Safe to call more than once.
    async fn shutdown(&self);
}

/// Starts rendering engines.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self, viewport: Viewport) -> Result<Box<dyn RenderEngine>, EngineError>;
}
