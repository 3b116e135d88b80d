//! Provides the session lifecycle: one owned [`RenderSession`] holds the
//! static server, the rendering engine, and the temporary-file registry, and
//! [`RenderSession::teardown`] releases all three.
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
//! let mut session = RenderSession::start(CaptureConfig::default(), &ChromeLauncher::default()).await?;
//! let result = session.render(Path::new("duck.glb"), Path::new("duck.png")).await;
//! session.teardown().await;
//! result
//! # }
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{CaptureConfig, HARNESS_DOCUMENT};
use crate::delivery::{self, AssetDelivery, DeliveryPolicy, TempAssets};
use crate::diagnostics::DiagnosticAggregator;
use crate::engine::{EngineLauncher, PageHooks, RenderEngine, Viewport};
use crate::error::CaptureError;
use crate::formats::ModelAsset;
use crate::network::{NetworkMonitor, TransferCounter};
use crate::protocol::{AttemptTiming, RenderAttempt};
use crate::server::StaticServer;

/// A static server plus a rendering engine, ready to capture previews.
pub struct RenderSession {
    config: CaptureConfig,
    server: StaticServer,
    engine: Box<dyn RenderEngine>,
    temp_assets: TempAssets,
    torn_down: bool,
}

impl RenderSession {
    /// Starts the static server, then the engine with the configured viewport.
    ///
    /// # Errors
    /// Returns [`CaptureError::Config`] for an unusable configuration,
    /// [`CaptureError::Server`] if the server cannot bind, and
    /// [`CaptureError::Engine`] if the engine fails to launch. Whatever was
    /// already started is stopped again.
    pub async fn start(
        config: CaptureConfig,
        launcher: &dyn EngineLauncher,
    ) -> Result<Self, CaptureError> {
        config.validate()?;
        let harness = config.static_dir.join(HARNESS_DOCUMENT);
        if !harness.is_file() {
            return Err(CaptureError::Config(format!(
                "harness document not found at {}",
                harness.display()
            )));
        }

        let server = StaticServer::start(&config.static_dir).await?;
        let engine = launcher.launch(Viewport::from(config.viewport())).await?;

        Ok(Self {
            config,
            server,
            engine,
            temp_assets: TempAssets::default(),
            torn_down: false,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Temporary model files not yet deleted.
    pub fn temp_assets(&self) -> &TempAssets {
        &self.temp_assets
    }

    /// Renders `input` and writes the preview to `output`.
    pub async fn render(&self, input: &Path, output: &Path) -> Result<(), CaptureError> {
        if self.torn_down {
            return Err(CaptureError::Interrupted);
        }

        let asset = ModelAsset::load(input).await?;
        info!(
            input = %input.display(),
            bytes = asset.len(),
            content_type = asset.content_type().mime,
            "model loaded"
        );

        let prepare_script = read_script(self.config.prepare_script.as_deref()).await?;
        let inject_script = read_script(self.config.inject_script.as_deref()).await?;

        let origin = self.server.origin();
        let transfer = TransferCounter::default();
        let network = Arc::new(NetworkMonitor::new());
        let diagnostics = Arc::new(DiagnosticAggregator::new(
            transfer.clone(),
            delivery::model_url(&origin),
        ));
        let delivery = Arc::new(AssetDelivery::new(
            asset,
            &origin,
            &self.config.static_dir,
            DeliveryPolicy::from_config(&self.config),
            transfer.clone(),
            self.temp_assets.clone(),
            network.clone(),
            diagnostics.clone(),
        ));

        let page = self
            .engine
            .open_page(PageHooks {
                delivery,
                diagnostics: diagnostics.clone(),
                network: network.clone(),
            })
            .await?;

        let stage = Path::new(HARNESS_DOCUMENT)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(HARNESS_DOCUMENT);
        let mut attempt = RenderAttempt::new(
            page.as_ref(),
            &diagnostics,
            &network,
            &transfer,
            AttemptTiming::from_config(&self.config),
            self.server.harness_url(),
            stage,
        );
        if let Some(script) = prepare_script {
            attempt = attempt.with_prepare_script(script);
        }
        if let Some(script) = inject_script {
            attempt = attempt.with_inject_script(script);
        }

        let frame = attempt.run().await?;
        let written = frame
            .write_artifact(
                output,
                self.config.width,
                self.config.height,
                self.config.strict_transparency,
            )
            .await;
        attempt.finish(written.is_ok());
        written?;

        info!("Screenshot generated for file {}", output.display());
        Ok(())
    }

    /// Stops the engine and the server and deletes leftover temporary files.
    /// Cleanup failures are logged. Later calls do nothing.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.engine.shutdown().await;
        self.server.shutdown();
        for e in self.temp_assets.remove_all() {
            warn!("{e}");
        }
        debug!("session torn down");
    }
}

/// Starts a session and renders `input` into `output` unless `shutdown`
/// resolves first, in which case the result is [`CaptureError::Interrupted`].
/// The session is torn down on every path once it has started.
pub async fn run_until<F>(
    config: CaptureConfig,
    launcher: &dyn EngineLauncher,
    input: &Path,
    output: &Path,
    shutdown: F,
) -> Result<(), CaptureError>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut session = tokio::select! {
        started = RenderSession::start(config, launcher) => started?,
        _ = &mut shutdown => return Err(CaptureError::Interrupted),
    };

    let result = tokio::select! {
        rendered = session.render(input, output) => rendered,
        _ = &mut shutdown => {
            info!("interrupt received, shutting down");
            Err(CaptureError::Interrupted)
        }
    };

    session.teardown().await;
    result
}

async fn read_script(path: Option<&Path>) -> Result<Option<String>, CaptureError> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map(Some)
            .map_err(|e| CaptureError::io(path, e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::engine::{EngineError, HarnessPage};

    struct FailingLauncher;

    #[async_trait]
    impl EngineLauncher for FailingLauncher {
        async fn launch(&self, _viewport: Viewport) -> Result<Box<dyn RenderEngine>, EngineError> {
            Err(EngineError::Launch("no browser".into()))
        }
    }

    struct IdleEngine;

    #[async_trait]
    impl RenderEngine for IdleEngine {
        async fn open_page(&self, _hooks: PageHooks) -> Result<Arc<dyn HarnessPage>, EngineError> {
            Err(EngineError::Closed("unused".into()))
        }

        async fn shutdown(&self) {}
    }

    struct IdleLauncher;

    #[async_trait]
    impl EngineLauncher for IdleLauncher {
        async fn launch(&self, _viewport: Viewport) -> Result<Box<dyn RenderEngine>, EngineError> {
            Ok(Box::new(IdleEngine))
        }
    }

    fn config_with_harness(dir: &Path) -> CaptureConfig {
        std::fs::write(dir.join(HARNESS_DOCUMENT), "<html></html>").unwrap();
        CaptureConfig {
            static_dir: dir.to_path_buf(),
            ..CaptureConfig::default()
        }
    }

    #[tokio::test]
    async fn test_missing_harness_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig {
            static_dir: dir.path().to_path_buf(),
            ..CaptureConfig::default()
        };
        let result = RenderSession::start(config, &IdleLauncher).await;
        assert!(matches!(result, Err(CaptureError::Config(_))));
    }

    #[tokio::test]
    async fn test_launch_failure_surfaces_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = RenderSession::start(config_with_harness(dir.path()), &FailingLauncher).await;
        assert!(matches!(result, Err(CaptureError::Engine(EngineError::Launch(_)))));
    }

    #[tokio::test]
    async fn test_teardown_removes_outstanding_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = RenderSession::start(config_with_harness(dir.path()), &IdleLauncher)
            .await
            .unwrap();
        let path = session
            .temp_assets()
            .create(&dir.path().join("_assets"), "glb", b"glTF")
            .unwrap();

        session.teardown().await;
        session.teardown().await;
        assert!(!path.exists());
        assert!(session.temp_assets().outstanding().is_empty());
    }

    #[tokio::test]
    async fn test_render_after_teardown_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = RenderSession::start(config_with_harness(dir.path()), &IdleLauncher)
            .await
            .unwrap();
        session.teardown().await;
        let result = session
            .render(&dir.path().join("in.glb"), &dir.path().join("out.png"))
            .await;
        assert!(matches!(result, Err(CaptureError::Interrupted)));
    }
}
