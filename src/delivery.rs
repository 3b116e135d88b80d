//! Provides the asset delivery layer: the one request interception that
//! hands the model payload to the harness.
//!
//! Payloads up to the inline threshold are answered directly with a 200 and
//! the sniffed content type. Larger payloads are written to a temporary file
//! under the static root and the harness is redirected to it; the file is
//! removed once the harness has gone network-idle, and any file still around
//! at teardown is removed by the session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{CaptureConfig, TEMP_ASSET_DIR};
use crate::diagnostics::DiagnosticAggregator;
use crate::error::CaptureError;
use crate::formats::ModelAsset;
use crate::network::{NetworkMonitor, TransferCounter};

/// Length of the random part of a temporary file name.
const TEMP_NAME_LEN: usize = 24;

/// How an intercepted request is answered.
#[derive(Debug, Clone)]
pub enum Interception {
    /// Not the model request; let it through untouched.
    PassThrough,
    /// Answer 200 with the asset bytes and its sniffed content type.
    Serve(ModelAsset),
    /// Answer 302 pointing at a temporary copy of the asset.
    Redirect { location: String },
    /// The asset could not be staged; answer 500.
    Unavailable,
}

/// Temporary model files that still exist on disk.
///
/// Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct TempAssets {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl TempAssets {
    /// Writes `bytes` to a new file with a random name and `extension` in `dir`.
    ///
    /// # Errors
    /// Returns [`CaptureError::Io`] if the directory or file cannot be written.
    pub fn create(
        &self,
        dir: &Path,
        extension: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, CaptureError> {
        std::fs::create_dir_all(dir).map_err(|e| CaptureError::io(dir, e))?;

        let name: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TEMP_NAME_LEN)
            .map(char::from)
            .collect();
        let path = dir.join(format!("{name}.{extension}"));

        std::fs::write(&path, bytes).map_err(|e| CaptureError::io(&path, e))?;
        self.paths.lock().push(path.clone());
        Ok(path)
    }

    /// Deletes one tracked file. Already-missing files count as removed.
    ///
    /// # Errors
    /// Returns [`CaptureError::Cleanup`] if the file exists but cannot be deleted;
    /// it stays tracked so teardown can retry.
    pub fn remove(&self, path: &Path) -> Result<(), CaptureError> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(CaptureError::Cleanup {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
        self.paths.lock().retain(|p| p != path);
        Ok(())
    }

    /// Deletes every tracked file, returning the failures.
    pub fn remove_all(&self) -> Vec<CaptureError> {
        self.outstanding()
            .iter()
            .filter_map(|path| self.remove(path).err())
            .collect()
    }

    /// Returns the files not yet deleted.
    pub fn outstanding(&self) -> Vec<PathBuf> {
        self.paths.lock().clone()
    }
}

/// Size and timing knobs for delivery.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// Largest payload answered inline.
    pub inline_threshold: u64,
    /// Quiet period that ends a redirected file's lifetime.
    pub idle: Duration,
    /// Bound on that wait; the file is deleted when it elapses too.
    pub network_timeout: Option<Duration>,
}

impl DeliveryPolicy {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            inline_threshold: config.inline_threshold_bytes,
            idle: config.idle_time(),
            network_timeout: config.network_timeout(),
        }
    }
}

/// Answers the harness's model request.
pub struct AssetDelivery {
    asset: ModelAsset,
    origin: String,
    model_url: String,
    temp_dir: PathBuf,
    policy: DeliveryPolicy,
    transfer: TransferCounter,
    temp_assets: TempAssets,
    network: Arc<NetworkMonitor>,
    diagnostics: Arc<DiagnosticAggregator>,
    runtime: tokio::runtime::Handle,
}

impl AssetDelivery {
    /// Creates the delivery layer for `asset`, served from `origin`
    /// (`http://host:port`) whose files live under `static_dir`.
    ///
    /// Must be called from within a Tokio runtime; cleanup tasks are spawned on it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        asset: ModelAsset,
        origin: &str,
        static_dir: &Path,
        policy: DeliveryPolicy,
        transfer: TransferCounter,
        temp_assets: TempAssets,
        network: Arc<NetworkMonitor>,
        diagnostics: Arc<DiagnosticAggregator>,
    ) -> Self {
        Self {
            asset,
            origin: origin.to_owned(),
            model_url: model_url(origin),
            temp_dir: static_dir.join(TEMP_ASSET_DIR),
            policy,
            transfer,
            temp_assets,
            network,
            diagnostics,
            runtime: tokio::runtime::Handle::current(),
        }
    }

    /// Returns the URL the harness requests the model from.
    pub fn model_url(&self) -> &str {
        &self.model_url
    }

    /// Decides how to answer a request for `url`.
    pub fn intercept(&self, url: &str) -> Interception {
        if url != self.model_url {
            return Interception::PassThrough;
        }

        let size = self.asset.len();
        if size <= self.policy.inline_threshold {
            debug!(size, content_type = self.asset.content_type().mime, "serving model inline");
            self.transfer.add(size);
            return Interception::Serve(self.asset.clone());
        }

        match self.stage_temp_file() {
            Ok(location) => {
                info!(size, %location, "redirecting model request to temporary file");
                Interception::Redirect { location }
            }
            Err(e) => {
                self.diagnostics.report_fatal(&e.to_string());
                Interception::Unavailable
            }
        }
    }

    fn stage_temp_file(&self) -> Result<String, CaptureError> {
        let path = self.temp_assets.create(
            &self.temp_dir,
            self.asset.content_type().extension,
            self.asset.bytes(),
        )?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_owned();
        let location = format!("{}/{}/{}", self.origin, TEMP_ASSET_DIR, file_name);

        // Delete only once the harness has stopped fetching
        let network = self.network.clone();
        let temp_assets = self.temp_assets.clone();
        let policy = self.policy;
        self.runtime.spawn(async move {
            if let Err(e) = network.wait_for_idle(policy.idle, policy.network_timeout).await {
                debug!("{e}; deleting temporary model anyway");
            }
            match temp_assets.remove(&path) {
                Ok(()) => debug!(path = %path.display(), "temporary model deleted"),
                Err(e) => warn!("{e}"),
            }
        });

        Ok(location)
    }
}

/// Returns the model URL for a serving origin.
///
/// # Examples
/// ```
/// use glimpse_capture::delivery::model_url;
///
/// assert_eq!(model_url("http://127.0.0.1:8080"), "http://127.0.0.1:8080/models/model.glb");
/// ```
pub fn model_url(origin: &str) -> String {
    format!("{}{}", origin, crate::config::MODEL_ASSET_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "http://127.0.0.1:4000";

    fn obj_asset(padding: usize) -> ModelAsset {
        let mut bytes = b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n".to_vec();
        bytes.extend(std::iter::repeat(b'\n').take(padding));
        ModelAsset::from_bytes(bytes, Some("obj")).unwrap()
    }

    fn delivery(
        asset: ModelAsset,
        threshold: u64,
        dir: &Path,
    ) -> (AssetDelivery, TransferCounter, TempAssets, Arc<NetworkMonitor>) {
        let transfer = TransferCounter::default();
        let temp_assets = TempAssets::default();
        let network = Arc::new(NetworkMonitor::new());
        let diagnostics = Arc::new(DiagnosticAggregator::new(
            transfer.clone(),
            model_url(ORIGIN),
        ));
        let policy = DeliveryPolicy {
            inline_threshold: threshold,
            idle: Duration::from_secs(9),
            network_timeout: Some(Duration::from_secs(300)),
        };
        let delivery = AssetDelivery::new(
            asset,
            ORIGIN,
            dir,
            policy,
            transfer.clone(),
            temp_assets.clone(),
            network.clone(),
            diagnostics,
        );
        (delivery, transfer, temp_assets, network)
    }

    #[tokio::test]
    async fn test_other_requests_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let (delivery, transfer, _, _) = delivery(obj_asset(0), 1024, dir.path());
        let result = delivery.intercept("http://127.0.0.1:4000/index.html");
        assert!(matches!(result, Interception::PassThrough));
        let result = delivery.intercept("http://127.0.0.1:4000/models/model.glb?v=2");
        assert!(matches!(result, Interception::PassThrough));
        assert_eq!(transfer.total(), 0);
    }

    #[tokio::test]
    async fn test_small_asset_served_inline() {
        let dir = tempfile::tempdir().unwrap();
        let asset = obj_asset(0);
        let (delivery, transfer, temp_assets, _) = delivery(asset.clone(), asset.len(), dir.path());

        match delivery.intercept(delivery.model_url()) {
            Interception::Serve(served) => {
                assert_eq!(served.bytes(), asset.bytes());
                assert_eq!(served.content_type().mime, "model/obj");
            }
            other => panic!("expected inline delivery, got {other:?}"),
        }
        assert_eq!(transfer.total(), asset.len());
        assert!(temp_assets.outstanding().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_asset_redirected_until_idle() {
        let dir = tempfile::tempdir().unwrap();
        let asset = obj_asset(64);
        let (delivery, _, temp_assets, network) = delivery(asset.clone(), 16, dir.path());
        network.request_started("harness");

        let location = match delivery.intercept(delivery.model_url()) {
            Interception::Redirect { location } => location,
            other => panic!("expected redirect, got {other:?}"),
        };
        assert!(location.starts_with("http://127.0.0.1:4000/_assets/"));
        assert!(location.ends_with(".obj"));

        let outstanding = temp_assets.outstanding();
        assert_eq!(outstanding.len(), 1);
        let path = outstanding[0].clone();
        assert_eq!(std::fs::read(&path).unwrap(), asset.bytes());

        // Still busy: the file must survive well past the idle period
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(path.exists());

        network.request_finished("harness");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!path.exists());
        assert!(temp_assets.outstanding().is_empty());
    }

    #[test]
    fn test_remove_all_clears_outstanding_files() {
        let dir = tempfile::tempdir().unwrap();
        let temp_assets = TempAssets::default();
        let a = temp_assets.create(dir.path(), "glb", b"a").unwrap();
        let b = temp_assets.create(dir.path(), "glb", b"b").unwrap();
        assert_ne!(a, b);

        std::fs::remove_file(&a).unwrap();
        assert!(temp_assets.remove_all().is_empty());
        assert!(!b.exists());
        assert!(temp_assets.outstanding().is_empty());
    }
}
