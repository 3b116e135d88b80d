//! Provides the tunable constants and the runtime configuration for a capture.
//!
//! Defaults mirror the reference pipeline: 9 s of network silence before the
//! render is signalled, 6 s of settle time per transferred megabyte, a 5 minute
//! network bound, a 5 second render bound, and a 400×400 artifact captured at
//! twice that resolution.
//!
//! # Examples
//! ```
//! use glimpse_capture::config::CaptureConfig;
//!
//! let config = CaptureConfig::default();
//! assert_eq!(config.viewport(), (800, 800));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::CaptureError;

/// Logical path the harness requests the model payload from.
pub const MODEL_ASSET_PATH: &str = "/models/model.glb";

/// File name of the harness entry document inside the static root.
pub const HARNESS_DOCUMENT: &str = "index.html";

/// Global flag the harness reads before it starts drawing.
pub const RENDER_STARTED_FLAG: &str = "_renderStarted";

/// Global flag the harness sets once a frame is complete.
pub const RENDER_FINISHED_FLAG: &str = "_renderFinished";

/// Interval between reads of the render-finished flag.
pub const RENDER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Zero-in-flight window that completes the initial navigation.
pub const NAVIGATION_IDLE: Duration = Duration::from_millis(500);

/// Granularity of the network-idle check.
pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Bytes in one settle-delay megabyte.
pub const BYTES_PER_MEGABYTE: u64 = 1024 * 1024;

/// Time the runtime gets to wind down after teardown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);

/// Directory (relative to the static root) holding redirected model payloads.
pub const TEMP_ASSET_DIR: &str = "_assets";

/// Longest wait any single timing knob may configure.
pub const MAX_WAIT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Runtime configuration for one capture.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
///
/// # Examples
/// ```
/// use glimpse_capture::config::CaptureConfig;
///
/// let config: CaptureConfig = serde_json::from_str(r#"{"render_timeout_secs": 0}"#).unwrap();
/// assert_eq!(config.render_timeout(), None);
/// assert_eq!(config.width, 400);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Seconds without network activity before the render may be signalled.
    pub idle_secs: u64,
    /// Settle time per transferred megabyte, in seconds.
    pub parse_secs_per_mb: f64,
    /// Network bound in minutes, 0 disables it.
    pub network_timeout_mins: u64,
    /// Render bound in seconds, 0 disables it.
    pub render_timeout_secs: u64,
    /// Artifact width in pixels.
    pub width: u32,
    /// Artifact height in pixels.
    pub height: u32,
    /// Viewport supersampling factor.
    pub view_scale: u32,
    /// Payloads above this size are delivered through a temporary file.
    pub inline_threshold_bytes: u64,
    /// Root served by the static endpoint; must contain the harness document.
    pub static_dir: PathBuf,
    /// Script evaluated in the harness after it loads.
    pub prepare_script: Option<PathBuf>,
    /// Script registered to run in every document before the harness's own.
    pub inject_script: Option<PathBuf>,
    /// Reject captures without a single visible pixel.
    pub strict_transparency: bool,
    /// Launch the browser without a window.
    pub headless: bool,
    /// Browser executable, auto-detected when unset.
    pub browser_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            idle_secs: 9,
            parse_secs_per_mb: 6.0,
            network_timeout_mins: 5,
            render_timeout_secs: 5,
            width: 400,
            height: 400,
            view_scale: 2,
            inline_threshold_bytes: 80 * BYTES_PER_MEGABYTE,
            static_dir: PathBuf::from("public"),
            prepare_script: None,
            inject_script: None,
            strict_transparency: false,
            headless: true,
            browser_path: None,
        }
    }
}

impl CaptureConfig {
    /// Reads a configuration from a JSON file, filling missing keys with defaults.
    ///
    /// # Errors
    /// Returns [`CaptureError::Config`] if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self, CaptureError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| CaptureError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Checks the values that would make a capture impossible.
    ///
    /// # Errors
    /// Returns [`CaptureError::Config`] for zero dimensions, a zero scale, a
    /// viewport too large to address, a negative settle rate, or a wait longer
    /// than [`MAX_WAIT`].
    ///
    /// # Examples
    /// ```
    /// use glimpse_capture::config::CaptureConfig;
    ///
    /// let config = CaptureConfig { width: 0, ..CaptureConfig::default() };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Config(format!(
                "output size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.view_scale == 0 {
            return Err(CaptureError::Config("view scale must be at least 1".into()));
        }
        if self
            .width
            .checked_mul(self.view_scale)
            .zip(self.height.checked_mul(self.view_scale))
            .is_none()
        {
            return Err(CaptureError::Config(format!(
                "viewport {}x{} at scale {} is too large",
                self.width, self.height, self.view_scale
            )));
        }

        let max_secs = MAX_WAIT.as_secs();
        if !self.parse_secs_per_mb.is_finite()
            || self.parse_secs_per_mb < 0.0
            || self.parse_secs_per_mb > max_secs as f64
        {
            return Err(CaptureError::Config(format!(
                "settle rate must be between 0 and {max_secs} seconds, got {}",
                self.parse_secs_per_mb
            )));
        }
        let waits = [
            ("idle time", self.idle_secs),
            ("render timeout", self.render_timeout_secs),
            ("network timeout", self.network_timeout_mins.saturating_mul(60)),
        ];
        for (name, secs) in waits {
            if secs > max_secs {
                return Err(CaptureError::Config(format!(
                    "{name} of {secs} s exceeds {max_secs} s"
                )));
            }
        }
        Ok(())
    }

    /// Returns the quiet period that counts as network idle.
    pub fn idle_time(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    /// Returns the settle delay applied per transferred megabyte.
    pub fn settle_per_megabyte(&self) -> Duration {
        Duration::try_from_secs_f64(self.parse_secs_per_mb.max(0.0))
            .map_or(MAX_WAIT, |rate| rate.min(MAX_WAIT))
    }

    /// Returns the network bound, or `None` when disabled.
    pub fn network_timeout(&self) -> Option<Duration> {
        (self.network_timeout_mins > 0).then(|| Duration::from_secs(self.network_timeout_mins.saturating_mul(60)))
    }

    /// Returns the render bound, or `None` when disabled.
    pub fn render_timeout(&self) -> Option<Duration> {
        (self.render_timeout_secs > 0).then(|| Duration::from_secs(self.render_timeout_secs))
    }

    /// Returns the browser viewport: output size times the scale factor.
    pub fn viewport(&self) -> (u32, u32) {
        (
            self.width.saturating_mul(self.view_scale),
            self.height.saturating_mul(self.view_scale),
        )
    }
}
