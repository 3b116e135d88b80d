//! Provides the `glimpse-capture` tool for rendering 3D model previews.
//!
//! Usage: `glimpse-capture <model_file> <output_png> [options]`
//!
//! Serves the model to the browser harness under `public/`, waits for it to
//! render, and writes a PNG of the configured size.
//!
//! # Examples
//! ```text
//! glimpse-capture duck.glb duck.png
//! RUST_LOG=debug VISIBLE=1 glimpse-capture scan.ply scan.png --render-timeout 0
//! ```

use std::path::{Path, PathBuf};
use std::process;

use clap::{CommandFactory, Parser};
use tracing::error;
use tracing_subscriber::EnvFilter;

use glimpse_capture::config::{CaptureConfig, SHUTDOWN_GRACE};
use glimpse_capture::engine::chrome::ChromeLauncher;
use glimpse_capture::session;
use glimpse_capture::CaptureError;

const DEFAULT_LOG_FILTER: &str = "info,hyper=warn,axum=warn";

#[derive(Parser, Debug)]
#[command(
    name = "glimpse-capture",
    about = "Render a preview image of a 3D model through a browser harness",
    version
)]
struct Cli {
    /// Model file to render (glb, gltf, obj, stl, ply).
    input: Option<PathBuf>,

    /// Where to write the PNG preview.
    output: Option<PathBuf>,

    /// JSON file with configuration overrides.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the harness document.
    #[arg(long, value_name = "DIR")]
    static_dir: Option<PathBuf>,

    /// Output width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Output height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Viewport supersampling factor.
    #[arg(long)]
    scale: Option<u32>,

    /// Seconds of network silence before rendering starts.
    #[arg(long, value_name = "SECS")]
    idle: Option<u64>,

    /// Settle seconds per transferred megabyte.
    #[arg(long, value_name = "SECS")]
    settle_per_mb: Option<f64>,

    /// Network bound in minutes (0 disables it).
    #[arg(long, value_name = "MINS")]
    network_timeout: Option<u64>,

    /// Render bound in seconds (0 disables it).
    #[arg(long, value_name = "SECS")]
    render_timeout: Option<u64>,

    /// Payloads above this many bytes are served from a temporary file.
    #[arg(long, value_name = "BYTES")]
    inline_threshold: Option<u64>,

    /// Script evaluated in the harness once it has loaded.
    #[arg(long, value_name = "PATH")]
    prepare_script: Option<PathBuf>,

    /// Script run in every document before the harness's own scripts.
    #[arg(long, value_name = "PATH")]
    inject_script: Option<PathBuf>,

    /// Fail when the captured frame has no visible pixel.
    #[arg(long)]
    strict_transparency: bool,

    /// Browser executable to launch.
    #[arg(long, value_name = "PATH")]
    browser: Option<PathBuf>,
}

impl Cli {
    /// The input and output paths, or the usage error for the first missing one.
    fn paths(&self) -> Result<(PathBuf, PathBuf), CaptureError> {
        let input = self.input.clone().ok_or(CaptureError::MissingInput)?;
        let output = self.output.clone().ok_or(CaptureError::MissingOutput)?;
        Ok((input, output))
    }

    /// Layers the flags over the JSON file (if any) over the defaults.
    fn resolve_config(&self) -> Result<CaptureConfig, CaptureError> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::from_json_file(path)?,
            None => CaptureConfig::default(),
        };

        if let Some(dir) = &self.static_dir {
            config.static_dir = dir.clone();
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(scale) = self.scale {
            config.view_scale = scale;
        }
        if let Some(idle) = self.idle {
            config.idle_secs = idle;
        }
        if let Some(rate) = self.settle_per_mb {
            config.parse_secs_per_mb = rate;
        }
        if let Some(mins) = self.network_timeout {
            config.network_timeout_mins = mins;
        }
        if let Some(secs) = self.render_timeout {
            config.render_timeout_secs = secs;
        }
        if let Some(bytes) = self.inline_threshold {
            config.inline_threshold_bytes = bytes;
        }
        if let Some(script) = &self.prepare_script {
            config.prepare_script = Some(script.clone());
        }
        if let Some(script) = &self.inject_script {
            config.inject_script = Some(script.clone());
        }
        if self.strict_transparency {
            config.strict_transparency = true;
        }
        if let Some(browser) = &self.browser {
            config.browser_path = Some(browser.clone());
        }
        if std::env::var_os("VISIBLE").is_some() {
            config.headless = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    let (input, output) = match cli.paths() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("{}", Cli::command().render_usage());
            if matches!(e, CaptureError::MissingOutput) {
                error!("{e}");
            }
            process::exit(e.exit_code());
        }
    };

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(e.exit_code());
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {e}");
            process::exit(1);
        }
    };

    let result = runtime.block_on(run(config, &input, &output));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            error!("{e}");
            process::exit(e.exit_code());
        }
    }
}

/// Runs one capture, stopping early on Ctrl-C.
async fn run(config: CaptureConfig, input: &Path, output: &Path) -> Result<(), CaptureError> {
    let launcher = ChromeLauncher {
        visible: !config.headless,
        browser_path: config.browser_path.clone(),
    };
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler; never interrupt
            std::future::pending::<()>().await;
        }
    };
    session::run_until(config, &launcher, input, output, interrupt).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_paths_map_to_usage_exit_codes() {
        let none = Cli::try_parse_from(["glimpse-capture"]).unwrap();
        assert_eq!(none.paths().unwrap_err().exit_code(), 2);

        let input_only = Cli::try_parse_from(["glimpse-capture", "duck.glb"]).unwrap();
        let err = input_only.paths().unwrap_err();
        assert!(matches!(err, CaptureError::MissingOutput));
        assert_eq!(err.exit_code(), 3);

        let both = Cli::try_parse_from(["glimpse-capture", "duck.glb", "duck.png"]).unwrap();
        assert_eq!(
            both.paths().unwrap(),
            (PathBuf::from("duck.glb"), PathBuf::from("duck.png"))
        );
    }

    #[test]
    fn test_usage_names_both_positionals() {
        let usage = Cli::command().render_usage().to_string();
        assert!(usage.contains("[INPUT]"), "{usage}");
        assert!(usage.contains("[OUTPUT]"), "{usage}");
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "glimpse-capture",
            "duck.glb",
            "duck.png",
            "--width",
            "256",
            "--inject-script",
            "stub.js",
        ])
        .unwrap();
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.width, 256);
        assert_eq!(config.inject_script, Some(PathBuf::from("stub.js")));
    }
}
