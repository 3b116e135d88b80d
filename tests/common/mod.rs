//! Shared fixtures: synthetic models and a scripted rendering engine that
//! plays the harness's part without a browser.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;

use glimpse_capture::config::{HARNESS_DOCUMENT, RENDER_FINISHED_FLAG, RENDER_STARTED_FLAG};
use glimpse_capture::delivery::Interception;
use glimpse_capture::diagnostics::{ConsoleArg, ConsoleEvent, ConsoleLevel, ResponseEvent};
use glimpse_capture::engine::{
    EngineError, EngineLauncher, HarnessPage, PageHooks, RenderEngine, Viewport,
};

/// A valid GLB whose binary chunk holds `bin_len` zero bytes.
pub fn glb_model(bin_len: usize) -> Vec<u8> {
    let json = if bin_len > 0 {
        format!(r#"{{"asset":{{"version":"2.0"}},"buffers":[{{"byteLength":{bin_len}}}]}}"#)
    } else {
        r#"{"asset":{"version":"2.0"}}"#.to_owned()
    };
    glb_container(&json, bin_len)
}

/// Wraps `json` and `bin_len` zero bytes in a GLB container.
pub fn glb_container(json: &str, bin_len: usize) -> Vec<u8> {
    let mut json = json.as_bytes().to_vec();
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    let padded_bin = bin_len.div_ceil(4) * 4;

    let mut total = 12 + 8 + json.len();
    if bin_len > 0 {
        total += 8 + padded_bin;
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(b"JSON");
    out.extend_from_slice(&json);
    if bin_len > 0 {
        out.extend_from_slice(&(padded_bin as u32).to_le_bytes());
        out.extend_from_slice(b"BIN\0");
        out.resize(total, 0);
    }
    out
}

/// A static root holding an empty harness document.
pub fn harness_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(HARNESS_DOCUMENT),
        "<!doctype html><canvas></canvas>",
    )
    .unwrap();
    dir
}

/// When the harness sets its finished flag.
#[derive(Debug, Clone, Copy)]
pub enum Finish {
    /// After this many reads of the flag.
    After(usize),
    Never,
}

/// What the fake harness does.
#[derive(Debug, Clone)]
pub struct Script {
    pub finish: Finish,
    pub console: Vec<ConsoleEvent>,
    pub fail_navigation: bool,
    pub transparent: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            finish: Finish::After(3),
            console: Vec::new(),
            fail_navigation: false,
            transparent: false,
        }
    }
}

impl Script {
    pub fn console(mut self, level: ConsoleLevel, text: &str) -> Self {
        self.console
            .push(ConsoleEvent::new(level, vec![ConsoleArg::text(text)]));
        self
    }
}

/// What the fake engine observed.
#[derive(Default)]
pub struct Observed {
    pub viewport: Mutex<Option<Viewport>>,
    pub pages_opened: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub evaluated: Mutex<Vec<String>>,
    pub inline_bytes: AtomicU64,
    pub redirected_bytes: AtomicU64,
    pub render_started: Mutex<Option<tokio::time::Instant>>,
    /// Init scripts, each with the number of navigations made before it.
    pub init_scripts: Mutex<Vec<(String, usize)>>,
    pub navigations: AtomicUsize,
}

/// Launches [`FakeEngine`]s that read redirected models from `static_dir`.
pub struct FakeLauncher {
    pub script: Script,
    pub static_dir: PathBuf,
    pub observed: Arc<Observed>,
}

impl FakeLauncher {
    pub fn new(static_dir: &Path, script: Script) -> Self {
        Self {
            script,
            static_dir: static_dir.to_path_buf(),
            observed: Arc::new(Observed::default()),
        }
    }
}

#[async_trait]
impl EngineLauncher for FakeLauncher {
    async fn launch(&self, viewport: Viewport) -> Result<Box<dyn RenderEngine>, EngineError> {
        *self.observed.viewport.lock() = Some(viewport);
        Ok(Box::new(FakeEngine {
            viewport,
            script: self.script.clone(),
            static_dir: self.static_dir.clone(),
            observed: self.observed.clone(),
        }))
    }
}

pub struct FakeEngine {
    viewport: Viewport,
    script: Script,
    static_dir: PathBuf,
    observed: Arc<Observed>,
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn open_page(&self, hooks: PageHooks) -> Result<Arc<dyn HarnessPage>, EngineError> {
        self.observed.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePage {
            hooks,
            viewport: self.viewport,
            script: self.script.clone(),
            static_dir: self.static_dir.clone(),
            observed: self.observed.clone(),
            started: AtomicBool::new(false),
            finished_reads: AtomicUsize::new(0),
        }))
    }

    async fn shutdown(&self) {
        self.observed.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakePage {
    hooks: PageHooks,
    viewport: Viewport,
    script: Script,
    static_dir: PathBuf,
    observed: Arc<Observed>,
    started: AtomicBool,
    finished_reads: AtomicUsize,
}

impl FakePage {
    /// Requests the model the way the harness does, following a redirect to disk.
    fn fetch_model(&self) -> Result<(), EngineError> {
        let network = &self.hooks.network;
        network.request_started("model");
        let result = match self.hooks.delivery.intercept(self.hooks.delivery.model_url()) {
            Interception::Serve(asset) => {
                self.observed
                    .inline_bytes
                    .fetch_add(asset.len(), Ordering::SeqCst);
                Ok(())
            }
            Interception::Redirect { location } => {
                let name = location
                    .rsplit('/')
                    .next()
                    .ok_or_else(|| EngineError::Navigation(location.clone()))?;
                let path = self.static_dir.join("_assets").join(name);
                let bytes = std::fs::read(&path)
                    .map_err(|e| EngineError::Navigation(format!("{}: {e}", path.display())))?;
                self.observed
                    .redirected_bytes
                    .fetch_add(bytes.len() as u64, Ordering::SeqCst);
                self.hooks.diagnostics.on_response(ResponseEvent {
                    url: location,
                    status: 200,
                    body_len: Some(bytes.len() as u64),
                });
                Ok(())
            }
            Interception::PassThrough | Interception::Unavailable => {
                Err(EngineError::Navigation("model request not answered".into()))
            }
        };
        network.request_finished("model");
        result
    }
}

#[async_trait]
impl HarnessPage for FakePage {
    async fn add_init_script(&self, source: &str) -> Result<(), EngineError> {
        let navigations = self.observed.navigations.load(Ordering::SeqCst);
        self.observed
            .init_scripts
            .lock()
            .push((source.to_owned(), navigations));
        Ok(())
    }

    async fn navigate(&self, _url: &str, _timeout: Option<Duration>) -> Result<(), EngineError> {
        self.observed.navigations.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_navigation {
            return Err(EngineError::Navigation("net::ERR_CONNECTION_REFUSED".into()));
        }
        self.hooks.network.request_started("document");
        self.hooks.network.request_finished("document");

        for event in &self.script.console {
            self.hooks.diagnostics.on_console(event.clone());
        }
        self.fetch_model()
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, EngineError> {
        if expression.contains(RENDER_STARTED_FLAG) {
            self.started.store(true, Ordering::SeqCst);
            *self.observed.render_started.lock() = Some(tokio::time::Instant::now());
            return Ok(serde_json::Value::Bool(true));
        }
        if expression.contains(RENDER_FINISHED_FLAG) {
            if !self.started.load(Ordering::SeqCst) {
                return Ok(serde_json::Value::Bool(false));
            }
            let reads = self.finished_reads.fetch_add(1, Ordering::SeqCst) + 1;
            let finished = matches!(self.script.finish, Finish::After(n) if reads >= n);
            return Ok(serde_json::Value::Bool(finished));
        }
        self.observed.evaluated.lock().push(expression.to_owned());
        Ok(serde_json::Value::Null)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, EngineError> {
        let mut frame = RgbaImage::new(self.viewport.width, self.viewport.height);
        if !self.script.transparent {
            for y in self.viewport.height / 4..self.viewport.height * 3 / 4 {
                for x in self.viewport.width / 4..self.viewport.width * 3 / 4 {
                    frame.put_pixel(x, y, Rgba([220, 120, 40, 255]));
                }
            }
        }
        let mut png = Vec::new();
        frame
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| EngineError::Capture(e.to_string()))?;
        Ok(png)
    }
}
