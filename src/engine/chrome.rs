//! Provides the headless Chromium binding of the engine traits.
//!
//! `headless_chrome` is a blocking client that delivers events on its own
//! threads, so page commands run on Tokio's blocking pool and the event
//! callbacks write straight into the shared session components.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use headless_chrome::browser::tab::RequestPausedDecision;
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::Emulation;
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FulfillRequest, HeaderEntry};
use headless_chrome::protocol::cdp::Network::events::ResponseReceivedEventParams;
use headless_chrome::protocol::cdp::Network::GetResponseBodyReturnObject;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::protocol::cdp::Runtime::{
    ConsoleAPICalledEventTypeOption, RemoteObject, RemoteObjectSubtype,
};
use headless_chrome::protocol::cdp::DOM;
use headless_chrome::{Browser, LaunchOptions, Tab};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{EngineError, EngineLauncher, HarnessPage, PageHooks, RenderEngine, Viewport};
use crate::delivery::{AssetDelivery, Interception};
use crate::diagnostics::{ConsoleArg, ConsoleEvent, ConsoleLevel, ResponseEvent};

/// Stand-in for "no bound"; `headless_chrome` needs a finite duration.
const UNBOUNDED: Duration = Duration::from_secs(24 * 60 * 60);

const LAUNCH_FLAGS: [&str; 2] = ["--hide-scrollbars", "--enable-gpu"];

const RESPONSE_HANDLER: &str = "glimpse-capture";

/// Launches Chromium through `headless_chrome`.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    /// Show the browser window.
    pub visible: bool,
    /// Browser executable; auto-detected when `None`.
    pub browser_path: Option<PathBuf>,
}

#[async_trait]
impl EngineLauncher for ChromeLauncher {
    async fn launch(&self, viewport: Viewport) -> Result<Box<dyn RenderEngine>, EngineError> {
        let launcher = self.clone();
        let browser = tokio::task::spawn_blocking(move || launcher.start(viewport))
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))??;

        info!(
            width = viewport.width,
            height = viewport.height,
            headless = !self.visible,
            "browser launched"
        );
        Ok(Box::new(ChromeEngine {
            browser: Arc::new(Mutex::new(Some(browser))),
        }))
    }
}

impl ChromeLauncher {
    fn start(&self, viewport: Viewport) -> Result<Browser, EngineError> {
        let options = LaunchOptions::default_builder()
            .headless(!self.visible)
            .window_size(Some((viewport.width, viewport.height)))
            .path(self.browser_path.clone())
            .idle_browser_timeout(UNBOUNDED)
            .args(LAUNCH_FLAGS.iter().map(|flag| OsStr::new(*flag)).collect())
            .build()
            .map_err(|e| EngineError::Launch(e.to_string()))?;
        Browser::new(options).map_err(|e| EngineError::Launch(e.to_string()))
    }
}

/// A running Chromium.
pub struct ChromeEngine {
    browser: Arc<Mutex<Option<Browser>>>,
}

#[async_trait]
impl RenderEngine for ChromeEngine {
    async fn open_page(&self, hooks: PageHooks) -> Result<Arc<dyn HarnessPage>, EngineError> {
        let browser = self.browser.clone();
        let tab = tokio::task::spawn_blocking(move || -> Result<Arc<Tab>, EngineError> {
            let guard = browser.lock();
            let browser = guard
                .as_ref()
                .ok_or_else(|| EngineError::Closed("browser already shut down".into()))?;
            let tab = browser
                .new_tab()
                .map_err(|e| EngineError::Closed(e.to_string()))?;
            wire_page(&tab, hooks).map_err(|e| EngineError::Closed(e.to_string()))?;
            Ok(tab)
        })
        .await
        .map_err(|e| EngineError::Closed(e.to_string()))??;

        Ok(Arc::new(ChromePage { tab }))
    }

    async fn shutdown(&self) {
        let browser = self.browser.lock().take();
        if let Some(browser) = browser {
            // Dropping the handle kills the process and reaps it
            let _ = tokio::task::spawn_blocking(move || drop(browser)).await;
            debug!("browser closed");
        }
    }
}

/// Hooks request interception, console output, and network activity of `tab`
/// into the session before the harness is loaded.
fn wire_page(tab: &Arc<Tab>, hooks: PageHooks) -> anyhow::Result<()> {
    tab.enable_runtime()?;

    let diagnostics = hooks.diagnostics.clone();
    let network = hooks.network.clone();
    tab.add_event_listener(Arc::new(move |event: &Event| match event {
        Event::RuntimeConsoleAPICalled(called) => {
            let args = called.params.args.iter().map(console_arg).collect();
            diagnostics.on_console(ConsoleEvent::new(console_level(&called.params.Type), args));
        }
        Event::NetworkRequestWillBeSent(sent) => network.request_started(&sent.params.request_id),
        Event::NetworkLoadingFinished(done) => network.request_finished(&done.params.request_id),
        Event::NetworkLoadingFailed(failed) => {
            network.request_finished(&failed.params.request_id)
        }
        _ => {}
    }))?;

    // Also enables the network domain, which feeds the listener above
    let diagnostics = hooks.diagnostics.clone();
    tab.register_response_handling(
        RESPONSE_HANDLER,
        Box::new(
            move |params: ResponseReceivedEventParams,
                  fetch_body: &dyn Fn() -> anyhow::Result<GetResponseBodyReturnObject>| {
                let body_len = fetch_body()
                    .ok()
                    .map(|body| body_length(&body.body, body.base_64_encoded));
                diagnostics.on_response(ResponseEvent {
                    url: params.response.url.clone(),
                    status: params.response.status.into(),
                    body_len,
                });
            },
        ),
    )?;

    let delivery = hooks.delivery;
    tab.enable_fetch(None, None)?;
    tab.enable_request_interception(Arc::new(
        move |_transport: Arc<Transport>, _session: SessionId, paused: RequestPausedEvent| {
            decide(&delivery, paused)
        },
    ))?;

    Ok(())
}

fn decide(delivery: &AssetDelivery, paused: RequestPausedEvent) -> RequestPausedDecision {
    let params = paused.params;
    let respond = |code: u32, headers: Vec<HeaderEntry>, body: Option<String>| {
        RequestPausedDecision::Fulfill(FulfillRequest {
            request_id: params.request_id.clone(),
            response_code: code,
            response_headers: Some(headers),
            binary_response_headers: None,
            body,
            response_phrase: None,
        })
    };

    match delivery.intercept(&params.request.url) {
        Interception::PassThrough => RequestPausedDecision::Continue(None),
        Interception::Serve(asset) => respond(
            200,
            vec![header("Content-Type", asset.content_type().mime)],
            Some(base64::engine::general_purpose::STANDARD.encode(asset.bytes())),
        ),
        Interception::Redirect { location } => {
            respond(302, vec![header("Location", &location)], None)
        }
        Interception::Unavailable => respond(500, Vec::new(), None),
    }
}

fn header(name: &str, value: &str) -> HeaderEntry {
    HeaderEntry {
        name: name.to_owned(),
        value: value.to_owned(),
    }
}

/// Returns the decoded size of a response body as reported by the protocol,
/// without decoding it.
fn body_length(body: &str, base64_encoded: bool) -> u64 {
    if !base64_encoded {
        return body.len() as u64;
    }
    let body = body.trim_end();
    let padding = body.bytes().rev().take_while(|&b| b == b'=').count().min(2);
    ((body.len() / 4 * 3).saturating_sub(padding)) as u64
}

fn console_level(kind: &ConsoleAPICalledEventTypeOption) -> ConsoleLevel {
    match kind {
        ConsoleAPICalledEventTypeOption::Warning => ConsoleLevel::Warning,
        ConsoleAPICalledEventTypeOption::Error => ConsoleLevel::Error,
        ConsoleAPICalledEventTypeOption::Debug => ConsoleLevel::Debug,
        ConsoleAPICalledEventTypeOption::Info => ConsoleLevel::Info,
        _ => ConsoleLevel::Log,
    }
}

fn console_arg(object: &RemoteObject) -> ConsoleArg {
    if matches!(object.subtype, Some(RemoteObjectSubtype::Error)) {
        return ConsoleArg::Error {
            message: object.description.as_deref().map(error_message),
        };
    }
    match (&object.value, &object.description) {
        (Some(serde_json::Value::String(text)), _) => ConsoleArg::Text(text.clone()),
        (Some(value), _) => ConsoleArg::Text(value.to_string()),
        (None, Some(description)) => ConsoleArg::Text(description.clone()),
        (None, None) => ConsoleArg::Unresolved {
            kind: format!("{:?}", object.Type).to_lowercase(),
        },
    }
}

/// Extracts `message` from an error description such as
/// `"TypeError: x is not a function\n    at render (index.js:3:1)"`.
fn error_message(description: &str) -> String {
    let first_line = description.lines().next().unwrap_or_default();
    match first_line.split_once(": ") {
        Some((name, message)) if name.ends_with("Error") => message.to_owned(),
        _ => first_line.to_owned(),
    }
}

/// The harness page in a Chromium tab.
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn run<T, F>(&self, command: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || command(&tab)).await?
    }
}

#[async_trait]
impl HarnessPage for ChromePage {
    async fn add_init_script(&self, source: &str) -> Result<(), EngineError> {
        let source = source.to_owned();
        self.run(move |tab| {
            tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
                source,
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Script(e.to_string()))
    }

    async fn navigate(&self, url: &str, timeout: Option<Duration>) -> Result<(), EngineError> {
        let url = url.to_owned();
        self.run(move |tab| {
            tab.set_default_timeout(timeout.unwrap_or(UNBOUNDED));
            tab.navigate_to(&url)?.wait_until_navigated()?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Navigation(e.to_string()))
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, EngineError> {
        let expression = expression.to_owned();
        self.run(move |tab| {
            let result = tab.evaluate(&expression, true)?;
            Ok(result.value.unwrap_or(serde_json::Value::Null))
        })
        .await
        .map_err(|e| EngineError::Script(e.to_string()))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, EngineError> {
        self.run(|tab| {
            tab.call_method(Emulation::SetDefaultBackgroundColorOverride {
                color: Some(DOM::RGBA {
                    r: 0,
                    g: 0,
                    b: 0,
                    a: Some(0.0),
                }),
            })?;
            tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
        })
        .await
        .map_err(|e| EngineError::Capture(e.to_string()))
    }
}
