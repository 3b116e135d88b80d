//! Provides the diagnostic aggregator: it turns console output and response
//! completions from the rendering context into deduplicated, classified
//! messages, and keeps the attempt's terminal error.
//!
//! Console handling, in order:
//! 1. only `warning` and `error` calls are considered;
//! 2. arguments are resolved to text, with a `JSHandle@<kind>` placeholder for
//!    anything that could not be resolved;
//! 3. the text is trimmed and empty messages dropped;
//! 4. `[.WebGL-<id>] ` markers are stripped and the stage label prefixed;
//! 5. an opaque error handle becomes `Unknown error`;
//! 6. camera/webcam access denials are dropped;
//! 7. repeats of an exact text are dropped for the rest of the session;
//! 8. warnings are logged, the first error becomes the terminal error.
//!
//! # Examples
//! ```
//! use glimpse_capture::diagnostics::{ConsoleArg, ConsoleEvent, ConsoleLevel, DiagnosticAggregator};
//! use glimpse_capture::network::TransferCounter;
//!
//! let aggregator = DiagnosticAggregator::new(TransferCounter::default(), "http://127.0.0.1:1/models/model.glb");
//! aggregator.begin_attempt("index");
//! aggregator.on_console(ConsoleEvent::new(ConsoleLevel::Error, vec![ConsoleArg::text("[.WebGL-0x1] GL_INVALID_OPERATION")]));
//! assert_eq!(aggregator.terminal_error().unwrap().text, "index: GL_INVALID_OPERATION");
//! ```

use std::collections::HashSet;
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, warn};

use crate::network::TransferCounter;

/// Text substituted for an error object whose message could not be read.
pub const UNKNOWN_ERROR: &str = "Unknown error";

const OPAQUE_ERROR_HANDLE: &str = "JSHandle@error";
const CAMERA_DENIED: &str = "Unable to access the camera/webcam";

fn webgl_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"\[\.WebGL-(.+?)\] ").expect("WebGL marker regex compiles"))
}

/// Level of a console call in the rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warning,
    Error,
}

/// Severity of a retained diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl ConsoleLevel {
    fn severity(self) -> Option<Severity> {
        match self {
            ConsoleLevel::Warning => Some(Severity::Warning),
            ConsoleLevel::Error => Some(Severity::Error),
            _ => None,
        }
    }
}

/// One console argument as the engine binding could resolve it.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleArg {
    /// A primitive or serializable value, already rendered as text.
    Text(String),
    /// An `Error` instance; `message` is `None` when it could not be read.
    Error { message: Option<String> },
    /// A handle whose value could not be resolved (e.g. its context is gone).
    Unresolved { kind: String },
}

impl ConsoleArg {
    /// Shorthand for [`ConsoleArg::Text`].
    pub fn text(value: impl Into<String>) -> Self {
        ConsoleArg::Text(value.into())
    }

    fn resolve(&self) -> String {
        match self {
            ConsoleArg::Text(text) => text.clone(),
            ConsoleArg::Error {
                message: Some(message),
            } => message.clone(),
            ConsoleArg::Error { message: None } => OPAQUE_ERROR_HANDLE.to_owned(),
            ConsoleArg::Unresolved { kind } => format!("JSHandle@{kind}"),
        }
    }
}

/// A console call observed in the rendering context.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleEvent {
    pub level: ConsoleLevel,
    pub args: Vec<ConsoleArg>,
}

impl ConsoleEvent {
    pub fn new(level: ConsoleLevel, args: Vec<ConsoleArg>) -> Self {
        Self { level, args }
    }
}

/// A response completion observed in the rendering context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEvent {
    pub url: String,
    pub status: u32,
    /// Decoded body length, `None` if the body could not be fetched.
    pub body_len: Option<u64>,
}

/// A retained diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    /// Normalized text, prefixed with the stage label.
    pub text: String,
    pub severity: Severity,
    /// Label of the attempt stage that produced it.
    pub stage: String,
}

/// Insertion-ordered set of diagnostic texts seen in a session.
#[derive(Debug, Default)]
pub struct DiagnosticCache {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl DiagnosticCache {
    /// Records `text`; returns `false` if it was already present.
    pub fn insert(&mut self, text: &str) -> bool {
        if !self.seen.insert(text.to_owned()) {
            return false;
        }
        self.order.push(text.to_owned());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates texts in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// Normalizes raw console text for `stage`; `None` if it should be dropped.
///
/// # Examples
/// ```
/// use glimpse_capture::diagnostics::normalize;
///
/// assert_eq!(normalize("  JSHandle@error ", "index").as_deref(), Some("index: Unknown error"));
/// assert_eq!(normalize("   ", "index"), None);
/// ```
pub fn normalize(raw: &str, stage: &str) -> Option<String> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    let stripped = webgl_marker().replace_all(text, "");
    let body = if stripped == OPAQUE_ERROR_HANDLE {
        UNKNOWN_ERROR
    } else {
        stripped.as_ref()
    };

    if body.contains(CAMERA_DENIED) {
        return None;
    }

    Some(format!("{stage}: {body}"))
}

struct AggregatorState {
    stage: Option<String>,
    cache: DiagnosticCache,
    terminal: Option<DiagnosticMessage>,
}

/// Collects diagnostics for one render session.
pub struct DiagnosticAggregator {
    state: Mutex<AggregatorState>,
    transfer: TransferCounter,
    model_url: String,
}

impl DiagnosticAggregator {
    /// Creates an aggregator that sizes responses into `transfer`, skipping
    /// `model_url` (the delivery layer counts the payload itself).
    pub fn new(transfer: TransferCounter, model_url: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(AggregatorState {
                stage: None,
                cache: DiagnosticCache::default(),
                terminal: None,
            }),
            transfer,
            model_url: model_url.into(),
        }
    }

    /// Starts collecting for the stage `label` and clears the terminal error.
    /// The cache keeps what earlier attempts saw.
    pub fn begin_attempt(&self, label: &str) {
        let mut state = self.state.lock();
        state.stage = Some(label.to_owned());
        state.terminal = None;
    }

    /// Classifies a console call; returns the message if it was retained.
    pub fn on_console(&self, event: ConsoleEvent) -> Option<DiagnosticMessage> {
        let severity = event.level.severity()?;

        let raw = event
            .args
            .iter()
            .map(ConsoleArg::resolve)
            .collect::<Vec<_>>()
            .join(" ");

        let mut state = self.state.lock();
        // Output before an attempt starts has no stage to blame
        let stage = state.stage.clone()?;
        let text = normalize(&raw, &stage)?;

        if !state.cache.insert(&text) {
            return None;
        }

        let message = DiagnosticMessage {
            text,
            severity,
            stage,
        };

        match severity {
            Severity::Warning => warn!("{}", message.text),
            Severity::Error if state.terminal.is_none() => {
                debug!(text = %message.text, "page error recorded");
                state.terminal = Some(message.clone());
            }
            Severity::Error => {
                debug!(text = %message.text, "page error after the first one");
            }
        }

        Some(message)
    }

    /// Records a failure raised outside the page (e.g. while staging the
    /// model) as an error diagnostic of the current stage.
    pub fn report_fatal(&self, text: &str) {
        let mut state = self.state.lock();
        let stage = state.stage.clone().unwrap_or_else(|| "session".to_owned());
        let text = format!("{stage}: {text}");
        if !state.cache.insert(&text) {
            return;
        }
        if state.terminal.is_none() {
            state.terminal = Some(DiagnosticMessage {
                text,
                severity: Severity::Error,
                stage,
            });
        }
    }

    /// Sizes a response completion into the transferred-bytes counter.
    pub fn on_response(&self, event: ResponseEvent) {
        if event.status != 200 {
            debug!(url = %event.url, status = event.status, "response not counted");
            return;
        }
        if event.url == self.model_url {
            return;
        }
        match event.body_len {
            Some(len) => self.transfer.add(len),
            None => debug!(url = %event.url, "response body unavailable"),
        }
    }

    /// Returns the attempt's terminal error, if one was recorded.
    pub fn terminal_error(&self) -> Option<DiagnosticMessage> {
        self.state.lock().terminal.clone()
    }

    /// Returns every distinct text seen this session, in first-seen order.
    pub fn messages(&self) -> Vec<String> {
        self.state.lock().cache.iter().map(str::to_owned).collect()
    }
}
