//! Provides the completion protocol: the state machine that decides when the
//! harness has drawn a frame worth capturing.
//!
//! The renderer cannot be instrumented directly, so completion is inferred:
//!
//! ```text
//! Init -> Loading -> NetworkSettling -> RenderSignaled -> Polling -> Captured -> Done
//!            \______________\__________________\______________\________-> Failed
//! ```
//!
//! * `Loading`: register the optional injection script, navigate to the
//!   harness, and wait for a short zero-in-flight window. Any failure here is
//!   a navigation error.
//! * `NetworkSettling`: run the optional preparation script, wait for the
//!   network to stay idle for the configured period, then wait a settle delay
//!   proportional to the bytes transferred, since parse time scales with the
//!   payload and cannot be observed from outside.
//! * `RenderSignaled`: set the render-started flag.
//! * `Polling`: read the render-finished flag every 10 ms. A render timeout is
//!   soft (some scenes never signal); any other polling error is fatal.
//! * `Captured`: take the frame, then fail if the page reported an error.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capture::CapturedFrame;
use crate::config::{
    CaptureConfig, BYTES_PER_MEGABYTE, NAVIGATION_IDLE, RENDER_FINISHED_FLAG,
    RENDER_POLL_INTERVAL, RENDER_STARTED_FLAG,
};
use crate::diagnostics::DiagnosticAggregator;
use crate::engine::{EngineError, HarnessPage};
use crate::error::CaptureError;
use crate::network::{NetworkMonitor, TransferCounter};

/// States of one render attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Init,
    Loading,
    NetworkSettling,
    RenderSignaled,
    Polling,
    Captured,
    Done,
    Failed,
}

/// Result of waiting on a page flag.
#[derive(Debug)]
pub enum PollOutcome {
    /// The flag was observed set.
    Signaled,
    /// The bound elapsed first.
    TimedOut(Duration),
    /// Reading the flag failed.
    Failed(EngineError),
}

/// Timing knobs of an attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptTiming {
    pub idle: Duration,
    pub settle_per_megabyte: Duration,
    pub network_timeout: Option<Duration>,
    pub render_timeout: Option<Duration>,
}

impl AttemptTiming {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            idle: config.idle_time(),
            settle_per_megabyte: config.settle_per_megabyte(),
            network_timeout: config.network_timeout(),
            render_timeout: config.render_timeout(),
        }
    }
}

/// Returns the pause before signalling the render: `per_megabyte` for every
/// megabyte transferred, pro rata.
///
/// # Examples
/// ```
/// use std::time::Duration;
///
/// use glimpse_capture::protocol::settle_delay;
///
/// let per_mb = Duration::from_secs(6);
/// assert_eq!(settle_delay(0, per_mb), Duration::ZERO);
/// assert_eq!(settle_delay(512 * 1024, per_mb), Duration::from_secs(3));
/// assert_eq!(settle_delay(10 * 1024 * 1024, per_mb), Duration::from_secs(60));
/// ```
pub fn settle_delay(transferred: u64, per_megabyte: Duration) -> Duration {
    let megabytes = transferred as f64 / BYTES_PER_MEGABYTE as f64;
    Duration::try_from_secs_f64(per_megabyte.as_secs_f64() * megabytes).unwrap_or(Duration::MAX)
}

/// Reads `expression` every `interval` until it evaluates to `true`.
///
/// `timeout` of `None` never gives up. The bound is checked before each read.
pub async fn poll_flag(
    page: &dyn HarnessPage,
    expression: &str,
    interval: Duration,
    timeout: Option<Duration>,
) -> PollOutcome {
    let started = Instant::now();
    loop {
        let elapsed = started.elapsed();
        if timeout.is_some_and(|limit| elapsed > limit) {
            return PollOutcome::TimedOut(elapsed);
        }

        match page.evaluate(expression).await {
            Ok(serde_json::Value::Bool(true)) => return PollOutcome::Signaled,
            Ok(_) => {}
            Err(e) => return PollOutcome::Failed(e),
        }

        tokio::time::sleep(interval).await;
    }
}

/// One pass through the completion protocol.
pub struct RenderAttempt<'a> {
    page: &'a dyn HarnessPage,
    diagnostics: &'a DiagnosticAggregator,
    network: &'a NetworkMonitor,
    transfer: &'a TransferCounter,
    timing: AttemptTiming,
    harness_url: String,
    stage: String,
    prepare_script: Option<String>,
    inject_script: Option<String>,
    state: AttemptState,
}

impl<'a> RenderAttempt<'a> {
    /// Creates an attempt that loads `harness_url` in `page`; diagnostics
    /// are labelled with `stage`.
    pub fn new(
        page: &'a dyn HarnessPage,
        diagnostics: &'a DiagnosticAggregator,
        network: &'a NetworkMonitor,
        transfer: &'a TransferCounter,
        timing: AttemptTiming,
        harness_url: impl Into<String>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            page,
            diagnostics,
            network,
            transfer,
            timing,
            harness_url: harness_url.into(),
            stage: stage.into(),
            prepare_script: None,
            inject_script: None,
            state: AttemptState::Init,
        }
    }

    /// Evaluates `script` in the harness once it has loaded.
    pub fn with_prepare_script(mut self, script: impl Into<String>) -> Self {
        self.prepare_script = Some(script.into());
        self
    }

    /// Runs `script` in every document ahead of the harness's own scripts.
    pub fn with_inject_script(mut self, script: impl Into<String>) -> Self {
        self.inject_script = Some(script.into());
        self
    }

    /// Returns the current state.
    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Runs the protocol up to `Captured`.
    ///
    /// # Errors
    /// Returns [`CaptureError::Navigation`] for loading failures,
    /// [`CaptureError::FatalRender`] for settling/polling/capture failures, and
    /// [`CaptureError::PageError`] when the page reported an error.
    pub async fn run(&mut self) -> Result<CapturedFrame, CaptureError> {
        if self.state != AttemptState::Init {
            return Err(self.fatal("attempt already ran"));
        }
        self.diagnostics.begin_attempt(&self.stage);
        self.transfer.reset();

        let result = self.drive().await;
        if result.is_err() {
            self.advance(AttemptState::Failed);
        }
        result
    }

    /// Records the outcome of post-processing the captured frame.
    pub fn finish(&mut self, succeeded: bool) {
        if self.state == AttemptState::Captured {
            self.advance(if succeeded {
                AttemptState::Done
            } else {
                AttemptState::Failed
            });
        }
    }

    async fn drive(&mut self) -> Result<CapturedFrame, CaptureError> {
        let timing = self.timing;

        self.advance(AttemptState::Loading);
        if let Some(script) = &self.inject_script {
            self.page
                .add_init_script(script)
                .await
                .map_err(|e| self.navigation(e))?;
        }
        self.page
            .navigate(&self.harness_url, timing.network_timeout)
            .await
            .map_err(|e| self.navigation(e))?;
        self.network
            .wait_for_idle(NAVIGATION_IDLE, timing.network_timeout)
            .await
            .map_err(|e| self.navigation(e))?;

        self.advance(AttemptState::NetworkSettling);
        if let Some(script) = &self.prepare_script {
            self.page
                .evaluate(script)
                .await
                .map_err(|e| self.fatal(e))?;
        }
        self.network
            .wait_for_idle(timing.idle, timing.network_timeout)
            .await
            .map_err(|e| self.fatal(e))?;

        let transferred = self.transfer.total();
        let delay = settle_delay(transferred, timing.settle_per_megabyte);
        debug!(transferred, ?delay, "settling before render");
        tokio::time::sleep(delay).await;

        self.page
            .evaluate(&format!("window.{RENDER_STARTED_FLAG} = true"))
            .await
            .map_err(|e| self.fatal(e))?;
        self.advance(AttemptState::RenderSignaled);

        self.advance(AttemptState::Polling);
        let finished = format!("window.{RENDER_FINISHED_FLAG} === true");
        match poll_flag(self.page, &finished, RENDER_POLL_INTERVAL, timing.render_timeout).await {
            PollOutcome::Signaled => debug!("render finished"),
            PollOutcome::TimedOut(elapsed) => {
                // Scenes without a frame loop never signal; capture what is there
                let soft = CaptureError::RenderTimeout {
                    stage: self.stage.clone(),
                    elapsed,
                };
                warn!("{soft}");
            }
            PollOutcome::Failed(e) => return Err(self.fatal(e)),
        }

        let png = self.page.screenshot().await.map_err(|e| self.fatal(e))?;
        self.advance(AttemptState::Captured);

        if let Some(error) = self.diagnostics.terminal_error() {
            return Err(CaptureError::PageError {
                message: error.text,
            });
        }

        Ok(CapturedFrame::new(png))
    }

    fn advance(&mut self, next: AttemptState) {
        debug!(from = ?self.state, to = ?next, stage = %self.stage, "attempt transition");
        if next == AttemptState::Captured {
            info!(stage = %self.stage, "frame captured");
        }
        self.state = next;
    }

    fn navigation(&self, error: impl ToString) -> CaptureError {
        CaptureError::Navigation {
            stage: self.stage.clone(),
            message: error.to_string(),
        }
    }

    fn fatal(&self, error: impl ToString) -> CaptureError {
        CaptureError::FatalRender {
            stage: self.stage.clone(),
            message: error.to_string(),
        }
    }
}
