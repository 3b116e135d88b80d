//! Provides the error taxonomy for a capture and its exit codes.
//!
//! # Examples
//! ```
//! use glimpse_capture::error::CaptureError;
//!
//! assert_eq!(CaptureError::MissingInput.exit_code(), 2);
//! assert_eq!(CaptureError::MissingOutput.exit_code(), 3);
//! assert_eq!(CaptureError::TransparentOutput.exit_code(), 1);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineError;
use crate::formats::SniffError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Everything that can end (or, for [`CaptureError::RenderTimeout`], be
/// reported during) a capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No input model path was given.
    #[error("missing input model path")]
    MissingInput,

    /// No output preview path was given.
    #[error("missing output preview path")]
    MissingOutput,

    /// The harness document could not be loaded.
    #[error("Error happened while loading file {stage}: {message}")]
    Navigation { stage: String, message: String },

    /// The render-finished flag was not observed in time. Soft: logged, never
    /// returned from an attempt.
    #[error("Render timeout exceeded in file {stage} after {elapsed:?}")]
    RenderTimeout { stage: String, elapsed: Duration },

    /// Settling or polling failed, or the page reported an error.
    #[error("Error happened while rendering file {stage}: {message}")]
    FatalRender { stage: String, message: String },

    /// The page reported an error while the attempt ran. Same category as
    /// [`CaptureError::FatalRender`]; the message already names the stage.
    #[error("{message}")]
    PageError { message: String },

    /// The captured frame has no visible pixel.
    #[error("captured frame is fully transparent")]
    TransparentOutput,

    /// The model payload could not be identified.
    #[error("cannot identify model: {0}")]
    AssetSniff(#[from] SniffError),

    /// Removing a resource during teardown failed. Logged only.
    #[error("failed to clean up {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rendering engine could not be started or driven.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The serving endpoint could not be started.
    #[error("failed to start static server: {0}")]
    Server(#[source] std::io::Error),

    /// A file could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The captured frame could not be decoded or re-encoded.
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An interrupt signal arrived before the attempt finished.
    #[error("interrupted")]
    Interrupted,
}

impl CaptureError {
    /// Returns the process exit status for this outcome category.
    pub fn exit_code(&self) -> i32 {
        match self {
            CaptureError::MissingInput => 2,
            CaptureError::MissingOutput => 3,
            _ => 1,
        }
    }

    /// Wraps an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaptureError::Io {
            path: path.into(),
            source,
        }
    }
}
