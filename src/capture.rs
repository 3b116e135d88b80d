//! Provides the capture and post-processing pipeline.
//!
//! A [`CapturedFrame`] holds the PNG the engine produced at viewport
//! resolution. [`process_frame`] optionally rejects frames with no visible
//! content, then resamples the frame to the exact output size and re-encodes
//! it as PNG, whatever the source aspect ratio or capture scale.
//!
//! # Examples
//! ```
//! use std::io::Cursor;
//!
//! use glimpse_capture::capture::process_frame;
//! use image::{ImageFormat, Rgba, RgbaImage};
//!
//! let frame = RgbaImage::from_pixel(800, 600, Rgba([200, 10, 10, 255]));
//! let mut png = Vec::new();
//! frame.write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();
//!
//! let out = process_frame(&png, 400, 400, true).unwrap();
//! let decoded = image::load_from_memory(&out).unwrap();
//! assert_eq!((decoded.width(), decoded.height()), (400, 400));
//! ```

use std::io::Cursor;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use tracing::debug;

use crate::error::CaptureError;

/// A raw frame as returned by the engine.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    png: Vec<u8>,
}

impl CapturedFrame {
    pub fn new(png: Vec<u8>) -> Self {
        Self { png }
    }

    pub fn png(&self) -> &[u8] {
        &self.png
    }

    /// Processes the frame and writes the artifact to `output`.
    pub async fn write_artifact(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        strict_transparency: bool,
    ) -> Result<(), CaptureError> {
        let artifact = process_frame(&self.png, width, height, strict_transparency)?;
        tokio::fs::write(output, artifact)
            .await
            .map_err(|e| CaptureError::io(output, e))
    }
}

/// Fails with [`CaptureError::TransparentOutput`] unless some pixel has both
/// alpha and colour.
pub fn ensure_visible(frame: &RgbaImage) -> Result<(), CaptureError> {
    let visible = frame
        .pixels()
        .any(|p| p[3] != 0 && (p[0] != 0 || p[1] != 0 || p[2] != 0));
    if visible {
        Ok(())
    } else {
        Err(CaptureError::TransparentOutput)
    }
}

/// Decodes `png`, resizes it to `width` x `height` and re-encodes it as PNG.
pub fn process_frame(
    png: &[u8],
    width: u32,
    height: u32,
    strict_transparency: bool,
) -> Result<Vec<u8>, CaptureError> {
    let frame = image::load_from_memory_with_format(png, ImageFormat::Png)?.to_rgba8();
    debug!(
        from_width = frame.width(),
        from_height = frame.height(),
        width,
        height,
        "processing frame"
    );

    if strict_transparency {
        ensure_visible(&frame)?;
    }

    let resized = if frame.dimensions() == (width, height) {
        frame
    } else {
        imageops::resize(&frame, width, height, FilterType::Lanczos3)
    };

    let mut out = Vec::new();
    resized.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}
