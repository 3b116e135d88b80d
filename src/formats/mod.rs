//! Provides content-type sniffing for model payloads.
//!
//! The harness always requests the model from one logical path, so the
//! payload's real format has to be identified from its bytes before it is
//! served. Each format implements [`FormatSniffer`]: a cheap detection step
//! (magic bytes, leading text) followed by a structural check.
//!
//! # Examples
//! ```
//! use glimpse_capture::formats;
//!
//! let sniffed = formats::sniff(b"solid cube\nfacet normal 0 0 1\nendsolid\n", None).unwrap();
//! assert_eq!(sniffed.mime, "model/stl");
//! assert!(formats::sniff(b"", Some("glb")).is_err());
//! ```

pub mod gltf;
pub mod obj;
pub mod ply;
pub mod stl;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::error::CaptureError;

/// A sniffed content type and the file extension that goes with it.
///
/// # Examples
/// ```
/// use glimpse_capture::formats::ContentType;
///
/// let glb = ContentType::new("model/gltf-binary", "glb");
/// assert_eq!(glb.extension, "glb");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentType {
    /// MIME type sent with the payload.
    pub mime: &'static str,
    /// Extension (without dot) used for redirected temporary files.
    pub extension: &'static str,
}

impl ContentType {
    /// Creates a content type.
    pub const fn new(mime: &'static str, extension: &'static str) -> Self {
        Self { mime, extension }
    }
}

/// Errors that can occur while identifying a payload.
///
/// # Examples
/// ```
/// use glimpse_capture::formats::SniffError;
///
/// assert_eq!(SniffError::Empty.to_string(), "model payload is empty");
/// ```
#[derive(Debug, Error)]
pub enum SniffError {
    /// The payload has no bytes.
    #[error("model payload is empty")]
    Empty,
    /// No sniffer recognized the payload.
    #[error("unrecognized model format")]
    Unrecognized,
    /// The payload looks like a known format but is malformed.
    #[error("invalid {format} data: {reason}")]
    Invalid { format: &'static str, reason: String },
}

impl SniffError {
    pub(crate) fn invalid(format: &'static str, reason: impl ToString) -> Self {
        SniffError::Invalid {
            format,
            reason: reason.to_string(),
        }
    }
}

/// A trait for format-specific sniffers.
///
/// # Examples
/// ```
/// use glimpse_capture::formats::{self, FormatSniffer};
///
/// let sniffer = formats::gltf::GltfSniffer;
/// assert_eq!(sniffer.name(), "glTF");
/// assert!(sniffer.detect(b"glTF\x02\x00\x00\x00", None).is_some());
/// ```
pub trait FormatSniffer: Send + Sync {
    /// Returns the human-readable name for this format.
    fn name(&self) -> &'static str;

    /// Returns the file extensions this sniffer claims (lowercase, without dot).
    fn extensions(&self) -> &'static [&'static str];

    /// Identifies the payload from its leading bytes.
    ///
    /// This should be a quick check without fully parsing the payload. The
    /// extension only breaks ties for formats without a magic number.
    fn detect(&self, data: &[u8], extension: Option<&str>) -> Option<ContentType>;

    /// Checks that a detected payload is structurally sound.
    ///
    /// # Errors
    /// Returns [`SniffError::Invalid`] if the payload is malformed.
    fn verify(&self, data: &[u8]) -> Result<(), SniffError>;
}

/// Returns all registered sniffers, most specific magic first.
///
/// # Examples
/// ```
/// use glimpse_capture::formats;
///
/// assert_eq!(formats::get_sniffers().len(), 4);
/// ```
pub fn get_sniffers() -> Vec<Box<dyn FormatSniffer>> {
    vec![
        Box::new(gltf::GltfSniffer),
        Box::new(ply::PlySniffer),
        Box::new(stl::StlSniffer),
        Box::new(obj::ObjSniffer),
    ]
}

/// Finds the sniffer that recognizes the payload, with its content type.
pub fn find_sniffer(
    data: &[u8],
    extension: Option<&str>,
) -> Option<(Box<dyn FormatSniffer>, ContentType)> {
    let mut sniffers = get_sniffers();
    let extension = extension.map(str::to_lowercase);

    // Prefer the sniffer that claims the extension, if it also accepts the bytes
    if let Some(ext) = extension.as_deref() {
        if let Some(idx) = sniffers
            .iter()
            .position(|s| s.extensions().contains(&ext) && s.detect(data, Some(ext)).is_some())
        {
            let sniffer = sniffers.swap_remove(idx);
            let content_type = sniffer.detect(data, Some(ext))?;
            return Some((sniffer, content_type));
        }
    }

    sniffers.into_iter().find_map(|sniffer| {
        let content_type = sniffer.detect(data, extension.as_deref())?;
        Some((sniffer, content_type))
    })
}

/// Identifies and verifies a payload.
///
/// # Errors
/// Returns [`SniffError`] if the payload is empty, unrecognized, or malformed.
pub fn sniff(data: &[u8], extension: Option<&str>) -> Result<ContentType, SniffError> {
    if data.is_empty() {
        return Err(SniffError::Empty);
    }
    let (sniffer, content_type) =
        find_sniffer(data, extension).ok_or(SniffError::Unrecognized)?;
    sniffer.verify(data)?;
    Ok(content_type)
}

/// The model payload: raw bytes and their sniffed content type.
///
/// Immutable once loaded; clones share the bytes.
///
/// # Examples
/// ```
/// use glimpse_capture::formats::ModelAsset;
///
/// let asset = ModelAsset::from_bytes(b"ply\nformat ascii 1.0\nend_header\n".to_vec(), None).unwrap();
/// assert_eq!(asset.content_type().mime, "application/ply");
/// assert_eq!(asset.len(), 32);
/// ```
#[derive(Debug, Clone)]
pub struct ModelAsset {
    bytes: Arc<[u8]>,
    content_type: ContentType,
}

impl ModelAsset {
    /// Sniffs `bytes` and wraps them as an asset.
    ///
    /// # Errors
    /// Returns [`CaptureError::AssetSniff`] if the payload cannot be identified.
    pub fn from_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<Self, CaptureError> {
        let content_type = sniff(&bytes, extension)?;
        Ok(Self {
            bytes: bytes.into(),
            content_type,
        })
    }

    /// Reads and sniffs the model at `path`.
    ///
    /// # Errors
    /// Returns [`CaptureError::Io`] if the file cannot be read, or
    /// [`CaptureError::AssetSniff`] if it cannot be identified.
    pub async fn load(path: &Path) -> Result<Self, CaptureError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase());
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CaptureError::io(path, e))?;
        Self::from_bytes(bytes, extension.as_deref())
    }

    /// Returns the payload bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the sniffed content type.
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Returns the payload size in bytes.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Returns `true` if the payload has no bytes. Never true for a sniffed asset.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
