//! Provides a glTF/GLB format sniffer.
//!
//! Binary GLB is recognized by its magic bytes, JSON glTF by its leading
//! object containing an `"asset"` key. Both are verified by parsing the
//! container and document structure only: buffers and images are not
//! resolved, and required extensions are left for the harness to handle.
//!
//! # Examples
//! ```
//! use glimpse_capture::formats::{self, FormatSniffer};
//!
//! let sniffer = formats::gltf::GltfSniffer;
//! let ty = sniffer.detect(br#"{"asset":{"version":"2.0"}}"#, None).unwrap();
//! assert_eq!(ty.mime, "model/gltf+json");
//! ```

use super::{ContentType, FormatSniffer, SniffError};

/// Content type of binary glTF.
pub const GLB: ContentType = ContentType::new("model/gltf-binary", "glb");

/// Content type of JSON glTF.
pub const GLTF_JSON: ContentType = ContentType::new("model/gltf+json", "gltf");

const GLB_MAGIC: &[u8; 4] = b"glTF";

/// How far into a JSON payload the `"asset"` key is searched for.
const JSON_SNIFF_LEN: usize = 4096;

/// The glTF format sniffer.
pub struct GltfSniffer;

impl FormatSniffer for GltfSniffer {
    fn name(&self) -> &'static str {
        "glTF"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["gltf", "glb"]
    }

    fn detect(&self, data: &[u8], _extension: Option<&str>) -> Option<ContentType> {
        if data.starts_with(GLB_MAGIC) {
            return Some(GLB);
        }

        let head = String::from_utf8_lossy(&data[..data.len().min(JSON_SNIFF_LEN)]);
        let trimmed = head.trim_start_matches('\u{feff}').trim_start();
        if trimmed.starts_with('{') && trimmed.contains("\"asset\"") {
            return Some(GLTF_JSON);
        }

        None
    }

    fn verify(&self, data: &[u8]) -> Result<(), SniffError> {
        // Full validation rejects extensions such as Draco or meshopt
        ::gltf::Gltf::from_slice_without_validation(data)
            .map(|_| ())
            .map_err(|e| SniffError::invalid(self.name(), e))
    }
}
