//! Provides a PLY (Stanford polygon) format sniffer.

use super::{ContentType, FormatSniffer, SniffError};

/// Content type of PLY.
pub const PLY: ContentType = ContentType::new("application/ply", "ply");

/// Headers longer than this are treated as malformed.
const MAX_HEADER_LEN: usize = 64 * 1024;

pub struct PlySniffer;

impl FormatSniffer for PlySniffer {
    fn name(&self) -> &'static str {
        "PLY"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ply"]
    }

    fn detect(&self, data: &[u8], _extension: Option<&str>) -> Option<ContentType> {
        (data.starts_with(b"ply\n") || data.starts_with(b"ply\r\n")).then_some(PLY)
    }

    fn verify(&self, data: &[u8]) -> Result<(), SniffError> {
        let header = String::from_utf8_lossy(&data[..data.len().min(MAX_HEADER_LEN)]);
        let mut has_format = false;
        for line in header.lines().skip(1) {
            let line = line.trim();
            if line.starts_with("format ") {
                has_format = true;
            } else if line == "end_header" {
                return if has_format {
                    Ok(())
                } else {
                    Err(SniffError::invalid(self.name(), "missing format line"))
                };
            }
        }
        Err(SniffError::invalid(self.name(), "missing end_header"))
    }
}
