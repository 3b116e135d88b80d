//! Provides an STL format sniffer for both the binary and ASCII flavors.
//!
//! Binary STL is an 80-byte header, a little-endian triangle count, and 50
//! bytes per triangle, so its size is fully determined by the count. Binary
//! headers are allowed to start with `solid`, which is why the size check runs
//! before the ASCII check.

use super::{ContentType, FormatSniffer, SniffError};

/// Content type of STL.
pub const STL: ContentType = ContentType::new("model/stl", "stl");

const HEADER_LEN: usize = 80;
const PREAMBLE_LEN: usize = HEADER_LEN + 4;
const TRIANGLE_LEN: u64 = 50;
const TEXT_SNIFF_LEN: usize = 1024;

pub struct StlSniffer;

/// Returns the triangle count when `data` has the exact size of a binary STL.
fn binary_triangle_count(data: &[u8]) -> Option<u32> {
    let count_bytes: [u8; 4] = data.get(HEADER_LEN..PREAMBLE_LEN)?.try_into().ok()?;
    let count = u32::from_le_bytes(count_bytes);
    let expected = PREAMBLE_LEN as u64 + u64::from(count) * TRIANGLE_LEN;
    (expected == data.len() as u64).then_some(count)
}

fn is_ascii_stl(data: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&data[..data.len().min(TEXT_SNIFF_LEN)]);
    let trimmed = head.trim_start();
    trimmed.starts_with("solid") && trimmed.contains("facet")
}

impl FormatSniffer for StlSniffer {
    fn name(&self) -> &'static str {
        "STL"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["stl"]
    }

    fn detect(&self, data: &[u8], _extension: Option<&str>) -> Option<ContentType> {
        if binary_triangle_count(data).is_some() || is_ascii_stl(data) {
            Some(STL)
        } else {
            None
        }
    }

    fn verify(&self, data: &[u8]) -> Result<(), SniffError> {
        if let Some(count) = binary_triangle_count(data) {
            return if count > 0 {
                Ok(())
            } else {
                Err(SniffError::invalid(self.name(), "no triangles"))
            };
        }

        if !String::from_utf8_lossy(data).contains("endsolid") {
            return Err(SniffError::invalid(self.name(), "missing endsolid"));
        }
        Ok(())
    }
}
