//! Provides a Wavefront OBJ format sniffer.
//!
//! OBJ has no magic number; a payload is taken as OBJ when its leading text
//! contains both vertex (`v`) and face (`f`) statements, and verified by
//! parsing it with `obj-rs`.

use std::io::{BufReader, Cursor};

use ::obj::raw::parse_obj;

use super::{ContentType, FormatSniffer, SniffError};

/// Content type of Wavefront OBJ.
pub const OBJ: ContentType = ContentType::new("model/obj", "obj");

const TEXT_SNIFF_LEN: usize = 4000;

pub struct ObjSniffer;

impl FormatSniffer for ObjSniffer {
    fn name(&self) -> &'static str {
        "Wavefront OBJ"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["obj"]
    }

    fn detect(&self, data: &[u8], _extension: Option<&str>) -> Option<ContentType> {
        let sample = &data[..data.len().min(TEXT_SNIFF_LEN)];
        // A multi-byte character may straddle the sample boundary
        let text = match std::str::from_utf8(sample) {
            Ok(text) => text,
            Err(e) => std::str::from_utf8(&sample[..e.valid_up_to()]).ok()?,
        };

        let mut has_vertex = false;
        let mut has_face = false;
        for line in text.lines() {
            let trimmed = line.trim();
            has_vertex |= trimmed.starts_with("v ");
            has_face |= trimmed.starts_with("f ");
            if has_vertex && has_face {
                return Some(OBJ);
            }
        }

        None
    }

    fn verify(&self, data: &[u8]) -> Result<(), SniffError> {
        let raw = parse_obj(BufReader::new(Cursor::new(data)))
            .map_err(|e| SniffError::invalid(self.name(), e))?;
        if raw.positions.is_empty() || raw.polygons.is_empty() {
            return Err(SniffError::invalid(self.name(), "no geometry"));
        }
        Ok(())
    }
}
