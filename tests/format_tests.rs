//! Integration tests for model content-type sniffing.
//!
//! Payloads are synthesized in-process so no model files are needed.

mod common;

use glimpse_capture::error::CaptureError;
use glimpse_capture::formats::{self, ModelAsset, SniffError};

/// Binary STL with `triangles` zeroed facets and a header that mimics ASCII.
fn binary_stl(triangles: u32) -> Vec<u8> {
    let mut data = vec![0u8; 80];
    data[..5].copy_from_slice(b"solid");
    data.extend_from_slice(&triangles.to_le_bytes());
    data.resize(84 + 50 * triangles as usize, 0);
    data
}

const CUBE_OBJ: &str = "\
# cube corner
o corner
v 0 0 0
v 1 0 0
v 0 1 0
v 0 0 1
f 1 2 3
f 1 3 4
";

const ASCII_STL: &str = "\
solid tri
  facet normal 0 0 1
    outer loop
      vertex 0 0 0
      vertex 1 0 0
      vertex 0 1 0
    endloop
  endfacet
endsolid tri
";

const ASCII_PLY: &str = "\
ply
format ascii 1.0
element vertex 3
property float x
property float y
property float z
element face 1
property list uchar int vertex_indices
end_header
0 0 0
1 0 0
0 1 0
3 0 1 2
";

// ===========================================================================
// Sniffing
// ===========================================================================

#[test]
fn test_sniff_every_supported_format() {
    let cases: Vec<(Vec<u8>, &str, &str)> = vec![
        (common::glb_model(0), "model/gltf-binary", "glb"),
        (
            br#"{"asset":{"version":"2.0"}}"#.to_vec(),
            "model/gltf+json",
            "gltf",
        ),
        (CUBE_OBJ.as_bytes().to_vec(), "model/obj", "obj"),
        (ASCII_STL.as_bytes().to_vec(), "model/stl", "stl"),
        (binary_stl(2), "model/stl", "stl"),
        (ASCII_PLY.as_bytes().to_vec(), "application/ply", "ply"),
    ];

    for (data, mime, extension) in cases {
        let ty = formats::sniff(&data, None).unwrap_or_else(|e| panic!("{mime}: {e}"));
        assert_eq!(ty.mime, mime);
        assert_eq!(ty.extension, extension);
    }
}

#[test]
fn test_binary_stl_with_solid_header_is_not_ascii() {
    let ty = formats::sniff(&binary_stl(3), Some("stl")).unwrap();
    assert_eq!(ty.mime, "model/stl");
}

#[test]
fn test_extension_does_not_override_content() {
    // A GLB saved with the wrong extension is still served as GLB
    let ty = formats::sniff(&common::glb_model(16), Some("obj")).unwrap();
    assert_eq!(ty.mime, "model/gltf-binary");
}

#[test]
fn test_empty_payload() {
    assert!(matches!(formats::sniff(b"", Some("glb")), Err(SniffError::Empty)));
}

#[test]
fn test_unrecognized_payload() {
    let result = formats::sniff(b"PK\x03\x04 definitely a zip", None);
    assert!(matches!(result, Err(SniffError::Unrecognized)));
}

#[test]
fn test_truncated_glb_is_invalid() {
    let mut data = common::glb_model(64);
    data.truncate(30);
    assert!(matches!(
        formats::sniff(&data, Some("glb")),
        Err(SniffError::Invalid { format: "glTF", .. })
    ));
}

#[test]
fn test_glb_with_required_compression_extensions() {
    for extension in [
        "KHR_draco_mesh_compression",
        "EXT_meshopt_compression",
        "KHR_texture_basisu",
    ] {
        let json = format!(
            r#"{{"asset":{{"version":"2.0"}},"extensionsUsed":["{extension}"],"extensionsRequired":["{extension}"],"buffers":[{{"byteLength":32}}]}}"#
        );
        let data = common::glb_container(&json, 32);
        let ty = formats::sniff(&data, Some("glb")).unwrap_or_else(|e| panic!("{extension}: {e}"));
        assert_eq!(ty.mime, "model/gltf-binary");
    }
}

#[test]
fn test_obj_without_faces_is_rejected() {
    let points = "v 0 0 0\nv 1 1 1\n";
    assert!(formats::sniff(points.as_bytes(), Some("obj")).is_err());
}

// ===========================================================================
// ModelAsset loading
// ===========================================================================

#[tokio::test]
async fn test_load_model_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mesh.PLY");
    std::fs::write(&path, ASCII_PLY).unwrap();

    let asset = ModelAsset::load(&path).await.unwrap();
    assert_eq!(asset.content_type().mime, "application/ply");
    assert_eq!(asset.len(), ASCII_PLY.len() as u64);
    assert_eq!(asset.bytes(), ASCII_PLY.as_bytes());
}

#[tokio::test]
async fn test_load_zero_byte_model_fails_sniffing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.glb");
    std::fs::write(&path, b"").unwrap();

    let result = ModelAsset::load(&path).await;
    assert!(matches!(result, Err(CaptureError::AssetSniff(SniffError::Empty))));
}

#[tokio::test]
async fn test_load_missing_model_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = ModelAsset::load(&dir.path().join("absent.glb")).await;
    assert!(matches!(result, Err(CaptureError::Io { .. })));
}
