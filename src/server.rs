//! Provides the static content server the harness is loaded from.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::config::HARNESS_DOCUMENT;
use crate::error::CaptureError;

/// Serves `static_dir` on an ephemeral loopback port.
pub struct StaticServer {
    port: u16,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl StaticServer {
    /// Start serving `static_dir` on a random port.
    pub async fn start(static_dir: impl Into<PathBuf>) -> Result<Self, CaptureError> {
        let root = Arc::new(static_dir.into());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(CaptureError::Server)?;
        let port = listener.local_addr().map_err(CaptureError::Server)?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = Router::new().fallback(serve_file).with_state(root.clone());

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!(port, root = %root.display(), "static server listening");
        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Scheme, host and port, without a trailing slash.
    pub fn origin(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// URL of the harness document.
    pub fn harness_url(&self) -> String {
        format!("{}/{}", self.origin(), HARNESS_DOCUMENT)
    }

    /// Stop accepting connections. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            debug!(port = self.port, "static server stopped");
        }
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Maps a request path to a file under `root`; `None` for paths escaping it.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if request_path.ends_with('/') || resolved == root {
        resolved.push(HARNESS_DOCUMENT);
    }
    Some(resolved)
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("wasm") => "application/wasm",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("glb") => "model/gltf-binary",
        Some("gltf") => "model/gltf+json",
        Some("obj") => "model/obj",
        Some("stl") => "model/stl",
        Some("ply") => "application/ply",
        _ => "application/octet-stream",
    }
}

async fn serve_file(State(root): State<Arc<PathBuf>>, uri: Uri) -> Response {
    let Some(path) = resolve(&root, uri.path()) else {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(body) => {
            debug!(path = %path.display(), bytes = body.len(), "serving file");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type_for(&path))],
                body,
            )
                .into_response()
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "file not served");
            (StatusCode::NOT_FOUND, "not found").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_root_is_harness() {
        let root = Path::new("/srv/public");
        assert_eq!(
            resolve(root, "/").unwrap(),
            PathBuf::from("/srv/public/index.html")
        );
        assert_eq!(
            resolve(root, "/_assets/abc.glb").unwrap(),
            PathBuf::from("/srv/public/_assets/abc.glb")
        );
    }

    #[test]
    fn test_resolve_rejects_parent() {
        let root = Path::new("/srv/public");
        assert!(resolve(root, "/../secret").is_none());
        assert!(resolve(root, "/a/../../secret").is_none());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a.GLB")), "model/gltf-binary");
        assert_eq!(content_type_for(Path::new("main.mjs")), "text/javascript; charset=utf-8");
        assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
    }
}
