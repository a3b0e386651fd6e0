//! Compiled dashboard assets
//!
//! Files under the asset root are served as-is. Any other path answers with
//! the entry document so the browser-side router can resolve it.

use axum::body::Body;
use axum::http::{Request, Response};
use std::path::PathBuf;
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, warn};
use venue_gateway_common::constants::SPA_ENTRY_DOCUMENT;

#[derive(Debug, Clone)]
pub struct StaticAssets {
    root: PathBuf,
    service: ServeDir<ServeFile>,
}

impl StaticAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let entry = root.join(SPA_ENTRY_DOCUMENT);
        let service = ServeDir::new(&root)
            .append_index_html_on_directories(true)
            .fallback(ServeFile::new(entry));

        Self { root, service }
    }

    /// Whether the entry document exists; logs a warning when it does not
    pub fn check(&self) -> bool {
        let entry = self.root.join(SPA_ENTRY_DOCUMENT);
        if entry.is_file() {
            info!("Serving dashboard from {}", self.root.display());
            true
        } else if self.root.is_dir() {
            warn!(
                "Asset root {} has no {}; unknown paths will answer 404",
                self.root.display(),
                SPA_ENTRY_DOCUMENT
            );
            false
        } else {
            warn!(
                "Asset root {} does not exist; static requests will answer 404",
                self.root.display()
            );
            false
        }
    }

    /// Serve an asset, or the entry document for any miss
    pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
        match self.service.clone().oneshot(request).await {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        }
    }
}
