//! # Ferry Server
//!
//! Hosts published packages over plain HTTP GET, with byte ranges for
//! resumed downloads. Every file below the root is served as is, so a
//! package published to `{root}/{package}` is reachable at
//! `http://{addr}/{package}/{file}`.

use axum::{Router, routing::get};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

mod api;

pub mod state;

use state::AppState;

/// The builder for the package server.
#[derive(Clone, Debug)]
pub struct PackageServer {
    root: PathBuf,
}

impl PackageServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn build(self) -> Router {
        let state = AppState {
            root: Arc::new(self.root),
        };

        Router::new()
            .route("/health", get(|| async { "OK" }))
            .route("/{*path}", get(api::download_file))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

pub mod prelude {
    pub use crate::PackageServer;
    pub use crate::state::*;
}
