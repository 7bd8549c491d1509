//! Replaceable sub-router for routes owned by sources.
//!
//! The main router is built once, but the set of source-owned routes changes
//! whenever the manager is reconfigured. The surface holds the current
//! sub-router behind a lock and the main router's fallback dispatches into it.

use std::sync::{Arc, RwLock};

use axum::{Router, extract::Request, response::Response};
use tower::ServiceExt;

#[derive(Clone, Default)]
pub struct RoutingSurface {
    current: Arc<RwLock<Router>>,
}

impl RoutingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every mounted route with `router`.
    pub fn replace(&self, router: Router) {
        *self
            .current
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = router;
    }

    /// Unmount everything; requests fall through to 404.
    pub fn clear(&self) {
        self.replace(Router::new());
    }

    /// Snapshot of the mounted routes.
    pub fn current(&self) -> Router {
        self.current
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Dispatch `request` to the mounted routes.
    pub async fn dispatch(&self, request: Request) -> Response {
        match self.current().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get};

    async fn status_of(surface: &RoutingSurface, uri: &str) -> StatusCode {
        surface
            .dispatch(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .status()
    }

    #[tokio::test]
    async fn replace_swaps_routes_wholesale() {
        let surface = RoutingSurface::new();
        assert_eq!(status_of(&surface, "/a").await, StatusCode::NOT_FOUND);

        surface.replace(Router::new().route("/a", get(|| async { "a" })));
        assert_eq!(status_of(&surface, "/a").await, StatusCode::OK);

        surface.replace(Router::new().route("/b", get(|| async { "b" })));
        assert_eq!(status_of(&surface, "/a").await, StatusCode::NOT_FOUND);
        assert_eq!(status_of(&surface, "/b").await, StatusCode::OK);

        surface.clear();
        assert_eq!(status_of(&surface, "/b").await, StatusCode::NOT_FOUND);
    }
}
