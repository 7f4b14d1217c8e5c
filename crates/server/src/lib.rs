// crates/server/src/lib.rs
//! Bidsify server library.
//!
//! Axum-based HTTP and WebSocket front end for the BIDS conversion tool. It
//! runs tool invocations as background jobs, streams their output live to any
//! number of observers, and serves the result files they produce.

pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::{Cli, ServerConfig};
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs, log streaming, blocking runs, metrics)
/// - Static web UI from `static_dir`, when given
/// - CORS for the web UI (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = api_routes(state);

    if let Some(dir) = static_dir {
        tracing::info!(path = %dir.display(), "Serving web UI");
        let index = dir.join("index.html");
        app = app.fallback_service(ServeDir::new(&dir).fallback(ServeFile::new(index)));
    }

    app.layer(cors).layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use bidsify_core::ToolLocator;
    use tower::ServiceExt;

    fn test_app() -> Router {
        create_app(AppState::with_tool(ToolLocator::default()), None)
    }

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = get(test_app(), "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
        assert!(body.contains("\"version\""));
        assert!(body.contains("\"jobs\":0"));
    }

    #[tokio::test]
    async fn test_ping_endpoint() {
        let (status, body) = get(test_app(), "/api/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_jobs_list_starts_empty() {
        let (status, body) = get(test_app(), "/api/jobs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"jobs":[]}"#);
    }

    #[tokio::test]
    async fn test_unknown_route_without_static_dir_is_404() {
        let (status, _) = get(test_app(), "/index.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_dir_served_with_index_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>bidsify</h1>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();

        let state = AppState::with_tool(ToolLocator::default());
        let app = create_app(state, Some(dir.path().to_path_buf()));

        let (status, body) = get(app.clone(), "/app.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "console.log(1)");

        let (status, body) = get(app.clone(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("bidsify"));

        // API routes win over the static fallback
        let (status, _) = get(app, "/api/ping").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_headers_present() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/ping")
                    .header("origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
    }
}
