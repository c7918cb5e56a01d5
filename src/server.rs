use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::app::App;

pub type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct ServerState {
    pub app: Arc<App>,
    pub started: Instant,
}

pub fn router(app: Arc<App>) -> Router {
    let state = ServerState {
        app,
        started: Instant::now(),
    };
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/downloads/active", get(active_downloads))
        .with_state(state)
}

/// Serve the status endpoints until Ctrl+C / SIGTERM
pub async fn run(app: Arc<App>, address: SocketAddr) -> Result<(), AnyError> {
    let router = router(app);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "bulksync server listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": state.started.elapsed().as_secs(),
            "scheduled_products": state.app.scheduler.registration_count(),
        })),
    )
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.app.metrics.snapshot())
}

async fn active_downloads(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.app.downloader.active_downloads())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hooks::{TransportError, WebhookTransport};
    use crate::ledger::FjallStore;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct NullTransport;

    #[async_trait]
    impl WebhookTransport for NullTransport {
        async fn deliver(
            &self,
            _url: &str,
            _headers: &BTreeMap<String, String>,
            _body: Bytes,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn test_app(dir: &TempDir) -> Arc<App> {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        let store = Arc::new(FjallStore::open(config.storage.ledger_path()).unwrap());
        Arc::new(App::assemble(config, store, Vec::new(), Arc::new(NullTransport)).unwrap())
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let (status, body) = get_json(router(test_app(&dir)), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["scheduled_products"], 0);
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        app.metrics.download_started();

        let (status, body) = get_json(router(app), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["downloads_started"], 1);
    }

    #[tokio::test]
    async fn test_active_downloads_empty() {
        let dir = TempDir::new().unwrap();
        let (status, body) = get_json(router(test_app(&dir)), "/downloads/active").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }
}
