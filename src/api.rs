//! HTTP server for health and metrics endpoints
//!
//! - GET /health - relayed chains and uptime (JSON)
//! - GET /metrics - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tracing::info;

use crate::metrics;
use crate::types::ChainId;

#[derive(Clone)]
pub struct ApiState {
    chains: Arc<Vec<ChainId>>,
    started_at: Instant,
}

impl ApiState {
    pub fn new(chains: Vec<ChainId>) -> Self {
        Self {
            chains: Arc::new(chains),
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub chains: Vec<ChainId>,
    pub uptime_seconds: u64,
}

async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        chains: state.chains.as_ref().clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve the API until the process exits
pub async fn start_api_server(addr: SocketAddr, state: ApiState) -> eyre::Result<()> {
    metrics::UP.set(1.0);

    info!("API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_chains() {
        let state = ApiState::new(vec![1, 2]);
        let Json(health) = health_check(State(state)).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.chains, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_text() {
        metrics::record_deposit_detected(9);
        let response = prometheus_metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .is_some_and(|v| v.to_str().unwrap_or_default().starts_with("text/plain")));
    }

    #[tokio::test]
    async fn test_serves_health_over_http() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(ApiState::new(vec![3]))).await.unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();

        assert!(body.starts_with("HTTP/1.1 200"));
        let json = body.split("\r\n\r\n").nth(1).unwrap();
        let health: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["chains"], serde_json::json!([3]));
    }
}
