use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use relay_middleware::Transport;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::metrics::encode_metrics;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sources: Vec<String>,
    pub connected: bool,
}

/// Shared state for health endpoints
#[derive(Clone)]
pub struct ServerState {
    pub sources: Vec<String>,
    pub transport: Arc<dyn Transport>,
}

impl ServerState {
    pub fn new(sources: Vec<String>, transport: Arc<dyn Transport>) -> Self {
        Self { sources, transport }
    }
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sources: state.sources.clone(),
        connected: state.transport.is_connected(),
    })
}

/// Ready endpoint - returns 200 only while the transport is connected
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    let connected = state.transport.is_connected();
    let status_code = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if connected { "ready" } else { "not_ready" }.to_string(),
            sources: state.sources.clone(),
            connected,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Create the health server router
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server until `shutdown` flips to true
pub async fn run_server(
    addr: SocketAddr,
    state: ServerState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use bytes::Bytes;
    use relay_middleware::{InMemoryTransport, Subscription, TransportError};
    use tower::ServiceExt;

    struct DisconnectedTransport;

    #[async_trait]
    impl Transport for DisconnectedTransport {
        async fn publish(&self, _subject: &str, _payload: Bytes) -> Result<(), TransportError> {
            Err(TransportError::PublishFailed("disconnected".to_string()))
        }

        async fn publish_retained(&self, _subject: &str, _payload: Bytes) -> Result<(), TransportError> {
            Err(TransportError::PublishFailed("disconnected".to_string()))
        }

        async fn subscribe(&self, _subject: &str) -> Result<Box<dyn Subscription>, TransportError> {
            Err(TransportError::SubscribeFailed("disconnected".to_string()))
        }

        fn is_connected(&self) -> bool {
            false
        }
    }

    fn create_test_state(connected: bool) -> ServerState {
        let transport: Arc<dyn Transport> = if connected {
            Arc::new(InMemoryTransport::new())
        } else {
            Arc::new(DisconnectedTransport)
        };
        ServerState::new(vec!["fr24".to_string()], transport)
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let app = create_router(create_test_state(false));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_when_connected() {
        let app = create_router(create_test_state(true));

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_when_disconnected() {
        let app = create_router(create_test_state(false));

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_router(create_test_state(true));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
