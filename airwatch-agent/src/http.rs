//! HTTP server for the metrics, health and status endpoints.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::error::AgentError;
use crate::exporter;
use crate::status::SharedState;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    agent: SharedState,
}

/// Create the HTTP router.
pub fn create_router(agent: SharedState, metrics_path: &str) -> Router {
    let state = AppState { agent };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let snapshot = state.agent.store().snapshot(started);
    let mut body = exporter::render(&snapshot);
    let measurement_time = started.elapsed();

    body.push_str(&exporter::render_agent(
        &state.agent.agent_metrics(started, measurement_time),
    ));
    debug!(kinds = snapshot.entries().len(), bytes = body.len(), "Metrics scraped");

    (
        StatusCode::OK,
        [("content-type", exporter::CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.agent.is_ready() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no sensor sampled yet\n",
        )
            .into_response()
    }
}

/// Handler for the /status endpoint.
async fn status_handler(State(state): State<AppState>) -> Response {
    Json(state.agent.status(Instant::now())).into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    agent: SharedState,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(agent: SharedState, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            agent,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listen address.
    pub async fn bind(&self) -> Result<tokio::net::TcpListener, AgentError> {
        tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|source| AgentError::Bind {
                addr: self.listen_addr,
                source,
            })
    }

    /// Serve on `listener` until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), AgentError> {
        let router = create_router(self.agent, &self.metrics_path);

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(AgentError::Serve)?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{AgentState, RuntimeStatus};
    use crate::store::{MetricsStore, SampleOutcome};
    use airwatch_common::{Field, Reading, SensorKind};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn make_state() -> SharedState {
        Arc::new(AgentState::new(
            Arc::new(MetricsStore::new()),
            Instant::now(),
        ))
    }

    fn record_bme680(state: &SharedState) {
        let now = Instant::now();
        state.store().update(
            SensorKind::Bme680,
            SampleOutcome::Success(Reading::new(
                SensorKind::Bme680,
                [
                    (Field::Temperature, 26.261),
                    (Field::Humidity, 47.443),
                    (Field::Pressure, 1010.372),
                    (Field::Gas, 107925.0),
                ],
                now,
            )),
            now,
        );
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = make_state();
        record_bme680(&state);
        let router = create_router(state, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("version=0.0.4"));

        let body = body_string(response).await;
        assert!(body.contains("sensor_temperature_celsius{sensor_type=\"bme680\"} 26.261"));
        assert!(body.contains("agent_uptime_seconds "));
        assert!(body.contains("agent_info{version=\""));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_empty_store() {
        let router = create_router(make_state(), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(!body.contains("sensor_type"));
        assert!(body.contains("agent_attached_sensors 0.000"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_state(), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "healthy\n");
    }

    #[tokio::test]
    async fn test_ready_endpoint_not_ready() {
        let router = create_router(make_state(), "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        // No sensor sampled yet
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_endpoint_ready() {
        let state = make_state();
        record_bme680(&state);
        let router = create_router(state, "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let state = make_state();
        record_bme680(&state);
        state.publish(RuntimeStatus::default());
        let router = create_router(state, "/metrics");

        let response = router
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let status: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(status["agent"], "airwatch-agent");
        assert_eq!(status["network"], "connected");
        assert_eq!(status["sensors"][0]["kind"], "bme680");
        assert_eq!(status["sensors"][0]["status"], "online");
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(make_state(), "/prometheus/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
