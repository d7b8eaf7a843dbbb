//! HTTP gateway exposing Prometheus metrics and a health probe.

use crate::metrics::BrokerMetrics;
use crate::server::Gateway;
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct MetricsGateway {
    addr: String,
    metrics: Arc<BrokerMetrics>,
    shutdown: Arc<Notify>,
}

impl MetricsGateway {
    pub fn new(host: &str, port: u16, metrics: Arc<BrokerMetrics>) -> Self {
        MetricsGateway {
            addr: format!("{}:{}", host, port),
            metrics,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn router(metrics: Arc<BrokerMetrics>) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(metrics)
    }
}

#[async_trait]
impl Gateway for MetricsGateway {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn start(&self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("Metrics gateway listening on {}", self.addr);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, Self::router(self.metrics.clone()))
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.notify_one();
        Ok(())
    }
}

async fn metrics_handler(State(metrics): State<Arc<BrokerMetrics>>) -> (StatusCode, String) {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_handler_renders_registry() {
        let metrics = Arc::new(BrokerMetrics::new().unwrap());
        metrics.tasks_expired.inc();

        let (status, body) = metrics_handler(State(metrics)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("gork_tasks_expired_total 1"));
    }

    #[tokio::test]
    async fn test_health_handler() {
        let Json(body) = health_handler().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_gateway_stops_on_request() {
        let metrics = Arc::new(BrokerMetrics::new().unwrap());
        let gateway = Arc::new(MetricsGateway::new("127.0.0.1", 0, metrics));

        let running = gateway.clone();
        let handle = tokio::spawn(async move { running.start().await });
        gateway.stop().await.unwrap();

        handle.await.unwrap().unwrap();
    }
}
