//! Operational HTTP server.
//!
//! Route set and graceful-shutdown wiring follow `HealthServer` exactly
//! (axum router, `TimeoutLayer`, `axum::serve(...).with_graceful_shutdown`
//! racing the `Signal` broadcast channel); the two liveness/readiness
//! routes are generalised into the full `/health`, `/status`, `/domains`,
//! `/domain/{name}`, `/refresh`, `/metrics`, `/metrics/reset` surface.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use domainwatch_common::Signal;
use domainwatch_metrics::Metrics;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::config::OpsConfig;
use crate::error::OpsError;
use crate::registry::RegistryView;

#[derive(Clone)]
struct AppState {
    registry: Arc<dyn RegistryView>,
    metrics: Arc<Metrics>,
}

pub struct OpsServer {
    listener: TcpListener,
    router: Router,
}

impl OpsServer {
    /// Binds and builds the ops server, unless `config.enabled` is `false`,
    /// in which case no listener is bound and `Ok(None)` is returned.
    ///
    /// # Errors
    /// Returns an error if binding to the configured address fails.
    pub async fn new(
        config: OpsConfig,
        registry: Arc<dyn RegistryView>,
        metrics: Arc<Metrics>,
    ) -> Result<Option<Self>, OpsError> {
        if !config.enabled {
            tracing::info!("ops server disabled, not binding");
            return Ok(None);
        }

        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| OpsError::BindError { address: config.listen_address.clone(), source: e })?;

        tracing::info!(address = %config.listen_address, "ops server bound");

        let state = AppState { registry, metrics };
        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .route("/domains", get(domains_handler))
            .route("/domain/{name}", get(domain_handler))
            .route("/refresh", post(refresh_handler))
            .route("/metrics", get(metrics_handler))
            .route("/metrics/reset", get(metrics_reset_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(5)));

        Ok(Some(Self { listener, router }))
    }

    /// # Errors
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(self, mut shutdown: tokio::sync::broadcast::Receiver<Signal>) -> Result<(), OpsError> {
        tracing::info!("ops server starting");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("ops server received shutdown signal");
            })
            .await
            .map_err(|e| OpsError::ServerError(e.to_string()))?;
        tracing::info!("ops server stopped");
        Ok(())
    }
}

async fn health_handler(State(state): State<AppState>) -> Response {
    if state.registry.is_alive() && state.registry.state_store_writable() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response()
    }
}

async fn status_handler(State(state): State<AppState>) -> Response {
    Json(state.registry.status()).into_response()
}

async fn domains_handler(State(state): State<AppState>) -> Response {
    Json(state.registry.list_domains()).into_response()
}

async fn domain_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.registry.domain(&name) {
        Some(detail) => Json(detail).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn refresh_handler(State(state): State<AppState>) -> Response {
    state.registry.refresh().await;
    StatusCode::ACCEPTED.into_response()
}

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    #[serde(default)]
    prefix: String,
}

async fn metrics_handler(State(state): State<AppState>, Query(query): Query<MetricsQuery>) -> Response {
    Json(state.metrics.snapshot(&query.prefix)).into_response()
}

async fn metrics_reset_handler(State(state): State<AppState>) -> Response {
    state.metrics.reset_all();
    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DomainDetail, DomainSummary, StatusSnapshot, VerdictCounts};
    use async_trait::async_trait;
    use domainwatch_common::VerdictStatus;

    struct FakeRegistry {
        alive: bool,
    }

    #[async_trait]
    impl RegistryView for FakeRegistry {
        fn is_alive(&self) -> bool {
            self.alive
        }

        fn state_store_writable(&self) -> bool {
            true
        }

        fn status(&self) -> StatusSnapshot {
            StatusSnapshot {
                uptime_secs: 10,
                domain_count: 1,
                by_verdict: VerdictCounts::default(),
                worker_count: 8,
                in_flight_count: 0,
            }
        }

        fn list_domains(&self) -> Vec<DomainSummary> {
            vec![DomainSummary {
                name: "example.com".into(),
                priority: false,
                last_verdict: VerdictStatus::Unknown,
                last_confidence: 0.0,
                next_check_at_secs: 0,
            }]
        }

        fn domain(&self, name: &str) -> Option<DomainDetail> {
            (name == "example.com").then(|| DomainDetail {
                name: name.to_string(),
                priority: false,
                last_verdict: VerdictStatus::Unknown,
                last_confidence: 0.0,
                consecutive_failures: 0,
                last_checked_at_secs: None,
                next_check_at_secs: 0,
            })
        }

        async fn refresh(&self) {}
    }

    #[tokio::test]
    async fn health_handler_reports_unavailable_when_not_alive() {
        let state = AppState { registry: Arc::new(FakeRegistry { alive: false }), metrics: Arc::new(Metrics::new()) };
        let resp = health_handler(State(state)).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn domain_handler_returns_404_for_unknown_domain() {
        let state = AppState { registry: Arc::new(FakeRegistry { alive: true }), metrics: Arc::new(Metrics::new()) };
        let resp = domain_handler(State(state), Path("nowhere.com".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn domain_handler_returns_detail_for_known_domain() {
        let state = AppState { registry: Arc::new(FakeRegistry { alive: true }), metrics: Arc::new(Metrics::new()) };
        let resp = domain_handler(State(state), Path("example.com".to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
