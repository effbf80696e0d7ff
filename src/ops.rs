// ============================================================================
// Ops HTTP endpoint
// ============================================================================
//
// GET /health   readiness of every registered dependency, plus gateway stats
//               and the state of dependencies that never fail readiness
// GET /metrics  Prometheus text exposition
//
// ============================================================================

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use quickchat_error::{AppError, AppResult};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::gateway::Gateway;
use crate::metrics;

/// A dependency the process cannot serve without
#[async_trait::async_trait]
pub trait ReadinessProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> AppResult<()>;
}

/// A dependency whose state is shown on /health but never fails it
pub trait StatusReport: Send + Sync {
    fn name(&self) -> &'static str;

    fn status(&self) -> &'static str;
}

#[derive(Clone, Default)]
pub struct OpsState {
    probes: Vec<Arc<dyn ReadinessProbe>>,
    reports: Vec<Arc<dyn StatusReport>>,
    gateway: Option<Gateway>,
}

impl OpsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_report(mut self, report: Arc<dyn StatusReport>) -> Self {
        self.reports.push(report);
        self
    }

    pub fn with_gateway(mut self, gateway: Gateway) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

pub fn router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

/// Serve the ops endpoint until `shutdown` fires
pub async fn serve(addr: &str, state: OpsState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Ops HTTP listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn health(State(state): State<OpsState>) -> AppResult<Json<Value>> {
    let mut checks = serde_json::Map::new();
    for probe in &state.probes {
        probe.check().await?;
        checks.insert(probe.name().to_string(), json!("ok"));
    }
    for report in &state.reports {
        checks.insert(report.name().to_string(), json!(report.status()));
    }

    let mut body = json!({
        "status": "ok",
        "checks": checks,
    });
    if let Some(gateway) = &state.gateway {
        let stats = gateway.stats();
        body["rooms"] = json!(stats.rooms);
        body["sessions"] = json!(stats.sessions);
    }
    Ok(Json(body))
}

async fn metrics_text() -> AppResult<impl IntoResponse> {
    let text = metrics::gather_metrics().map_err(|e| AppError::internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text))
}
