use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::adapters::metrics_handler::{MetricsCollector, MetricsSnapshot};
use crate::agents::backend::BackendAdapter;
use crate::agents::memory::SessionStore;
use crate::agents::registry::AgentRegistry;
use crate::agents::telemetry::TelemetryStats;
use crate::domain::PROTOCOL;

#[derive(Debug, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub model: String,
    pub role: String,
    pub status: String,
    pub protocol: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub context_length: u64,
    pub total_tokens_used: u64,
    pub context_usage_pct: f64,
    pub messages: u64,
    pub capabilities: Vec<String>,
    pub sessions_active: usize,
    pub counters: MetricsSnapshot,
    pub telemetry: TelemetryStats,
}

/// `/status`: read-only view over the counters. Values are read without a
/// common lock, so they may be slightly out of step with each other.
pub struct HealthHandler {
    registry: Arc<AgentRegistry>,
    backend: Arc<BackendAdapter>,
    sessions: Arc<dyn SessionStore>,
    metrics: Arc<MetricsCollector>,
    start_time: std::time::Instant,
}

impl HealthHandler {
    pub fn new(
        registry: Arc<AgentRegistry>,
        backend: Arc<BackendAdapter>,
        sessions: Arc<dyn SessionStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry,
            backend,
            sessions,
            metrics,
            start_time: std::time::Instant::now(),
        }
    }

    pub async fn status(&self) -> AgentStatus {
        let agent = self.registry.local();
        let counters = self.metrics.snapshot();
        let model_info = self.backend.model_info();

        let total_tokens_used = counters.prompt_tokens + counters.eval_tokens;
        let context_usage_pct = if model_info.context_length > 0 {
            let pct = total_tokens_used as f64 / model_info.context_length as f64 * 100.0;
            (pct * 10.0).round() / 10.0
        } else {
            0.0
        };

        AgentStatus {
            name: agent.name.clone(),
            model: agent.model.clone(),
            role: agent.role.clone(),
            status: "active".to_string(),
            protocol: PROTOCOL.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            context_length: model_info.context_length,
            total_tokens_used,
            context_usage_pct,
            messages: counters.messages,
            capabilities: model_info.capabilities,
            sessions_active: self.sessions.active_count().await,
            counters,
            telemetry: self.backend.telemetry().stats(),
        }
    }

    pub async fn health(&self) -> impl IntoResponse {
        (StatusCode::OK, Json(self.status().await))
    }
}
