use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

/// Process-wide counters. Every field is an atomic Prometheus metric, so
/// concurrent requests can bump them without extra locking.
pub struct MetricsCollector {
    registry: Registry,

    // Request metrics
    pub messages_total: IntCounter,
    pub rejections_total: IntCounterVec,

    // Backend metrics
    pub backend_calls_total: IntCounter,
    pub prompt_tokens_total: IntCounter,
    pub eval_tokens_total: IntCounter,

    // Delegation metrics
    pub delegations_total: IntCounterVec,

    // Session metrics
    pub sessions_created_total: IntCounter,
    pub sessions_evicted_total: IntCounter,
    pub sessions_active: IntGauge,

    // Streaming metrics
    pub streams_total: IntCounter,
    pub streams_cancelled_total: IntCounter,
}

/// Point-in-time copy of the counters, as reported by `/status`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub messages: u64,
    pub backend_calls: u64,
    pub prompt_tokens: u64,
    pub eval_tokens: u64,
    pub delegations_completed: u64,
    pub delegations_failed: u64,
    pub sessions_created: u64,
    pub sessions_evicted: u64,
    pub sessions_active: i64,
    pub streams: u64,
    pub streams_cancelled: u64,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let messages_total = IntCounter::new(
            "agent_mesh_messages_total",
            "Total inbound messages accepted",
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("agent_mesh_rejections_total", "Requests rejected by kind"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let backend_calls_total = IntCounter::new(
            "agent_mesh_backend_calls_total",
            "Total calls made to the inference backend",
        )?;
        registry.register(Box::new(backend_calls_total.clone()))?;

        let prompt_tokens_total = IntCounter::new(
            "agent_mesh_prompt_tokens_total",
            "Prompt tokens sent to the backend",
        )?;
        registry.register(Box::new(prompt_tokens_total.clone()))?;

        let eval_tokens_total = IntCounter::new(
            "agent_mesh_eval_tokens_total",
            "Tokens generated by the backend",
        )?;
        registry.register(Box::new(eval_tokens_total.clone()))?;

        let delegations_total = IntCounterVec::new(
            Opts::new("agent_mesh_delegations_total", "Delegation hops by status"),
            &["status"],
        )?;
        registry.register(Box::new(delegations_total.clone()))?;

        let sessions_created_total = IntCounter::new(
            "agent_mesh_sessions_created_total",
            "Sessions created",
        )?;
        registry.register(Box::new(sessions_created_total.clone()))?;

        let sessions_evicted_total = IntCounter::new(
            "agent_mesh_sessions_evicted_total",
            "Sessions evicted to make room for new ones",
        )?;
        registry.register(Box::new(sessions_evicted_total.clone()))?;

        let sessions_active = IntGauge::new(
            "agent_mesh_sessions_active",
            "Sessions currently held in memory",
        )?;
        registry.register(Box::new(sessions_active.clone()))?;

        let streams_total = IntCounter::new(
            "agent_mesh_streams_total",
            "Streaming responses started",
        )?;
        registry.register(Box::new(streams_total.clone()))?;

        let streams_cancelled_total = IntCounter::new(
            "agent_mesh_streams_cancelled_total",
            "Streaming responses abandoned by the client",
        )?;
        registry.register(Box::new(streams_cancelled_total.clone()))?;

        Ok(Self {
            registry,
            messages_total,
            rejections_total,
            backend_calls_total,
            prompt_tokens_total,
            eval_tokens_total,
            delegations_total,
            sessions_created_total,
            sessions_evicted_total,
            sessions_active,
            streams_total,
            streams_cancelled_total,
        })
    }

    pub fn record_rejection(&self, reason: &str) {
        self.rejections_total.with_label_values(&[reason]).inc();
    }

    pub fn record_delegation(&self, completed: bool) {
        let status = if completed { "completed" } else { "failed" };
        self.delegations_total.with_label_values(&[status]).inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages: self.messages_total.get(),
            backend_calls: self.backend_calls_total.get(),
            prompt_tokens: self.prompt_tokens_total.get(),
            eval_tokens: self.eval_tokens_total.get(),
            delegations_completed: self
                .delegations_total
                .with_label_values(&["completed"])
                .get(),
            delegations_failed: self.delegations_total.with_label_values(&["failed"]).get(),
            sessions_created: self.sessions_created_total.get(),
            sessions_evicted: self.sessions_evicted_total.get(),
            sessions_active: self.sessions_active.get(),
            streams: self.streams_total.get(),
            streams_cancelled: self.streams_cancelled_total.get(),
        }
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub struct MetricsHandler {
    collector: Arc<MetricsCollector>,
}

impl MetricsHandler {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    pub async fn metrics(&self) -> String {
        self.collector.encode().unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
            String::from("# Error encoding metrics\n")
        })
    }
}
