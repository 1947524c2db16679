//! # Agent Mesh - per-agent ACP/A2A runtime
//!
//! One process serves one agent of a fleet. Each agent is a thin proxy in
//! front of an Ollama inference backend and speaks two REST protocols: ACP
//! (direct messages, sessions, streaming) and A2A (agent cards, discovery).
//!
//! ## Features
//!
//! - **Sessions**: bounded in-memory store with idle eviction
//! - **Delegation**: `[DELEGATE:agent:message]` directives forwarded to
//!   siblings, depth-limited and cycle-checked, merged by a synthesis call
//! - **Streaming**: SSE token streams cancelled when the client goes away
//! - **Metrics**: Prometheus counters and a rolling tokens/second window
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agent_mesh::{config::Settings, AgentRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AgentRuntime::with_ollama(Settings::default(), "code")?;
//!     let listener = tokio::net::TcpListener::bind(runtime.listen_addr()).await?;
//!     axum::serve(listener, runtime.app()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Domain**: agents, cards, sessions, delegation values
//! - **Agents**: registry, session store, backend adapter, router
//! - **Adapters**: HTTP handlers, metrics, rate limiting
//! - **Config**: configuration loading and validation

pub mod adapters;
pub mod agents;
pub mod cli;
pub mod config;
pub mod domain;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::adapters::api_handler::{self, ApiState};
use crate::adapters::health_handler::HealthHandler;
use crate::adapters::metrics_handler::{MetricsCollector, MetricsHandler};
use crate::agents::backend::BackendAdapter;
use crate::agents::llm::{create_provider, LlmProvider, ModelInfo};
use crate::agents::memory::{create_store, SessionStore};
use crate::agents::prompt::system_prompt;
use crate::agents::registry::AgentRegistry;
use crate::agents::router::DelegationRouter;
use crate::agents::sibling::SiblingClient;
use crate::agents::telemetry::TelemetryWindow;
use crate::config::Settings;

/// Everything one agent process needs, wired once at startup
pub struct AgentRuntime {
    pub settings: Arc<Settings>,
    pub registry: Arc<AgentRegistry>,
    pub backend: Arc<BackendAdapter>,
    pub sessions: Arc<dyn SessionStore>,
    pub router: Arc<DelegationRouter>,
    pub metrics: Arc<MetricsCollector>,
    siblings: SiblingClient,
}

impl AgentRuntime {
    /// Wire the runtime for `agent_name` on top of an arbitrary provider
    pub fn new(
        settings: Settings,
        agent_name: &str,
        provider: Arc<dyn LlmProvider>,
    ) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);
        let registry = Arc::new(AgentRegistry::new(&settings, agent_name)?);
        let metrics = Arc::new(MetricsCollector::new()?);

        let backend = Arc::new(BackendAdapter::new(
            provider,
            system_prompt(registry.local(), registry.agents()),
            metrics.clone(),
            Arc::new(TelemetryWindow::new()),
        ));
        let sessions = create_store(&settings.limits, &settings.sessions, metrics.clone());
        let siblings = SiblingClient::new(&settings.delegation)?;
        let router = Arc::new(DelegationRouter::new(
            registry.clone(),
            backend.clone(),
            siblings.clone(),
            metrics.clone(),
            settings.limits.clone(),
            settings.delegation.clone(),
        ));

        Ok(Self {
            settings,
            registry,
            backend,
            sessions,
            router,
            metrics,
            siblings,
        })
    }

    /// Wire the runtime against the configured Ollama backend
    pub fn with_ollama(settings: Settings, agent_name: &str) -> anyhow::Result<Self> {
        let model = settings
            .agent(agent_name)
            .map(|agent| agent.model.clone())
            .ok_or_else(|| anyhow::anyhow!("Unknown agent '{}'", agent_name))?;
        let provider = create_provider(&settings.backend, &model)?;
        Self::new(settings, agent_name, provider)
    }

    pub async fn refresh_model_info(&self) -> ModelInfo {
        self.backend.refresh_model_info().await
    }

    /// `host:port` to bind; the port defaults to the agent's own
    pub fn listen_addr(&self) -> String {
        let port = self
            .settings
            .server
            .port
            .unwrap_or(self.registry.local().port);
        format!("{}:{}", self.settings.server.host, port)
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            settings: self.settings.clone(),
            registry: self.registry.clone(),
            sessions: self.sessions.clone(),
            router: self.router.clone(),
            backend: self.backend.clone(),
            siblings: self.siblings.clone(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn app(&self) -> Router {
        let health = Arc::new(HealthHandler::new(
            self.registry.clone(),
            self.backend.clone(),
            self.sessions.clone(),
            self.metrics.clone(),
        ));
        let metrics = Arc::new(MetricsHandler::new(self.metrics.clone()));
        create_app(self.api_state(), health, metrics)
    }
}

/// Origins served by the CORS layer: local pages only
fn is_local_origin(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    ["http://localhost", "http://127.0.0.1"].iter().any(|host| {
        origin == *host
            || origin
                .strip_prefix(host)
                .is_some_and(|rest| rest.starts_with(':'))
    })
}

/// Creates the Axum application router with all endpoints configured.
///
/// # Arguments
///
/// * `state` - Shared state of the REST handlers
/// * `health_handler` - `/status` handler
/// * `metrics_handler` - Prometheus exposition handler
///
/// # Returns
///
/// Configured Axum Router
pub fn create_app(
    state: ApiState,
    health_handler: Arc<HealthHandler>,
    metrics_handler: Arc<MetricsHandler>,
) -> Router {
    let max_body_bytes = state.settings.limits.max_body_bytes;
    let rate_limit = state.settings.rate_limit.clone();

    let mut router = Router::new()
        .route("/status", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/metrics", get({
            let handler = metrics_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.metrics().await }
            }
        }))
        // A2A discovery
        .route("/.well-known/agent.json", get(api_handler::agent_card))
        .route("/agents", get(api_handler::list_agents))
        .route("/agents/discover", get(api_handler::discover))
        // ACP messaging
        .route("/message", post(api_handler::post_message))
        .route("/message/stream", post(api_handler::stream_message))
        .route("/delegate", post(api_handler::delegate))
        // Sessions
        .route("/sessions", get(api_handler::list_sessions).post(api_handler::create_session))
        .route("/sessions/:id", get(api_handler::get_session).delete(api_handler::close_session))
        .route("/sessions/:id/messages", post(api_handler::append_message))
        .fallback(api_handler::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes));

    // Apply Rate Limiting if enabled
    if let Some(rate_limit) = rate_limit.filter(|r| r.enabled) {
        let limiter = crate::adapters::rate_limit::create_limiter(
            rate_limit.requests_per_second,
            rate_limit.burst_size,
        );
        router = router.layer(axum::middleware::from_fn_with_state(
            limiter,
            crate::adapters::rate_limit::rate_limit_middleware,
        ));
    }

    router
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(|origin, _| is_local_origin(origin)))
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
}
