//! Session store for multi-turn exchanges
//!
//! Sessions live in process memory only. A closed session can optionally be
//! dumped to disk as JSON; nothing is reloaded on restart.

mod in_memory;

pub use in_memory::InMemorySessionStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::metrics_handler::MetricsCollector;
use crate::agents::error::{AgentError, AgentResult};
use crate::config::{LimitSettings, SessionSettings};
use crate::domain::{Message, Session, SessionSummary};

/// Trait for session storage backends
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session, evicting the least recently active idle one when full
    async fn create(&self, metadata: Map<String, Value>) -> AgentResult<Uuid>;

    /// Fetch a copy of a session
    async fn get(&self, id: &str) -> AgentResult<Session>;

    /// Append a message; returns the new message count
    async fn append(&self, id: &str, message: Message) -> AgentResult<usize>;

    /// Remove a session from the active set and return its final state
    async fn close(&self, id: &str) -> AgentResult<Session>;

    /// Active sessions in creation order
    async fn list(&self) -> AgentResult<Vec<SessionSummary>>;

    /// Number of active sessions
    async fn active_count(&self) -> usize;

    /// Mark a session busy so it cannot be evicted while the lease is held
    async fn acquire(&self, id: &str) -> AgentResult<SessionLease>;
}

/// Parse a session id before any lookup happens
pub fn parse_session_id(id: &str) -> AgentResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| AgentError::InvalidId(id.chars().take(64).collect()))
}

/// Guard returned by [`SessionStore::acquire`]
#[derive(Debug)]
pub struct SessionLease {
    busy: Arc<AtomicUsize>,
}

impl SessionLease {
    pub(crate) fn new(busy: Arc<AtomicUsize>) -> Self {
        busy.fetch_add(1, Ordering::SeqCst);
        Self { busy }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Create the session store from configuration
pub fn create_store(
    limits: &LimitSettings,
    sessions: &SessionSettings,
    metrics: Arc<MetricsCollector>,
) -> Arc<dyn SessionStore> {
    Arc::new(InMemorySessionStore::new(
        limits.max_sessions,
        limits.max_messages_per_session,
        sessions.dump_dir.clone(),
        metrics,
    ))
}
