//! In-memory session store

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{parse_session_id, SessionLease, SessionStore};
use crate::adapters::metrics_handler::MetricsCollector;
use crate::agents::error::{AgentError, AgentResult};
use crate::domain::{Message, Session, SessionSummary};

struct Entry {
    session: Session,
    /// Creation sequence, used for listing order
    seq: u64,
    busy: Arc<AtomicUsize>,
}

impl Entry {
    fn is_idle(&self) -> bool {
        self.busy.load(Ordering::SeqCst) == 0
    }
}

/// Size-bounded in-memory session store. All mutations go through one
/// write lock, so the capacity check and the insert are atomic.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Entry>>,
    next_seq: AtomicU64,
    max_sessions: usize,
    max_messages: usize,
    dump_dir: Option<PathBuf>,
    metrics: Arc<MetricsCollector>,
}

impl InMemorySessionStore {
    pub fn new(
        max_sessions: usize,
        max_messages: usize,
        dump_dir: Option<PathBuf>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            max_sessions,
            max_messages,
            dump_dir,
            metrics,
        }
    }

    async fn dump(&self, session: &Session) {
        let Some(dir) = &self.dump_dir else {
            return;
        };
        let path = dir.join(format!("{}.json", session.id));
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            let body = serde_json::to_vec_pretty(session)?;
            tokio::fs::write(&path, body).await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => tracing::debug!(session_id = %session.id, path = %path.display(), "session dumped"),
            Err(e) => tracing::warn!(session_id = %session.id, "failed to dump session: {}", e),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, metadata: Map<String, Value>) -> AgentResult<Uuid> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.max_sessions {
            let victim = sessions
                .iter()
                .filter(|(_, entry)| entry.is_idle())
                .min_by_key(|(_, entry)| (entry.session.last_active_at, entry.seq))
                .map(|(id, _)| *id);

            match victim {
                Some(id) => {
                    sessions.remove(&id);
                    self.metrics.sessions_evicted_total.inc();
                    tracing::info!(session_id = %id, "evicted idle session to make room");
                }
                None => return Err(AgentError::CapacityExceeded(self.max_sessions)),
            }
        }

        let session = Session::new(metadata);
        let id = session.id;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        sessions.insert(
            id,
            Entry {
                session,
                seq,
                busy: Arc::new(AtomicUsize::new(0)),
            },
        );

        self.metrics.sessions_created_total.inc();
        self.metrics.sessions_active.set(sessions.len() as i64);
        Ok(id)
    }

    async fn get(&self, id: &str) -> AgentResult<Session> {
        let uuid = parse_session_id(id)?;
        let sessions = self.sessions.read().await;
        sessions
            .get(&uuid)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))
    }

    async fn append(&self, id: &str, message: Message) -> AgentResult<usize> {
        let uuid = parse_session_id(id)?;
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&uuid)
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;

        if entry.session.message_count() >= self.max_messages {
            return Err(AgentError::Validation(format!(
                "session {} already holds {} messages",
                id, self.max_messages
            )));
        }

        entry.session.append(message);
        Ok(entry.session.message_count())
    }

    async fn close(&self, id: &str) -> AgentResult<Session> {
        let uuid = parse_session_id(id)?;
        let session = {
            let mut sessions = self.sessions.write().await;
            let entry = sessions
                .remove(&uuid)
                .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;
            self.metrics.sessions_active.set(sessions.len() as i64);
            entry.session
        };

        self.dump(&session).await;
        Ok(session)
    }

    async fn list(&self) -> AgentResult<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;
        let mut entries: Vec<&Entry> = sessions.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries.iter().map(|entry| entry.session.to_summary()).collect())
    }

    async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn acquire(&self, id: &str) -> AgentResult<SessionLease> {
        let uuid = parse_session_id(id)?;
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(&uuid)
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;
        Ok(SessionLease::new(entry.busy.clone()))
    }
}
