//! REST handlers of the ACP/A2A surface
//!
//! Bodies are read as raw bytes and decoded here so that malformed JSON maps
//! onto the generic validation error instead of axum's rejection text.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::Uri,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::{future::join_all, Stream, StreamExt};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::adapters::metrics_handler::MetricsCollector;
use crate::agents::backend::BackendAdapter;
use crate::agents::error::{AgentError, AgentResult};
use crate::agents::memory::SessionStore;
use crate::agents::prompt::session_context;
use crate::agents::registry::AgentRegistry;
use crate::agents::router::{DelegationRouter, RoutedReply};
use crate::agents::sibling::SiblingClient;
use crate::config::Settings;
use crate::domain::{parse_directives, DelegateRequest, InboundMessage, Message};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub settings: Arc<Settings>,
    pub registry: Arc<AgentRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub router: Arc<DelegationRouter>,
    pub backend: Arc<BackendAdapter>,
    pub siblings: SiblingClient,
    pub metrics: Arc<MetricsCollector>,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub message: String,
    #[serde(default = "crate::domain::default_sender")]
    pub from: String,
    #[serde(default)]
    pub depth: u32,
    /// Also generate and append a reply from this agent
    #[serde(default)]
    pub respond: bool,
}

#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    #[serde(default)]
    pub probe: Option<bool>,
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> AgentResult<T> {
    serde_json::from_slice(body).map_err(|e| AgentError::Validation(format!("invalid JSON body: {e}")))
}

/// Like [`parse_json`], but an empty body means the default value
fn parse_json_or_default<T: DeserializeOwned + Default>(body: &Bytes) -> AgentResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json(body)
}

fn validate_metadata(metadata: Option<Value>, max_bytes: usize) -> AgentResult<Map<String, Value>> {
    match metadata {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => {
            let size = serde_json::to_vec(&map)?.len();
            if size > max_bytes {
                return Err(AgentError::Validation(format!(
                    "metadata is {size} bytes, limit is {max_bytes}"
                )));
            }
            Ok(map)
        }
        Some(_) => Err(AgentError::Validation("metadata must be an object".to_string())),
    }
}

fn routed_reply_body(state: &ApiState, reply: &RoutedReply) -> Value {
    let local = state.registry.local();
    json!({
        "from": local.name,
        "response": reply.response,
        "model": local.model,
        "depth": reply.depth,
        "outcome": reply.outcome,
        "delegations_executed": reply.delegations_executed,
        "synthesized": reply.synthesized,
        "delegations": reply.delegations,
    })
}

// ============================================================================
// Identity & Discovery
// ============================================================================

pub async fn list_agents(State(state): State<ApiState>) -> impl IntoResponse {
    let agents: Vec<Value> = state
        .registry
        .agents()
        .iter()
        .map(|agent| {
            json!({
                "name": agent.name,
                "port": agent.port,
                "model": agent.model,
                "role": agent.role,
                "color": agent.color,
                "url": state.registry.endpoint_of(agent),
            })
        })
        .collect();

    Json(json!({
        "local": state.registry.local().name,
        "total": agents.len(),
        "agents": agents,
    }))
}

pub async fn agent_card(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.registry.describe())
}

/// Local card plus the live status of every sibling. A sibling that cannot
/// be probed is listed as unreachable; the call itself never fails.
pub async fn discover(
    State(state): State<ApiState>,
    Query(query): Query<DiscoverQuery>,
) -> impl IntoResponse {
    let probe = query.probe.unwrap_or(true);
    let registry = &state.registry;

    let siblings: Vec<Value> = if probe {
        let probes = registry.siblings().map(|agent| {
            let base_url = registry.endpoint_of(agent);
            let siblings = state.siblings.clone();
            async move {
                match siblings.fetch_card(&base_url).await {
                    Ok(card) => json!({
                        "name": agent.name,
                        "status": "online",
                        "url": base_url,
                        "card": card,
                    }),
                    Err(failure) => {
                        tracing::debug!(sibling = %agent.name, "probe failed: {}", failure);
                        json!({
                            "name": agent.name,
                            "status": "unreachable",
                            "url": base_url,
                        })
                    }
                }
            }
        });
        join_all(probes).await
    } else {
        registry
            .siblings()
            .map(|agent| {
                json!({
                    "name": agent.name,
                    "status": "unknown",
                    "url": registry.endpoint_of(agent),
                    "model": agent.model,
                    "role": agent.role,
                })
            })
            .collect()
    };

    let online = siblings
        .iter()
        .filter(|s| s["status"] == "online")
        .count();

    Json(json!({
        "agent": registry.describe(),
        "probed": probe,
        "total": siblings.len(),
        "online": online,
        "agents": siblings,
    }))
}

// ============================================================================
// Messaging
// ============================================================================

pub async fn post_message(
    State(state): State<ApiState>,
    body: Bytes,
) -> AgentResult<Json<Value>> {
    let inbound: InboundMessage = parse_json(&body)?;
    let reply = state.router.handle_message(&inbound).await?;
    Ok(Json(routed_reply_body(&state, &reply)))
}

fn token_event(token: &str) -> Event {
    Event::default().data(json!({ "token": token }).to_string())
}

/// SSE token stream. Tokens are forwarded from a task that stops, and drops
/// the backend stream, as soon as the client goes away.
pub async fn stream_message(
    State(state): State<ApiState>,
    body: Bytes,
) -> AgentResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let inbound: InboundMessage = parse_json(&body)?;
    let (ctx, mut tokens) = state.router.open_stream(&inbound)?;

    let (tx, rx) = mpsc::channel::<Event>(state.settings.backend.stream_buffer.max(1));
    let router = state.router.clone();
    let metrics = state.metrics.clone();
    let max_directives = state.settings.limits.max_directives_per_reply;

    tokio::spawn(async move {
        let mut answer = String::new();
        let mut failed = false;

        loop {
            tokio::select! {
                _ = tx.closed() => {
                    metrics.streams_cancelled_total.inc();
                    tracing::info!("stream client disconnected, backend call cancelled");
                    return;
                }
                next = tokens.next() => match next {
                    Some(Ok(token)) => {
                        answer.push_str(&token);
                        if tx.send(token_event(&token)).await.is_err() {
                            metrics.streams_cancelled_total.inc();
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        failed = true;
                        let event = Event::default()
                            .event("error")
                            .data(json!({ "error": e.kind(), "message": e.public_message() }).to_string());
                        let _ = tx.send(event).await;
                        break;
                    }
                    None => break,
                }
            }
        }
        drop(tokens);

        if !failed && !parse_directives(&answer, max_directives).is_empty() {
            tokio::select! {
                _ = tx.closed() => {
                    metrics.streams_cancelled_total.inc();
                    return;
                }
                reply = router.finish(ctx, answer) => {
                    let event = Event::default().event("synthesis").data(
                        json!({
                            "response": reply.response,
                            "outcome": reply.outcome,
                            "depth": reply.depth,
                            "synthesized": reply.synthesized,
                            "delegations": reply.delegations,
                        })
                        .to_string(),
                    );
                    let _ = tx.send(event).await;
                }
            }
        }

        let _ = tx.send(Event::default().data("[DONE]")).await;
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn delegate(State(state): State<ApiState>, body: Bytes) -> AgentResult<Json<Value>> {
    let request: DelegateRequest = parse_json(&body)?;
    let reply = state.router.delegate(&request).await?;
    Ok(Json(json!({
        "from": state.registry.local().name,
        "target": reply.target,
        "response": reply.response,
        "depth": reply.depth,
    })))
}

// ============================================================================
// Sessions
// ============================================================================

pub async fn list_sessions(State(state): State<ApiState>) -> AgentResult<Json<Value>> {
    let sessions = state.sessions.list().await?;
    Ok(Json(json!({
        "total": sessions.len(),
        "sessions": sessions,
    })))
}

pub async fn create_session(
    State(state): State<ApiState>,
    body: Bytes,
) -> AgentResult<Json<Value>> {
    let request: CreateSessionRequest = parse_json_or_default(&body)?;
    let metadata = validate_metadata(request.metadata, state.settings.limits.max_metadata_bytes)?;
    let id = state.sessions.create(metadata).await?;
    tracing::info!(session_id = %id, "session created");
    Ok(Json(json!({
        "id": id,
        "session_id": id,
        "status": "created",
    })))
}

pub async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> AgentResult<Json<Value>> {
    let session = state.sessions.get(&id).await?;
    let message_count = session.message_count();
    let mut body = serde_json::to_value(session)?;
    body["message_count"] = json!(message_count);
    Ok(Json(body))
}

pub async fn close_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> AgentResult<Json<Value>> {
    let session = state.sessions.close(&id).await?;
    tracing::info!(session_id = %session.id, "session closed");
    Ok(Json(json!({
        "session_id": session.id,
        "status": "closed",
        "message_count": session.message_count(),
    })))
}

pub async fn append_message(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> AgentResult<Json<Value>> {
    // Held until the reply is appended so the session cannot be evicted
    let lease = state.sessions.acquire(&id).await?;
    let request: AppendMessageRequest = parse_json(&body)?;

    if request.message.trim().is_empty() {
        return Err(AgentError::Validation("message is empty".to_string()));
    }
    let max = state.settings.limits.max_message_bytes;
    if request.message.len() > max {
        return Err(AgentError::MessageTooLarge {
            len: request.message.len(),
            max,
        });
    }

    let mut message_count = state
        .sessions
        .append(&id, Message::user(request.from, request.message, request.depth))
        .await?;

    let mut response = None;
    if request.respond {
        let session = state.sessions.get(&id).await?;
        let context = session_context(session.recent(state.settings.sessions.context_messages));
        let reply = state.backend.complete(&context).await?;
        message_count = state
            .sessions
            .append(
                &id,
                Message::assistant(&state.registry.local().name, reply.clone(), request.depth),
            )
            .await?;
        response = Some(reply);
    }
    drop(lease);

    let mut body = json!({
        "session_id": id,
        "message_count": message_count,
    });
    if let Some(response) = response {
        body["response"] = json!(response);
    }
    Ok(Json(body))
}

/// JSON 404 for paths outside the REST surface
pub async fn not_found(uri: Uri) -> AgentError {
    AgentError::NotFound(uri.path().to_string())
}
