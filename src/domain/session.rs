//! Conversational sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message recorded in a session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    /// Sender identifier (`user` or an agent name)
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Delegation depth the message arrived with
    pub depth: u32,
}

impl Message {
    pub fn user(sender: impl Into<String>, content: impl Into<String>, depth: u32) -> Self {
        Self {
            role: MessageRole::User,
            sender: sender.into(),
            content: content.into(),
            timestamp: Utc::now(),
            depth,
        }
    }

    pub fn assistant(sender: impl Into<String>, content: impl Into<String>, depth: u32) -> Self {
        Self {
            role: MessageRole::Assistant,
            sender: sender.into(),
            content: content.into(),
            timestamp: Utc::now(),
            depth,
        }
    }
}

/// Server-side record of a multi-turn exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Session {
    pub fn new(metadata: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_active_at: now,
            messages: Vec::new(),
            metadata,
        }
    }

    /// Append a message; history order is append order
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.last_active_at = Utc::now();
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// The last `n` messages, oldest first
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            message_count: self.messages.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub message_count: usize,
}
