//! Delegation values threaded through one inbound request

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Longest visited chain accepted from a caller
const MAX_CHAIN_LEN: usize = 16;

/// ACP message payload, both as received on `/message` and as forwarded to
/// a sibling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message: String,
    #[serde(default = "default_sender")]
    pub from: String,
    #[serde(default)]
    pub depth: u32,
    /// Agents already visited by this call chain, origin first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
}

pub fn default_sender() -> String {
    "user".to_string()
}

impl InboundMessage {
    pub fn from_user(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            from: default_sender(),
            depth: 0,
            chain: Vec::new(),
        }
    }
}

/// Body of `POST /delegate`: forward `message` to `target` without local
/// reasoning first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateRequest {
    pub target: String,
    pub message: String,
    #[serde(default = "default_sender")]
    pub from: String,
    #[serde(default)]
    pub depth: u32,
}

/// `[DELEGATE:<agent>:<message>]` marker found in a model reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationDirective {
    pub target: String,
    pub message: String,
}

fn directive_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)\[DELEGATE:\s*([A-Za-z0-9_-]+)\s*:(.+?)\]").ok())
        .as_ref()
}

/// Extract at most `limit` directives from `text`, in order of appearance.
/// Anything that does not parse is simply not a directive.
pub fn parse_directives(text: &str, limit: usize) -> Vec<DelegationDirective> {
    let Some(pattern) = directive_pattern() else {
        return Vec::new();
    };
    pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let target = caps.get(1)?.as_str().trim().to_string();
            let message = caps.get(2)?.as_str().trim().to_string();
            if message.is_empty() {
                None
            } else {
                Some(DelegationDirective { target, message })
            }
        })
        .take(limit)
        .collect()
}

/// Whether `name` is acceptable as an agent name on the wire
pub fn is_valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Why a single delegation hop did not produce a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelegationFailure {
    /// Target is not part of the roster
    UnknownAgent,
    /// Target is the local agent or already in the chain
    Cycle,
    /// The hop would reach the depth ceiling, refused here or by the sibling
    DelegationLoopExceeded {
        depth: u32,
        max_depth: u32,
        origin: String,
        chain: Vec<String>,
    },
    /// Sibling could not be reached
    Unreachable,
    /// Sibling did not answer in time
    Timeout,
    /// Sibling answered with a non-success status
    Rejected {
        status: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Sibling answered with an unusable body
    InvalidResponse,
}

impl std::fmt::Display for DelegationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelegationFailure::UnknownAgent => write!(f, "unknown agent"),
            DelegationFailure::Cycle => write!(f, "delegation cycle"),
            DelegationFailure::DelegationLoopExceeded {
                depth,
                max_depth,
                origin,
                ..
            } => write!(
                f,
                "delegation depth {depth} reaches the limit of {max_depth} (origin {origin})"
            ),
            DelegationFailure::Unreachable => write!(f, "agent unreachable"),
            DelegationFailure::Timeout => write!(f, "agent timed out"),
            DelegationFailure::Rejected { status, reason } => match reason {
                Some(reason) => write!(f, "agent rejected the request ({status}: {reason})"),
                None => write!(f, "agent rejected the request ({status})"),
            },
            DelegationFailure::InvalidResponse => write!(f, "invalid response from agent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Completed,
    Failed,
}

/// Outcome of one delegation hop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationResult {
    pub target: String,
    pub status: DelegationStatus,
    #[serde(skip)]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DelegationFailure>,
}

impl DelegationResult {
    pub fn completed(target: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: DelegationStatus::Completed,
            response: Some(response.into()),
            error: None,
        }
    }

    pub fn failed(target: impl Into<String>, failure: DelegationFailure) -> Self {
        Self {
            target: target.into(),
            status: DelegationStatus::Failed,
            response: None,
            error: Some(failure),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == DelegationStatus::Completed
    }
}

/// Terminal state of a routed request that produced an answer. A rejected
/// request never reaches this point; it surfaces as an `AgentError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterOutcome {
    Answered,
    AnsweredWithDelegationFailure,
}

/// Per-request delegation state: depth, origin, visited chain and the
/// accumulated sub-results awaiting synthesis
#[derive(Debug, Clone)]
pub struct DelegationContext {
    pub depth: u32,
    pub origin: String,
    pub chain: Vec<String>,
    pub results: Vec<DelegationResult>,
}

impl DelegationContext {
    /// Build the context for a message arriving at `local`
    pub fn inbound(local: &str, from: &str, depth: u32, chain: &[String]) -> Self {
        let mut visited: Vec<String> = chain
            .iter()
            .filter(|name| is_valid_agent_name(name))
            .take(MAX_CHAIN_LEN)
            .cloned()
            .collect();

        let origin = visited
            .first()
            .cloned()
            .unwrap_or_else(|| from.to_string());

        if visited.last().map(String::as_str) != Some(local) {
            visited.push(local.to_string());
        }

        Self {
            depth,
            origin,
            chain: visited,
            results: Vec::new(),
        }
    }

    /// Depth carried by a message forwarded from here
    pub fn next_depth(&self) -> u32 {
        self.depth.saturating_add(1)
    }

    pub fn has_visited(&self, name: &str) -> bool {
        self.chain.iter().any(|visited| visited == name)
    }

    /// Failure for a hop to `target` that would reach `max_depth`; the chain
    /// names the refused target last
    pub fn loop_exceeded(&self, target: &str, max_depth: u32) -> DelegationFailure {
        let mut chain = self.chain.clone();
        chain.push(target.to_string());
        DelegationFailure::DelegationLoopExceeded {
            depth: self.next_depth(),
            max_depth,
            origin: self.origin.clone(),
            chain,
        }
    }

    pub fn record(&mut self, result: DelegationResult) {
        self.results.push(result);
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| !r.is_completed())
    }

    pub fn completed(&self) -> impl Iterator<Item = &DelegationResult> {
        self.results.iter().filter(|r| r.is_completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_directive() {
        let directives = parse_directives(
            "Sure. [DELEGATE:code:Write a Fibonacci function in Python] then I review.",
            5,
        );
        assert_eq!(
            directives,
            vec![DelegationDirective {
                target: "code".into(),
                message: "Write a Fibonacci function in Python".into(),
            }]
        );
    }

    #[test]
    fn test_parse_multiline_and_multiple() {
        let text = "[DELEGATE:code:line one\nline two]\n[DELEGATE:security:Audit for XSS]";
        let directives = parse_directives(text, 5);
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].message, "line one\nline two");
        assert_eq!(directives[1].target, "security");
    }

    #[test]
    fn test_parse_respects_limit() {
        let text = "[DELEGATE:a:1][DELEGATE:b:2][DELEGATE:c:3]";
        assert_eq!(parse_directives(text, 2).len(), 2);
    }

    #[test]
    fn test_malformed_markers_are_ignored() {
        assert!(parse_directives("[DELEGATE:code]", 5).is_empty());
        assert!(parse_directives("[DELEGATE::message]", 5).is_empty());
        assert!(parse_directives("[DELEGATE:code:   ]", 5).is_empty());
        assert!(parse_directives("DELEGATE code please", 5).is_empty());
        assert!(parse_directives("[DELEGATE:bad name:x]", 5).is_empty());
    }

    #[test]
    fn test_inbound_context_from_user() {
        let ctx = DelegationContext::inbound("orchestrator", "user", 0, &[]);
        assert_eq!(ctx.origin, "user");
        assert_eq!(ctx.chain, vec!["orchestrator"]);
        assert_eq!(ctx.next_depth(), 1);
    }

    #[test]
    fn test_inbound_context_extends_chain() {
        let chain = vec!["orchestrator".to_string(), "code".to_string()];
        let ctx = DelegationContext::inbound("security", "code", 2, &chain);
        assert_eq!(ctx.origin, "orchestrator");
        assert_eq!(ctx.chain, vec!["orchestrator", "code", "security"]);
        assert!(ctx.has_visited("code"));
        assert!(!ctx.has_visited("legal"));
    }

    #[test]
    fn test_inbound_context_drops_invalid_names() {
        let chain = vec!["../etc".to_string(), "code".to_string()];
        let ctx = DelegationContext::inbound("design", "code", 1, &chain);
        assert_eq!(ctx.chain, vec!["code", "design"]);
    }

    #[test]
    fn test_failure_serializes_with_kind() {
        let result = DelegationResult::failed("ghost", DelegationFailure::UnknownAgent);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "unknown_agent");
        assert!(json.get("response").is_none());
    }
}
