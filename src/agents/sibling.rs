//! HTTP client for talking to sibling agents

use serde_json::Value;
use std::time::Duration;

use crate::agents::error::{AgentError, AgentResult};
use crate::config::DelegationSettings;
use crate::domain::{DelegationFailure, InboundMessage};

/// Client used to forward delegated messages and probe sibling cards
#[derive(Debug, Clone)]
pub struct SiblingClient {
    client: reqwest::Client,
    timeout: Duration,
    probe_timeout: Duration,
}

impl SiblingClient {
    pub fn new(settings: &DelegationSettings) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(settings.timeout_secs),
            probe_timeout: Duration::from_secs(settings.probe_timeout_secs),
        })
    }

    /// POST `message` to `{base_url}/message` and return the sibling's answer
    pub async fn send_message(
        &self,
        base_url: &str,
        message: &InboundMessage,
    ) -> Result<String, DelegationFailure> {
        let response = self
            .client
            .post(format!("{base_url}/message"))
            .timeout(self.timeout)
            .json(message)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body: Option<Value> = response.json().await.ok();

        if !status.is_success() {
            let reason = body
                .as_ref()
                .and_then(|b| b.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if reason.as_deref() == Some("delegation_loop_exceeded") {
                if let Some(failure) = body.as_ref().and_then(loop_refusal) {
                    return Err(failure);
                }
            }
            return Err(DelegationFailure::Rejected {
                status: status.as_u16(),
                reason,
            });
        }

        body.as_ref()
            .and_then(|b| b.get("response"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(DelegationFailure::InvalidResponse)
    }

    /// Fetch `{base_url}/.well-known/agent.json`
    pub async fn fetch_card(&self, base_url: &str) -> Result<Value, DelegationFailure> {
        let response = self
            .client
            .get(format!("{base_url}/.well-known/agent.json"))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DelegationFailure::Rejected {
                status: status.as_u16(),
                reason: None,
            });
        }

        response
            .json()
            .await
            .map_err(|_| DelegationFailure::InvalidResponse)
    }
}

/// Keep the depth, origin and chain a sibling reports when it refuses a hop
fn loop_refusal(body: &Value) -> Option<DelegationFailure> {
    let depth = |key: &str| -> Option<u32> { u32::try_from(body.get(key)?.as_u64()?).ok() };
    let chain = body
        .get("chain")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();

    Some(DelegationFailure::DelegationLoopExceeded {
        depth: depth("depth")?,
        max_depth: depth("max_depth")?,
        origin: body.get("origin")?.as_str()?.to_string(),
        chain,
    })
}

fn classify(err: reqwest::Error) -> DelegationFailure {
    if err.is_timeout() {
        DelegationFailure::Timeout
    } else {
        DelegationFailure::Unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loop_refusal_keeps_origin_and_chain() {
        let body = json!({
            "error": "delegation_loop_exceeded",
            "message": "delegation depth limit reached",
            "depth": 3,
            "max_depth": 3,
            "origin": "orchestrator",
            "chain": ["orchestrator", "code", "security"],
        });
        assert_eq!(
            loop_refusal(&body),
            Some(DelegationFailure::DelegationLoopExceeded {
                depth: 3,
                max_depth: 3,
                origin: "orchestrator".into(),
                chain: vec!["orchestrator".into(), "code".into(), "security".into()],
            })
        );
        assert_eq!(loop_refusal(&json!({"error": "delegation_loop_exceeded"})), None);
    }
}
