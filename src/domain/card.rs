//! A2A agent card

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::agent::{Agent, Skill};

/// Protocol identifier advertised by every agent
pub const PROTOCOL: &str = "acp+a2a";

/// Backend family the model is served by
pub const MODEL_SYSTEM: &str = "ollama";

/// Endpoint paths of the REST surface, keyed by their card name
pub const ENDPOINTS: &[(&str, &str)] = &[
    ("status", "/status"),
    ("agents", "/agents"),
    ("message", "/message"),
    ("stream", "/message/stream"),
    ("delegate", "/delegate"),
    ("sessions", "/sessions"),
    ("discover", "/agents/discover"),
    ("card", "/.well-known/agent.json"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardCapabilities {
    pub streaming: bool,
    pub multimodal: bool,
    pub tools: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardModel {
    pub name: String,
    pub parameters: Option<String>,
    pub system: String,
}

/// Read-only discovery document, derived on demand from an [`Agent`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub protocol: String,
    pub capabilities: CardCapabilities,
    pub model: CardModel,
    pub endpoints: BTreeMap<String, String>,
    pub skills: Vec<Skill>,
}

impl AgentCard {
    /// Project an agent into its card. Endpoint values are absolute URLs
    /// rooted at `base_url`.
    pub fn from_agent(agent: &Agent, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        let endpoints = ENDPOINTS
            .iter()
            .map(|(name, path)| (name.to_string(), format!("{base_url}{path}")))
            .collect();

        Self {
            name: agent.name.clone(),
            display_name: agent.display_name(),
            description: agent.role.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: PROTOCOL.to_string(),
            capabilities: CardCapabilities {
                streaming: agent.capabilities.streaming,
                multimodal: agent.capabilities.multimodal,
                tools: agent.capabilities.tools,
            },
            model: CardModel {
                name: agent.model.clone(),
                parameters: agent.model_parameters(),
                system: MODEL_SYSTEM.to_string(),
            },
            endpoints,
            skills: agent.advertised_skills(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_json_shape() {
        let agent = Agent::new("vision", 8002, "qwen3-vl:235b-cloud", "Image analysis").multimodal();
        let card = AgentCard::from_agent(&agent, "http://localhost:8002/");
        let json = serde_json::to_value(&card).unwrap();

        assert_eq!(json["name"], "vision");
        assert_eq!(json["displayName"], "Vision");
        assert_eq!(json["protocol"], "acp+a2a");
        assert_eq!(json["capabilities"]["multimodal"], true);
        assert_eq!(json["model"]["parameters"], "235b");
        assert_eq!(json["model"]["system"], "ollama");
        assert_eq!(json["endpoints"]["message"], "http://localhost:8002/message");
        assert_eq!(
            json["endpoints"]["card"],
            "http://localhost:8002/.well-known/agent.json"
        );
        assert!(json["skills"].is_array());
    }
}
