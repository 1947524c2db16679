//! Identity and card registry
//!
//! Read-only view of the static roster from the point of view of the agent
//! this process serves. Adding an agent is a configuration change.

use crate::agents::error::{AgentError, AgentResult};
use crate::config::Settings;
use crate::domain::{Agent, AgentCard};

#[derive(Debug, Clone)]
pub struct AgentRegistry {
    local: Agent,
    agents: Vec<Agent>,
    sibling_host: String,
    public_url: String,
}

impl AgentRegistry {
    /// Build the registry for `local_name`, which must be part of the roster
    pub fn new(settings: &Settings, local_name: &str) -> AgentResult<Self> {
        let local = settings
            .agent(local_name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownAgent(local_name.to_string()))?;

        let host = &settings.server.host;
        let advertised_host = if host == "0.0.0.0" || host.is_empty() {
            settings.delegation.sibling_host.as_str()
        } else {
            host.as_str()
        };
        let port = settings.server.port.unwrap_or(local.port);
        let public_url = local
            .url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", advertised_host, port));

        Ok(Self {
            local,
            agents: settings.agents.clone(),
            sibling_host: settings.delegation.sibling_host.clone(),
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn local(&self) -> &Agent {
        &self.local
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn get(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Every agent except the local one, in roster order
    pub fn siblings(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter().filter(|a| a.name != self.local.name)
    }

    /// This agent's discovery card
    pub fn describe(&self) -> AgentCard {
        AgentCard::from_agent(&self.local, &self.public_url)
    }

    /// Base URL of `name`, without trailing slash
    pub fn resolve_endpoint(&self, name: &str) -> AgentResult<String> {
        let agent = self
            .get(name)
            .ok_or_else(|| AgentError::UnknownAgent(name.to_string()))?;
        Ok(self.endpoint_of(agent))
    }

    pub fn endpoint_of(&self, agent: &Agent) -> String {
        match &agent.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.sibling_host, agent.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(local: &str) -> AgentRegistry {
        let mut settings = Settings::default();
        settings.agents[2] = settings.agents[2]
            .clone()
            .with_url("http://code.internal:9000/");
        AgentRegistry::new(&settings, local).unwrap()
    }

    #[test]
    fn test_unknown_local_agent() {
        let err = AgentRegistry::new(&Settings::default(), "ghost").unwrap_err();
        assert!(matches!(err, AgentError::UnknownAgent(name) if name == "ghost"));
    }

    #[test]
    fn test_resolve_endpoint() {
        let registry = registry("orchestrator");
        assert_eq!(
            registry.resolve_endpoint("security").unwrap(),
            "http://localhost:8007"
        );
        assert_eq!(
            registry.resolve_endpoint("code").unwrap(),
            "http://code.internal:9000"
        );
        assert!(matches!(
            registry.resolve_endpoint("nobody"),
            Err(AgentError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_siblings_exclude_local() {
        let registry = registry("legal");
        assert_eq!(registry.siblings().count(), 10);
        assert!(registry.siblings().all(|a| a.name != "legal"));
    }

    #[test]
    fn test_describe_uses_local_identity() {
        let card = registry("security").describe();
        assert_eq!(card.name, "security");
        assert_eq!(card.protocol, "acp+a2a");
        assert_eq!(
            card.endpoints.get("card").map(String::as_str),
            Some("http://127.0.0.1:8007/.well-known/agent.json")
        );
    }
}
