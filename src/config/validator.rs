use std::collections::HashMap;
use thiserror::Error;

use crate::config::{BackendSettings, LimitSettings, RateLimitConfig, ServerSettings, Settings};
use crate::domain::{is_valid_agent_name, Agent};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_server(&settings.server) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_backend(&settings.backend) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_limits(&settings.limits) {
            errors.extend(e);
        }

        if let Some(rate_limit) = &settings.rate_limit {
            if let Err(e) = Self::validate_rate_limit(rate_limit) {
                errors.extend(e);
            }
        }

        if let Err(e) = Self::validate_agents(&settings.agents) {
            errors.extend(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &ServerSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == Some(0) {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_backend(backend: &BackendSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !(backend.base_url.starts_with("http://") || backend.base_url.starts_with("https://"))
        {
            errors.push(ValidationError::InvalidValue {
                field: "backend.base_url".to_string(),
                reason: format!("'{}' is not an http(s) URL", backend.base_url),
            });
        }

        if backend.request_timeout_secs == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "backend.request_timeout_secs".to_string(),
                reason: "Timeout must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_limits(limits: &LimitSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let positive = [
            ("limits.max_body_bytes", limits.max_body_bytes),
            ("limits.max_message_bytes", limits.max_message_bytes),
            ("limits.max_sessions", limits.max_sessions),
            ("limits.max_messages_per_session", limits.max_messages_per_session),
            ("limits.max_metadata_bytes", limits.max_metadata_bytes),
            ("limits.max_delegation_depth", limits.max_delegation_depth as usize),
        ];
        for (field, value) in positive {
            if value == 0 {
                errors.push(ValidationError::InvalidValue {
                    field: field.to_string(),
                    reason: "Value must be greater than 0".to_string(),
                });
            }
        }

        if limits.max_message_bytes > limits.max_body_bytes {
            errors.push(ValidationError::InvalidValue {
                field: "limits.max_message_bytes".to_string(),
                reason: "Message limit cannot exceed the body limit".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if rate_limit.enabled && rate_limit.requests_per_second == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "rate_limit.requests_per_second".to_string(),
                reason: "Must be greater than 0 when rate limiting is enabled".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_agents(agents: &[Agent]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_names = HashMap::new();
        let mut seen_ports = HashMap::new();

        for (idx, agent) in agents.iter().enumerate() {
            if let Some(prev_idx) = seen_names.insert(&agent.name, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Agent name '{}' appears at indices {} and {}",
                    agent.name, prev_idx, idx
                )));
            }

            if agent.url.is_none() {
                if let Some(prev_idx) = seen_ports.insert(agent.port, idx) {
                    errors.push(ValidationError::Duplicate(format!(
                        "Agent port {} appears at indices {} and {}",
                        agent.port, prev_idx, idx
                    )));
                }
            }

            if agent.name.is_empty() {
                errors.push(ValidationError::MissingField(format!("agents[{}].name", idx)));
            } else if !is_valid_agent_name(&agent.name) {
                errors.push(ValidationError::InvalidValue {
                    field: format!("agents[{}].name", idx),
                    reason: "Use lowercase letters, digits, '-' or '_'".to_string(),
                });
            }

            if agent.model.is_empty() {
                errors.push(ValidationError::MissingField(format!("agents[{}].model", idx)));
            }

            if agent.port == 0 {
                errors.push(ValidationError::InvalidValue {
                    field: format!("agents[{}].port", idx),
                    reason: "Port must be greater than 0".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_valid_config() {
        let result = ConfigValidator::validate(&Settings::default());
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_port() {
        let mut settings = Settings::default();
        settings.server.port = Some(0);

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_duplicate_agents() {
        let mut settings = Settings::default();
        settings.agents.push(Agent::new("code", 8003, "other:7b", "Duplicate"));

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert_eq!(
            errors
                .iter()
                .filter(|e| matches!(e, ValidationError::Duplicate(_)))
                .count(),
            2
        );
    }

    #[test]
    fn test_errors_are_collected() {
        let mut settings = Settings::default();
        settings.backend.base_url = "localhost:11434".to_string();
        settings.limits.max_sessions = 0;
        settings.agents.push(Agent::new("Bad Name", 9000, "m", "r"));

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
