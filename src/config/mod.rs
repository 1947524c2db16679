use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod validator;

use crate::cli::Cli;
use crate::domain::Agent;

/// Runtime configuration. Built once at startup and shared read-only.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub delegation: DelegationSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Static roster; the built-in fleet is used when left empty
    #[serde(default)]
    pub agents: Vec<Agent>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port; defaults to the served agent's own port
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Inference backend connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Chunks buffered between the backend reader and the consumer
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434/api".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_stream_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitSettings {
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_max_messages_per_session")]
    pub max_messages_per_session: usize,
    #[serde(default = "default_max_metadata_bytes")]
    pub max_metadata_bytes: usize,
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: u32,
    #[serde(default = "default_max_directives")]
    pub max_directives_per_reply: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            max_message_bytes: default_max_message_bytes(),
            max_sessions: default_max_sessions(),
            max_messages_per_session: default_max_messages_per_session(),
            max_metadata_bytes: default_max_metadata_bytes(),
            max_delegation_depth: default_max_delegation_depth(),
            max_directives_per_reply: default_max_directives(),
        }
    }
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

fn default_max_message_bytes() -> usize {
    100_000
}

fn default_max_sessions() -> usize {
    100
}

fn default_max_messages_per_session() -> usize {
    100
}

fn default_max_metadata_bytes() -> usize {
    16_384
}

fn default_max_delegation_depth() -> u32 {
    3
}

fn default_max_directives() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DelegationSettings {
    #[serde(default = "default_delegation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Host siblings are reached on when they carry no explicit URL
    #[serde(default = "default_sibling_host")]
    pub sibling_host: String,
    #[serde(default = "default_synthesis_answer_chars")]
    pub synthesis_answer_chars: usize,
    #[serde(default = "default_synthesis_result_chars")]
    pub synthesis_result_chars: usize,
}

impl Default for DelegationSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_delegation_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            sibling_host: default_sibling_host(),
            synthesis_answer_chars: default_synthesis_answer_chars(),
            synthesis_result_chars: default_synthesis_result_chars(),
        }
    }
}

fn default_delegation_timeout() -> u64 {
    180
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_sibling_host() -> String {
    "localhost".to_string()
}

fn default_synthesis_answer_chars() -> usize {
    2000
}

fn default_synthesis_result_chars() -> usize {
    3000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    /// Directory closed sessions are written to, if any
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
    /// History entries sent to the backend when replying inside a session
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dump_dir: None,
            context_messages: default_context_messages(),
        }
    }
}

fn default_context_messages() -> usize {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            backend: BackendSettings::default(),
            limits: LimitSettings::default(),
            delegation: DelegationSettings::default(),
            sessions: SessionSettings::default(),
            rate_limit: None,
            agents: default_agents(),
        }
    }
}

/// The fleet every agent knows about unless configured otherwise
pub fn default_agents() -> Vec<Agent> {
    vec![
        Agent::new(
            "orchestrator",
            8001,
            "glm-5:cloud",
            "Task coordination and orchestration",
        )
        .with_color("yellow"),
        Agent::new(
            "vision",
            8002,
            "qwen3-vl:235b-cloud",
            "Image analysis and vision",
        )
        .with_color("cyan")
        .multimodal(),
        Agent::new(
            "code",
            8003,
            "qwen3-coder-next:cloud",
            "Code generation and analysis",
        )
        .with_color("green"),
        Agent::new(
            "generalist",
            8004,
            "minimax-m2.5:cloud",
            "General tasks and assistance",
        )
        .with_color("magenta"),
        Agent::new(
            "frontend",
            8005,
            "devstral-small-2:24b-cloud",
            "User interface, components, styles, responsive layout",
        )
        .with_color("blue"),
        Agent::new(
            "backend",
            8006,
            "devstral-2:123b-cloud",
            "APIs, databases, infrastructure",
        )
        .with_color("red"),
        Agent::new(
            "security",
            8007,
            "cogito-2.1:671b-cloud",
            "Security audits, vulnerability detection",
        )
        .with_color("bright_red"),
        Agent::new(
            "i18n",
            8008,
            "qwen3.5:cloud",
            "Internationalisation, translations, cultural adaptation",
        )
        .with_color("bright_yellow"),
        Agent::new(
            "design",
            8009,
            "kimi-k2.5:cloud",
            "Design review, mockups, ergonomics, UX",
        )
        .with_color("bright_magenta")
        .multimodal(),
        Agent::new(
            "legal",
            8010,
            "gpt-oss:120b-cloud",
            "Legal compliance, GDPR, regulation",
        )
        .with_color("white"),
        Agent::new(
            "evolve",
            8011,
            "glm-5:cloud",
            "Evaluator and optimiser of all agents",
        )
        .with_color("bright_magenta"),
    ]
}

impl Settings {
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let mut settings = Self::load_file(&cli.config)?;

        // Apply CLI overrides (CLI > env vars > config file)
        settings.apply_cli_overrides(cli);

        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate a configuration file, without CLI overrides
    pub fn from_path(path: &Path) -> Result<Self, anyhow::Error> {
        let settings = Self::load_file(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load_file(path: &Path) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .set_default("server.host", default_host())?
            .set_default("backend.base_url", default_base_url())?
            .build()?;

        let mut settings: Settings = s.try_deserialize()?;
        if settings.agents.is_empty() {
            settings.agents = default_agents();
        }
        Ok(settings)
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = Some(port);
        }
        if let Some(url) = &cli.backend_url {
            self.backend.base_url = url.clone();
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        validator::ConfigValidator::validate(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roster() {
        let settings = Settings::default();
        assert_eq!(settings.agents.len(), 11);
        assert_eq!(settings.agent("orchestrator").map(|a| a.port), Some(8001));
        assert_eq!(settings.agent("evolve").map(|a| a.port), Some(8011));
        assert!(settings.agent("vision").unwrap().capabilities.multimodal);
        assert!(!settings.agent("code").unwrap().capabilities.multimodal);
    }

    #[test]
    fn test_default_limits() {
        let limits = LimitSettings::default();
        assert_eq!(limits.max_sessions, 100);
        assert_eq!(limits.max_delegation_depth, 3);
        assert_eq!(limits.max_message_bytes, 100_000);
    }

    #[test]
    fn test_cli_overrides() {
        use clap::Parser;

        let mut settings = Settings::default();
        let cli = Cli::parse_from([
            "agent-mesh",
            "code",
            "--host",
            "0.0.0.0",
            "--port",
            "9100",
            "--backend-url",
            "http://gpu-box:11434/api",
        ]);
        settings.apply_cli_overrides(&cli);

        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, Some(9100));
        assert_eq!(settings.backend.base_url, "http://gpu-box:11434/api");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::from_path(Path::new("does-not-exist.toml")).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.backend.base_url, "http://localhost:11434/api");
        assert_eq!(settings.agents.len(), 11);
    }
}
