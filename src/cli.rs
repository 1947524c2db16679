use clap::Parser;
use std::path::PathBuf;

/// Run one agent of the mesh: ACP/A2A endpoints in front of an Ollama backend
#[derive(Parser, Debug, Clone)]
#[command(name = "agent-mesh", version, about, long_about = None)]
pub struct Cli {
    /// Name of the agent this process serves (e.g. orchestrator, code)
    pub agent: String,

    /// Path to the configuration file
    #[arg(short, long, env = "AGENT_MESH_CONFIG", default_value = "agent-mesh.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "AGENT_MESH_HOST")]
    pub host: Option<String>,

    /// Server port (defaults to the agent's configured port)
    #[arg(long, env = "AGENT_MESH_PORT")]
    pub port: Option<u16>,

    /// Base URL of the Ollama API
    #[arg(long, env = "OLLAMA_API")]
    pub backend_url: Option<String>,
}
