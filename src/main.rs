use agent_mesh::cli::Cli;
use agent_mesh::config::Settings;
use agent_mesh::AgentRuntime;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration with CLI overrides
    let settings = Settings::new_with_cli(&cli)?;
    let backend_url = settings.backend.base_url.clone();

    let runtime = AgentRuntime::with_ollama(settings, &cli.agent)?;
    let agent = runtime.registry.local();
    info!(
        agent = %agent.name,
        model = %agent.model,
        backend = %backend_url,
        "Starting agent"
    );

    let model_info = runtime.refresh_model_info().await;
    info!(context_length = model_info.context_length, "Model ready");

    // Start server
    let addr = runtime.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, runtime.app())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
