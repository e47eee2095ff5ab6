use clap::{Parser, Subcommand};
use parley_bus::{Bus, RedisBus};
use parley_gateway::build_router;
use parley_modes::{FreeDiscussionMode, ModeRegistry};
use parley_orchestrator::Orchestrator;
use parley_scheduler::{ParleyConfig, Scheduler};
use parley_session::{PushHub, SessionManager};
use parley_worker::AgentWorker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley", about = "Parley — multi-agent chat orchestration server")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestration server (HTTP API + result listener)
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run the worker process of one agent
    Worker {
        /// Agent name from the config file
        #[arg(long)]
        agent: String,
    },
    /// List configured agents
    Agents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ParleyConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => serve(config, &host, port).await,
        Commands::Worker { agent } => worker(config, &agent).await,
        Commands::Agents => {
            for agent in &config.agents {
                println!("  @{} (管道: {})", agent.name, agent.pipe);
            }
            Ok(())
        }
    }
}

/// Cancels the token on SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
}

async fn serve(config: ParleyConfig, host: &str, port: u16) -> anyhow::Result<()> {
    let bus: Arc<dyn Bus> = Arc::new(RedisBus::connect(&config.redis.url()).await?);
    bus.ping().await?;

    let registry = Arc::new(ModeRegistry::new());
    registry.register("free_discussion", FreeDiscussionMode::factory())?;
    let orchestrator = Arc::new(Orchestrator::new(registry, "free_discussion"));
    let scheduler = Arc::new(Scheduler::new(&config, bus.clone()).await?);
    let manager = SessionManager::new(
        bus,
        orchestrator,
        scheduler,
        PushHub::new(),
        config.user.avatar.clone(),
    );

    let restored = manager.load_all().await?;
    info!(restored = restored, "persisted sessions loaded");

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());
    let listener_task = manager.start_result_listener(cancel.clone());

    let app = build_router(manager.clone());
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "parley server listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    // Let the result listener drain, then flush snapshots.
    cancel.cancel();
    let _ = listener_task.await;
    manager.flush_all().await;
    info!("parley server stopped");
    Ok(())
}

async fn worker(config: ParleyConfig, agent_name: &str) -> anyhow::Result<()> {
    let agent = config
        .agent(agent_name)
        .ok_or_else(|| anyhow::anyhow!("agent {} not found in config", agent_name))?
        .clone();
    let system_prompt = tokio::fs::read_to_string(&agent.system_prompt_path).await?;

    let bus: Arc<dyn Bus> = Arc::new(RedisBus::connect(&config.redis.url()).await?);
    let worker = AgentWorker::new(agent, system_prompt, bus).await?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());
    worker.run(cancel).await?;
    Ok(())
}
