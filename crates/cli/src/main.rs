//! `automation-engine` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`: start the scheduler and the HTTP API.
//! - `validate`: validate a workflow JSON file.
//! - `run`: register a workflow JSON file and run it once.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::{validate_definition, AutomationEngine, EngineConfig, ExecutionStatus, NewWorkflow};
use steps::builtin::default_registry;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "automation-engine",
    about = "Workflow scheduling and execution engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and the REST API server.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Register a workflow definition JSON file and run it once.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind } => serve(bind).await,
        Command::Validate { path } => validate(&path),
        Command::Run { path } => run(&path).await,
    }
}

async fn serve(bind: SocketAddr) -> Result<()> {
    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let engine = Arc::new(AutomationEngine::new(config, default_registry()));
    info!(step_types = ?engine.step_types(), "engine ready");

    let scheduler = engine.start();

    tokio::select! {
        result = api::serve(bind, engine.clone()) => {
            if let Err(e) = result {
                error!(error = %e, "API server error");
                scheduler.shutdown().await;
                return Err(e).context("API server failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    scheduler.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

fn read_workflow(path: &Path) -> Result<NewWorkflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let workflow = read_workflow(path)?;
    let registry = default_registry();

    match validate_definition(&workflow.name, &workflow.trigger, &workflow.steps, &registry) {
        Ok(()) => {
            let order: Vec<&str> = workflow.steps.iter().map(|s| s.name.as_str()).collect();
            println!("✅ Workflow is valid. Step order: {order:?}");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Validation failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(path: &Path) -> Result<()> {
    let workflow = read_workflow(path)?;
    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let engine = AutomationEngine::new(config, default_registry());

    let registered = engine
        .register_workflow(workflow)
        .context("workflow rejected")?;
    let record = engine
        .execute_now_and_wait(registered.id)
        .await
        .context("execution could not be started")?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    if record.status != ExecutionStatus::Succeeded {
        bail!("execution ended {}", record.status);
    }
    Ok(())
}
