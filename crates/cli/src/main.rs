//! `flowforge` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — analyze a workflow JSON file without executing it.
//! - `run`      — execute a workflow JSON file against the in-memory
//!                backend, streaming events to stdout.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use credentials::types::CredentialTypeRegistry;
use credentials::{Cipher, CredentialStore};
use db::models::ExecutionStatus;
use db::models::WorkflowRecord;
use db::{MemoryRepository, Repository};
use engine::dag::Topology;
use engine::events::ExecutionEvent;
use engine::{EngineConfig, ExecutionEngine, ExecutionMode, Workflow};
use nodes::NodeRegistry;

#[derive(Parser)]
#[command(
    name = "flowforge",
    about = "Workflow automation engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: std::path::PathBuf,
    },
    /// Execute a workflow definition JSON file and stream its events.
    Run {
        /// Path to the workflow JSON file.
        path: std::path::PathBuf,
        /// Trigger data as inline JSON.
        #[arg(long, default_value = "{\"trigger\":\"manual\"}")]
        trigger_data: String,
    },
}

fn load_workflow(path: &std::path::Path) -> anyhow::Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).context("invalid workflow JSON")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let workflow = load_workflow(&path)?;
            let registry = NodeRegistry::with_core_nodes();
            match Topology::analyze(&workflow, &registry, ExecutionMode::Manual) {
                Ok(topology) => {
                    println!(
                        "✅ Workflow is valid: {} reachable node(s), entry: {:?}",
                        topology.reachable.len(),
                        topology.entry
                    );
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Command::Run { path, trigger_data } => {
            let workflow = load_workflow(&path)?;
            let trigger_data: serde_json::Value =
                serde_json::from_str(&trigger_data).context("invalid trigger data JSON")?;

            let key = std::env::var("CREDENTIAL_ENCRYPTION_KEY")
                .context("CREDENTIAL_ENCRYPTION_KEY is required (64 hex characters)")?;
            let cipher = match Cipher::from_hex_key(key.trim()) {
                Ok(cipher) => cipher,
                Err(e) => bail!("invalid CREDENTIAL_ENCRYPTION_KEY: {e}"),
            };

            let repository = Arc::new(MemoryRepository::new());
            let store = Arc::new(CredentialStore::new(
                repository.clone(),
                Arc::new(CredentialTypeRegistry::with_core_types()),
                cipher,
            ));
            let engine = ExecutionEngine::new(
                repository.clone(),
                Arc::new(NodeRegistry::with_core_nodes()),
                store,
                EngineConfig::from_env(),
            );

            repository
                .create_workflow(WorkflowRecord {
                    id: workflow.id,
                    user_id: workflow.user_id,
                    name: workflow.name.clone(),
                    definition: serde_json::to_value(&workflow)?,
                    active: workflow.active,
                    created_at: chrono::Utc::now(),
                })
                .await?;

            // The empty prefix matches every topic; events are filtered by
            // execution id below.
            let mut events = engine.events().subscribe_topic("").await;

            let execution_id = engine
                .submit(workflow.id, trigger_data, ExecutionMode::Manual)
                .await?;
            info!(%execution_id, "execution submitted");

            let mut status = ExecutionStatus::Running;
            while let Some(event) = events.recv().await {
                if event.execution_id() != execution_id {
                    continue;
                }
                println!("{}", serde_json::to_string(&event)?);
                if let ExecutionEvent::ExecutionCompleted { status: final_status, .. } = event {
                    status = final_status;
                    break;
                }
            }

            for row in repository.list_node_executions(execution_id).await? {
                println!(
                    "node {:<24} {:<10} attempts={}",
                    row.node_id, row.status, row.attempt_count
                );
            }

            if status != ExecutionStatus::Success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
