use anyhow::{Context, Result};
use homefleet_core::{AppConfig, Vault};
use homefleet_engine::WorkflowEngine;
use homefleet_executors::ExecutorRegistry;
use homefleet_storage::Database;
use homefleet_worker::runner::JobRunner;
use homefleet_worker::Worker;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homefleet_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("homefleet-worker starting...");

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    let db = Database::from_url(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection established");

    let registry = ExecutorRegistry::with_builtins(db.clone(), &config.playbook_dir);
    let vault = Vault::new(&config.vault.encryption_key);
    let engine = Arc::new(WorkflowEngine::new(db.clone(), registry, vault));
    let runner = Arc::new(JobRunner::new(
        db.clone(),
        config.playbook_dir.clone(),
        config.ssh.clone(),
        config.worker.clone(),
    ));

    let worker = Arc::new(Worker::new(db, engine, runner, config.worker.clone()));

    let run_handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    worker.shutdown();
    run_handle.await??;

    Ok(())
}
