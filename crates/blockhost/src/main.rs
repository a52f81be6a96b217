// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Blockhost - Versioned Block Hosting Server
//!
//! Runs the reconciler and sandbox event watcher against a SQLite database,
//! starting every persisted block instance as a sandboxed process.

use std::sync::Arc;
use tracing::{info, warn};

use blockhost::config::Config;
use blockhost::runtime::BlockhostRuntime;
use blockhost::sandbox::{ProcessSandbox, ProcessSandboxConfig, SandboxRuntime};
use blockhost::{db, migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blockhost=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        database_url = %config.database_url,
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        entry_file = %config.entry_file,
        "Starting Blockhost"
    );

    let pool = db::connect(&config.database_url).await?;
    info!("Connected to database");

    migrations::run(&pool).await?;
    info!("Database schema verified");

    let sandbox = Arc::new(ProcessSandbox::new(ProcessSandboxConfig::new(
        &config.sandbox_interpreter,
    )));
    info!(
        sandbox = sandbox.runtime_type(),
        interpreter = %config.sandbox_interpreter,
        "Sandbox initialized"
    );

    let runtime = BlockhostRuntime::builder()
        .from_config(&config)
        .pool(pool)
        .sandbox(sandbox)
        .build()?
        .start()
        .await?;

    info!("Blockhost ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Blockhost shut down");

    Ok(())
}
