// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for blockhost.
//!
//! This module provides [`BlockhostRuntime`] which wires the version registry,
//! instance manager, reconciler and sandbox event watcher together so blockhost
//! can be embedded into an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use blockhost::runtime::BlockhostRuntime;
//! use blockhost::sandbox::{ProcessSandbox, ProcessSandboxConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = blockhost::db::connect("sqlite:.data/blockhost.db?mode=rwc").await?;
//!     blockhost::migrations::run(&pool).await?;
//!
//!     let runtime = BlockhostRuntime::builder()
//!         .pool(pool)
//!         .sandbox(Arc::new(ProcessSandbox::new(ProcessSandboxConfig::new("node"))))
//!         .reconcile_interval(std::time::Duration::from_secs(30))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let instance = runtime.manager().create("weather", "1.0.0").await?;
//!     runtime.manager().start(instance.id).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{Config, DEFAULT_ENTRY_FILE, DEFAULT_RECONCILE_INTERVAL_SECS};
use crate::instance_manager::{InstanceManager, InstanceManagerConfig};
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::rpc::InstanceRpc;
use crate::sandbox::SandboxRuntime;
use crate::version_registry::VersionRegistry;

/// Builder for creating a [`BlockhostRuntime`].
pub struct BlockhostRuntimeBuilder {
    pool: Option<SqlitePool>,
    sandbox: Option<Arc<dyn SandboxRuntime>>,
    reconcile_interval: Duration,
    capabilities: Value,
    entry_file: String,
}

impl Default for BlockhostRuntimeBuilder {
    fn default() -> Self {
        Self {
            pool: None,
            sandbox: None,
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            capabilities: Value::Object(Default::default()),
            entry_file: DEFAULT_ENTRY_FILE.to_string(),
        }
    }
}

impl BlockhostRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the reconcile interval, capabilities and entry file from a loaded
    /// [`Config`].
    pub fn from_config(mut self, config: &Config) -> Self {
        self.reconcile_interval = config.reconcile_interval;
        self.capabilities = config.capabilities.clone();
        self.entry_file = config.entry_file.clone();
        self
    }

    /// Set the SQLite connection pool (required). Migrations must already
    /// have been applied.
    pub fn pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the sandbox runtime (required).
    pub fn sandbox(mut self, sandbox: Arc<dyn SandboxRuntime>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Set the time between reconciliation passes.
    ///
    /// Default: 30 seconds
    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Set the capability set injected into every started instance.
    ///
    /// Default: `{}`
    pub fn capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the entry file name resolved inside each version's root directory.
    ///
    /// Default: `index.js`
    pub fn entry_file(mut self, entry_file: impl Into<String>) -> Self {
        self.entry_file = entry_file.into();
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<BlockhostRuntimeConfig> {
        let pool = self
            .pool
            .ok_or_else(|| anyhow::anyhow!("pool is required"))?;
        let sandbox = self
            .sandbox
            .ok_or_else(|| anyhow::anyhow!("sandbox is required"))?;

        if self.reconcile_interval.is_zero() {
            anyhow::bail!("reconcile_interval must be greater than zero");
        }

        let registry = Arc::new(VersionRegistry::new(pool.clone()));
        let manager = Arc::new(InstanceManager::new(
            pool,
            registry.clone(),
            sandbox,
            InstanceManagerConfig {
                capabilities: self.capabilities,
                entry_file: self.entry_file,
            },
        ));

        Ok(BlockhostRuntimeConfig {
            registry,
            manager,
            reconcile_interval: self.reconcile_interval,
        })
    }
}

/// Configured but not yet started [`BlockhostRuntime`].
pub struct BlockhostRuntimeConfig {
    registry: Arc<VersionRegistry>,
    manager: Arc<InstanceManager>,
    reconcile_interval: Duration,
}

impl BlockhostRuntimeConfig {
    /// The instance manager the runtime will drive.
    pub fn manager(&self) -> &Arc<InstanceManager> {
        &self.manager
    }

    /// Start the runtime, spawning the reconciler and sandbox event watcher.
    ///
    /// The reconciler's first pass runs immediately, so every persisted
    /// instance is started without waiting for the first interval.
    pub async fn start(self) -> Result<BlockhostRuntime> {
        // Subscribe before the first pass so no exit event is missed.
        let watcher_shutdown = Arc::new(Notify::new());
        let watcher_handle = self.manager.watch_runtime_events(watcher_shutdown.clone());

        let reconciler = Reconciler::new(
            self.manager.clone(),
            ReconcilerConfig {
                interval: self.reconcile_interval,
            },
        );
        let reconciler_shutdown = reconciler.shutdown_handle();

        let reconciler_handle = tokio::spawn(async move {
            reconciler.run().await;
        });

        info!(
            sandbox = self.manager.sandbox().runtime_type(),
            reconcile_interval_secs = self.reconcile_interval.as_secs(),
            "BlockhostRuntime started"
        );

        Ok(BlockhostRuntime {
            rpc: InstanceRpc::new(self.manager.clone()),
            registry: self.registry,
            manager: self.manager,
            reconciler_handle,
            watcher_handle,
            reconciler_shutdown,
            watcher_shutdown,
        })
    }
}

/// A running blockhost instance that can be embedded in an application.
///
/// The runtime manages:
/// - Reconciler starting persisted instances missing from the handle map
/// - Sandbox event watcher dropping handles of scripts that exited
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct BlockhostRuntime {
    registry: Arc<VersionRegistry>,
    manager: Arc<InstanceManager>,
    rpc: InstanceRpc,
    reconciler_handle: JoinHandle<()>,
    watcher_handle: JoinHandle<()>,
    reconciler_shutdown: Arc<Notify>,
    watcher_shutdown: Arc<Notify>,
}

impl BlockhostRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> BlockhostRuntimeBuilder {
        BlockhostRuntimeBuilder::new()
    }

    /// The version registry.
    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    /// The instance manager.
    pub fn manager(&self) -> &Arc<InstanceManager> {
        &self.manager
    }

    /// The instance RPC dispatcher.
    pub fn rpc(&self) -> &InstanceRpc {
        &self.rpc
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the reconciler and event watcher to stop, then waits for them.
    /// Running scripts are left to the sandbox.
    pub async fn shutdown(self) -> Result<()> {
        info!("BlockhostRuntime shutting down...");

        self.reconciler_shutdown.notify_one();
        self.watcher_shutdown.notify_one();

        let mut panicked = false;

        if let Err(e) = self.reconciler_handle.await {
            error!("Reconciler task panicked: {}", e);
            panicked = true;
        }

        if let Err(e) = self.watcher_handle.await {
            error!("Sandbox event watcher task panicked: {}", e);
            panicked = true;
        }

        if panicked {
            return Err(anyhow::anyhow!("background task panicked during shutdown"));
        }

        info!("BlockhostRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.reconciler_handle.is_finished() && !self.watcher_handle.is_finished()
    }
}
