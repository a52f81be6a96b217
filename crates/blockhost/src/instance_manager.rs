// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance Manager
//!
//! Creates persisted instance records against the version registry and drives
//! the process-local handle map by invoking the sandbox runtime.
//!
//! # Instance State Machine
//!
//! ```text
//!     create                start
//!   ─────────► NotRunning ─────────► Running
//!                  ▲  │                │  │
//!                  │  │ remove         │  │ restart (teardown + start)
//!       script     │  ▼                │  └──────┐
//!       exited     │ (row gone) ◄──────┘ remove  │
//!                  └─────────────────────────────┘
//! ```
//!
//! `start` is a no-op for an instance that already holds a handle, which lets
//! the reconciler call it for every persisted instance without special cases.
//! All lifecycle operations on one id are serialized; different ids proceed
//! in parallel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::{self, BlockInstance, InstanceId, InstanceWithVersion};
use crate::error::{Error, Result, is_foreign_key_violation, is_not_null_violation};
use crate::handle_map::{HandleMap, InstanceLocks};
use crate::sandbox::{SandboxError, SandboxRuntime, ScriptDescriptor, ScriptEvent, ScriptHandle};
use crate::version_registry::VersionRegistry;

/// Settings applied to every instance this manager starts.
#[derive(Debug, Clone)]
pub struct InstanceManagerConfig {
    /// Capability set injected into every started script
    pub capabilities: Value,
    /// Entry file name relative to a version's root directory
    pub entry_file: String,
}

impl Default for InstanceManagerConfig {
    fn default() -> Self {
        Self {
            capabilities: Value::Object(Default::default()),
            entry_file: crate::config::DEFAULT_ENTRY_FILE.to_string(),
        }
    }
}

/// Manages block instances and their live sandbox handles.
pub struct InstanceManager {
    pool: SqlitePool,
    registry: Arc<VersionRegistry>,
    sandbox: Arc<dyn SandboxRuntime>,
    handles: HandleMap,
    locks: InstanceLocks,
    config: InstanceManagerConfig,
}

impl InstanceManager {
    /// Create a new instance manager.
    ///
    /// # Arguments
    ///
    /// * `pool` - SQLite pool holding the `block_instance` table
    /// * `registry` - Version registry instances are created against
    /// * `sandbox` - Runtime that executes started instances
    /// * `config` - Capabilities and entry file applied on start
    pub fn new(
        pool: SqlitePool,
        registry: Arc<VersionRegistry>,
        sandbox: Arc<dyn SandboxRuntime>,
        config: InstanceManagerConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            sandbox,
            handles: HandleMap::new(),
            locks: InstanceLocks::new(),
            config,
        }
    }

    /// The sandbox runtime this manager drives.
    pub fn sandbox(&self) -> &Arc<dyn SandboxRuntime> {
        &self.sandbox
    }

    // ========================================================================
    // Persisted instances
    // ========================================================================

    /// Create an instance of `name@version`. The instance starts out not
    /// running.
    pub async fn create(&self, name: &str, version: &str) -> Result<BlockInstance> {
        let version_not_found = || Error::VersionNotFound {
            name: name.to_string(),
            version: version.to_string(),
        };

        let block_version = self
            .registry
            .get(name, version)
            .await?
            .ok_or_else(version_not_found)?;

        // The version may be unassociated between lookup and insert; the
        // foreign key catches that.
        let instance = match db::insert_instance(&self.pool, block_version.id).await {
            Ok(instance) => instance,
            Err(e) if is_foreign_key_violation(&e) || is_not_null_violation(&e) => {
                return Err(version_not_found());
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            instance_id = instance.id,
            name = %name,
            version = %version,
            "Created block instance"
        );

        Ok(instance)
    }

    /// Get a persisted instance with its version.
    pub async fn get_instance(&self, instance_id: InstanceId) -> Result<Option<InstanceWithVersion>> {
        Ok(db::get_instance_with_version(&self.pool, instance_id).await?)
    }

    /// List every persisted instance with its version.
    pub async fn list_instances(&self) -> Result<Vec<InstanceWithVersion>> {
        Ok(db::list_instances_with_version(&self.pool).await?)
    }

    /// Ids of every persisted instance, running or not.
    pub async fn list_persisted_instance_ids(&self) -> Result<Vec<InstanceId>> {
        Ok(db::list_instance_ids(&self.pool).await?)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start an instance, returning its handle.
    ///
    /// Returns the existing handle without touching the sandbox if the
    /// instance is already running. Filesystem checks run before the sandbox
    /// is invoked, so a version whose code is missing never reaches it.
    pub async fn start(&self, instance_id: InstanceId) -> Result<ScriptHandle> {
        let guard = self.locks.acquire(instance_id).await;
        let result = self.start_locked(instance_id).await;

        drop(guard);
        self.locks.forget_if_idle(instance_id);
        result
    }

    /// Tear down the instance's handle, if any, then start it again.
    pub async fn restart(&self, instance_id: InstanceId) -> Result<ScriptHandle> {
        let guard = self.locks.acquire(instance_id).await;

        if self.teardown_handle(instance_id).await {
            debug!(instance_id = instance_id, "Stopped instance for restart");
        }
        let result = self.start_locked(instance_id).await;

        drop(guard);
        self.locks.forget_if_idle(instance_id);
        result
    }

    /// Tear down the instance's handle, if any, and delete its row.
    ///
    /// Removing an instance that does not exist is not an error.
    pub async fn remove(&self, instance_id: InstanceId) -> Result<()> {
        let guard = self.locks.acquire(instance_id).await;

        let had_handle = self.teardown_handle(instance_id).await;
        let deleted = db::delete_instance(&self.pool, instance_id).await;

        drop(guard);
        self.locks.forget_if_idle(instance_id);
        let deleted = deleted?;

        if deleted || had_handle {
            info!(
                instance_id = instance_id,
                had_handle = had_handle,
                deleted = deleted,
                "Removed block instance"
            );
        } else {
            debug!(instance_id = instance_id, "Remove requested for unknown instance");
        }

        Ok(())
    }

    /// Caller must hold the instance's lock.
    async fn start_locked(&self, instance_id: InstanceId) -> Result<ScriptHandle> {
        if let Some(handle) = self.handles.get(instance_id) {
            debug!(instance_id = instance_id, handle = %handle, "Instance already running");
            return Ok(handle);
        }

        let instance = db::get_instance_with_version(&self.pool, instance_id)
            .await?
            .ok_or(Error::InstanceNotFound(instance_id))?;

        let root_dir = PathBuf::from(&instance.path);
        if !is_dir(&root_dir).await {
            warn!(
                instance_id = instance_id,
                path = %root_dir.display(),
                "Version folder missing"
            );
            return Err(Error::VersionFolderNotFound(root_dir));
        }

        let entry_path = root_dir.join(&self.config.entry_file);
        if !is_file(&entry_path).await {
            warn!(
                instance_id = instance_id,
                path = %entry_path.display(),
                "Version entry file missing"
            );
            return Err(Error::VersionEntryFileNotFound(entry_path));
        }

        let descriptor = ScriptDescriptor {
            name: instance.script_name(),
            root_dir,
            entry_path,
            capabilities: self.config.capabilities.clone(),
        };

        let handle = self.sandbox.run(&descriptor).await.map_err(|e| {
            error!(
                instance_id = instance_id,
                name = %descriptor.name,
                error = %e,
                "Sandbox failed to start instance"
            );
            e
        })?;

        self.handles.insert(instance_id, handle.clone());

        // An Exited event published before the insert found no instance to
        // drop, so confirm the script outlived its launch.
        if self.sandbox.info(&handle).await.is_none() {
            self.handles.remove_if(instance_id, &handle);
            warn!(
                instance_id = instance_id,
                name = %descriptor.name,
                handle = %handle,
                "Instance script exited during startup"
            );
            return Err(SandboxError::StartFailed(format!(
                "{} exited during startup",
                descriptor.name
            ))
            .into());
        }

        info!(
            instance_id = instance_id,
            name = %descriptor.name,
            handle = %handle,
            "Started block instance"
        );

        Ok(handle)
    }

    /// Remove the instance's handle from the sandbox and the map.
    ///
    /// Returns whether there was a handle. Caller must hold the instance's lock.
    async fn teardown_handle(&self, instance_id: InstanceId) -> bool {
        let Some(handle) = self.handles.remove(instance_id) else {
            return false;
        };

        self.sandbox.remove(&handle).await;
        debug!(instance_id = instance_id, handle = %handle, "Tore down instance handle");
        true
    }

    // ========================================================================
    // Live handle view
    // ========================================================================

    /// Handle of a running instance.
    pub fn get_handle(&self, instance_id: InstanceId) -> Option<ScriptHandle> {
        self.handles.get(instance_id)
    }

    /// Instance running under a handle.
    pub fn get_instance_id(&self, handle: &ScriptHandle) -> Option<InstanceId> {
        self.handles.instance_for(handle)
    }

    /// Ids of every instance this process currently holds a handle for.
    pub fn list_all_instance_ids(&self) -> Vec<InstanceId> {
        self.handles.instance_ids()
    }

    // ========================================================================
    // Sandbox events
    // ========================================================================

    /// React to a sandbox lifecycle event.
    ///
    /// When a script exits on its own the instance's handle is dropped, so the
    /// next reconciliation pass starts it again. Returns the affected instance.
    pub async fn handle_runtime_event(&self, event: &ScriptEvent) -> Option<InstanceId> {
        let ScriptEvent::Exited { handle, exit_code } = event else {
            return None;
        };

        let instance_id = self.handles.instance_for(handle)?;
        let guard = self.locks.acquire(instance_id).await;

        // A restart may have replaced the handle while we waited for the lock.
        let dropped = self.handles.remove_if(instance_id, handle);

        drop(guard);
        self.locks.forget_if_idle(instance_id);

        if !dropped {
            return None;
        }

        warn!(
            instance_id = instance_id,
            handle = %handle,
            exit_code = ?exit_code,
            "Instance script exited; awaiting reconciliation"
        );

        Some(instance_id)
    }

    /// Spawn a task feeding sandbox events into
    /// [`handle_runtime_event`](Self::handle_runtime_event) until `shutdown`
    /// is notified or the sandbox closes its event stream.
    pub fn watch_runtime_events(self: &Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let manager = self.clone();
        let mut events = self.sandbox.subscribe();

        tokio::spawn(async move {
            debug!("Sandbox event watcher started");

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.notified() => {
                        debug!("Sandbox event watcher received shutdown signal");
                        break;
                    }

                    event = events.recv() => match event {
                        Ok(event) => {
                            debug!(handle = %event.handle(), "Received sandbox event");
                            manager.handle_runtime_event(&event).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "Sandbox event watcher lagged; reconciliation will cover missed exits");
                        }
                        Err(RecvError::Closed) => {
                            debug!("Sandbox event stream closed");
                            break;
                        }
                    }
                }
            }

            debug!("Sandbox event watcher stopped");
        })
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
