// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that converges live instances toward persisted ones.
//!
//! Every pass computes `persisted - live` and starts each missing instance.
//! One pass runs immediately when the worker starts, then one per interval.
//! A failure to start one instance is logged and never blocks the others; the
//! instance is simply retried on the next pass.
//!
//! Only the forward direction is reconciled. A live handle without a persisted
//! row is left alone.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::db::InstanceId;
use crate::error::Result;
use crate::instance_manager::InstanceManager;

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time between passes.
    pub interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::config::DEFAULT_RECONCILE_INTERVAL_SECS),
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Number of persisted instances seen.
    pub persisted: usize,
    /// Number of instances that already held a handle.
    pub live: usize,
    /// Instances started by this pass, ascending.
    pub started: Vec<InstanceId>,
    /// Instances that failed to start, with the error message.
    pub failed: Vec<(InstanceId, String)>,
}

impl ReconcileReport {
    /// Whether the pass had nothing to do.
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.failed.is_empty()
    }
}

/// Background worker that starts persisted instances missing from the
/// handle map.
pub struct Reconciler {
    manager: Arc<InstanceManager>,
    config: ReconcilerConfig,
    shutdown: Arc<Notify>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(manager: Arc<InstanceManager>, config: ReconcilerConfig) -> Self {
        Self {
            manager,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reconciler loop.
    ///
    /// Reconciles once right away, then every `interval` until the shutdown
    /// signal is received.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Reconciler started"
        );

        self.run_pass().await;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Reconciler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    self.run_pass().await;
                }
            }
        }

        info!("Reconciler stopped");
    }

    async fn run_pass(&self) {
        if let Err(e) = self.reconcile_once().await {
            error!(error = %e, "Reconciliation pass failed");
        }
    }

    /// Run a single reconciliation pass.
    ///
    /// Fails only if the persisted instance ids cannot be read; start failures
    /// are reported per instance in the returned report.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let persisted = self.manager.list_persisted_instance_ids().await?;
        let live: HashSet<InstanceId> = self.manager.list_all_instance_ids().into_iter().collect();

        let missing: Vec<InstanceId> = persisted
            .iter()
            .copied()
            .filter(|id| !live.contains(id))
            .collect();

        let mut report = ReconcileReport {
            persisted: persisted.len(),
            live: persisted.len() - missing.len(),
            ..Default::default()
        };

        if missing.is_empty() {
            debug!(persisted = report.persisted, "All persisted instances are live");
            return Ok(report);
        }

        info!(
            persisted = report.persisted,
            missing = missing.len(),
            "Starting missing instances"
        );

        let results = join_all(missing.iter().map(|&id| {
            let manager = &self.manager;
            async move { (id, manager.start(id).await) }
        }))
        .await;

        for (instance_id, result) in results {
            match result {
                Ok(handle) => {
                    debug!(instance_id = instance_id, handle = %handle, "Reconciled instance");
                    report.started.push(instance_id);
                }
                Err(e) => {
                    warn!(
                        instance_id = instance_id,
                        error = %e,
                        "Failed to start instance during reconciliation"
                    );
                    report.failed.push((instance_id, e.to_string()));
                }
            }
        }

        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "Reconciliation pass complete"
        );

        Ok(report)
    }
}
