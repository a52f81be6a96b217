// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock sandbox for testing.
//!
//! Simulates script execution without running anything, and records every
//! call so tests can assert on how the runtime was driven.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, broadcast};

use super::traits::*;

/// Mock sandbox for testing.
pub struct MockSandbox {
    scripts: Mutex<HashMap<ScriptHandle, ScriptInfo>>,
    run_calls: Mutex<Vec<ScriptDescriptor>>,
    removed: Mutex<Vec<ScriptHandle>>,
    events: broadcast::Sender<ScriptEvent>,
    /// Delay before `run` returns, to widen race windows in tests
    launch_delay: Duration,
    /// Script names whose `run` fails
    failing_names: HashSet<String>,
    /// Script names that exit before `run` returns
    crashing_names: HashSet<String>,
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSandbox {
    /// Create a new mock sandbox.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            scripts: Mutex::new(HashMap::new()),
            run_calls: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            events,
            launch_delay: Duration::ZERO,
            failing_names: HashSet::new(),
            crashing_names: HashSet::new(),
        }
    }

    /// Make every `run` call sleep for `delay` before returning.
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    /// Make `run` fail for scripts with this display name (`name@version`).
    pub fn failing_for(mut self, script_name: impl Into<String>) -> Self {
        self.failing_names.insert(script_name.into());
        self
    }

    /// Make scripts with this display name exit before `run` returns.
    ///
    /// `run` still hands out a handle, but the script is already gone and its
    /// [`ScriptEvent::Exited`] has been published.
    pub fn crashing_for(mut self, script_name: impl Into<String>) -> Self {
        self.crashing_names.insert(script_name.into());
        self
    }

    /// Number of `run` calls so far, successful or not.
    pub async fn run_count(&self) -> usize {
        self.run_calls.lock().await.len()
    }

    /// Descriptors passed to `run`, in call order.
    pub async fn run_calls(&self) -> Vec<ScriptDescriptor> {
        self.run_calls.lock().await.clone()
    }

    /// Handles passed to `remove`, in call order.
    pub async fn removed_handles(&self) -> Vec<ScriptHandle> {
        self.removed.lock().await.clone()
    }

    /// Simulate a script terminating on its own.
    ///
    /// Drops the script and publishes [`ScriptEvent::Exited`]. Returns false if
    /// the handle is unknown.
    pub async fn simulate_exit(&self, handle: &ScriptHandle, exit_code: Option<i32>) -> bool {
        let existed = self.scripts.lock().await.remove(handle).is_some();
        if existed {
            let _ = self.events.send(ScriptEvent::Exited {
                handle: handle.clone(),
                exit_code,
            });
        }
        existed
    }
}

#[async_trait]
impl SandboxRuntime for MockSandbox {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, descriptor: &ScriptDescriptor) -> Result<ScriptHandle> {
        self.run_calls.lock().await.push(descriptor.clone());

        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }

        if self.failing_names.contains(&descriptor.name) {
            return Err(SandboxError::StartFailed(format!(
                "Mock failure for {}",
                descriptor.name
            )));
        }

        let handle = ScriptHandle::new(format!("mock-{}", uuid::Uuid::new_v4()));
        let info = ScriptInfo {
            handle: handle.clone(),
            name: descriptor.name.clone(),
            root_dir: descriptor.root_dir.clone(),
            entry_path: descriptor.entry_path.clone(),
            started_at: Utc::now(),
        };
        self.scripts.lock().await.insert(handle.clone(), info);

        let _ = self.events.send(ScriptEvent::Started {
            handle: handle.clone(),
            name: descriptor.name.clone(),
        });

        if self.crashing_names.contains(&descriptor.name) {
            self.simulate_exit(&handle, Some(1)).await;
        }

        Ok(handle)
    }

    async fn remove(&self, handle: &ScriptHandle) {
        self.removed.lock().await.push(handle.clone());
        if self.scripts.lock().await.remove(handle).is_some() {
            let _ = self.events.send(ScriptEvent::Removed {
                handle: handle.clone(),
            });
        }
    }

    async fn list_scripts(&self) -> Vec<ScriptHandle> {
        let mut handles: Vec<_> = self.scripts.lock().await.keys().cloned().collect();
        handles.sort();
        handles
    }

    async fn stats(&self, handle: &ScriptHandle) -> Option<ScriptStats> {
        let scripts = self.scripts.lock().await;
        scripts.get(handle).map(|info| ScriptStats {
            pid: None,
            uptime: (Utc::now() - info.started_at).to_std().unwrap_or_default(),
            memory_rss_bytes: None,
        })
    }

    async fn info(&self, handle: &ScriptHandle) -> Option<ScriptInfo> {
        self.scripts.lock().await.get(handle).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<ScriptEvent> {
        self.events.subscribe()
    }
}
