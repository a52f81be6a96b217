// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-backed sandbox.
//!
//! Runs each script as a child process: `<interpreter> [args..] <entry_path>`
//! with the version's root directory as working directory. The capability set
//! is handed to the script as JSON in `BLOCKHOST_CAPABILITIES`.
//!
//! This runtime provides no isolation of its own; the interpreter is expected
//! to enforce whatever the capability set allows (e.g. a permission-flagged
//! JavaScript runtime).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, broadcast, oneshot};
use tracing::{debug, info, warn};

use super::traits::*;

/// Environment variable carrying the capability set.
pub const CAPABILITIES_ENV: &str = "BLOCKHOST_CAPABILITIES";

/// Environment variable carrying the script display name.
pub const SCRIPT_NAME_ENV: &str = "BLOCKHOST_SCRIPT_NAME";

/// Configuration for the process sandbox.
#[derive(Debug, Clone)]
pub struct ProcessSandboxConfig {
    /// Program used to run entry files
    pub interpreter: String,
    /// Extra arguments placed before the entry path
    pub args: Vec<String>,
    /// How long a script gets to exit after SIGTERM before it is killed
    pub kill_grace: Duration,
}

impl Default for ProcessSandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: crate::config::DEFAULT_SANDBOX_INTERPRETER.to_string(),
            args: Vec::new(),
            kill_grace: Duration::from_secs(5),
        }
    }
}

impl ProcessSandboxConfig {
    /// Config for a given interpreter with default grace period.
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            ..Default::default()
        }
    }
}

/// A tracked child process.
struct ProcessScript {
    info: ScriptInfo,
    pid: Option<u32>,
    stop_tx: Option<oneshot::Sender<()>>,
}

/// Sandbox runtime that launches scripts as OS processes.
pub struct ProcessSandbox {
    config: ProcessSandboxConfig,
    scripts: Arc<Mutex<HashMap<ScriptHandle, ProcessScript>>>,
    events: broadcast::Sender<ScriptEvent>,
}

impl ProcessSandbox {
    /// Create a new process sandbox.
    pub fn new(config: ProcessSandboxConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            scripts: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }
}

#[async_trait]
impl SandboxRuntime for ProcessSandbox {
    fn runtime_type(&self) -> &'static str {
        "process"
    }

    async fn run(&self, descriptor: &ScriptDescriptor) -> Result<ScriptHandle> {
        let capabilities = serde_json::to_string(&descriptor.capabilities)?;

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.args(&self.config.args)
            .arg(&descriptor.entry_path)
            .current_dir(&descriptor.root_dir)
            .env(CAPABILITIES_ENV, capabilities)
            .env(SCRIPT_NAME_ENV, &descriptor.name)
            .stdin(Stdio::null());

        let child = cmd.spawn().map_err(|e| {
            SandboxError::StartFailed(format!(
                "failed to spawn {} for {}: {}",
                self.config.interpreter, descriptor.name, e
            ))
        })?;

        let pid = child.id();
        let handle = ScriptHandle::new(format!("proc-{}", uuid::Uuid::new_v4()));
        let (stop_tx, stop_rx) = oneshot::channel();

        self.scripts.lock().await.insert(
            handle.clone(),
            ProcessScript {
                info: ScriptInfo {
                    handle: handle.clone(),
                    name: descriptor.name.clone(),
                    root_dir: descriptor.root_dir.clone(),
                    entry_path: descriptor.entry_path.clone(),
                    started_at: Utc::now(),
                },
                pid,
                stop_tx: Some(stop_tx),
            },
        );

        tokio::spawn(supervise(
            child,
            handle.clone(),
            stop_rx,
            self.scripts.clone(),
            self.events.clone(),
            self.config.kill_grace,
        ));

        info!(
            handle = %handle,
            name = %descriptor.name,
            pid = ?pid,
            "Launched script process"
        );

        let _ = self.events.send(ScriptEvent::Started {
            handle: handle.clone(),
            name: descriptor.name.clone(),
        });

        Ok(handle)
    }

    async fn remove(&self, handle: &ScriptHandle) {
        let Some(mut script) = self.scripts.lock().await.remove(handle) else {
            debug!(handle = %handle, "Remove requested for unknown script");
            return;
        };

        if let Some(stop_tx) = script.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let _ = self.events.send(ScriptEvent::Removed {
            handle: handle.clone(),
        });
    }

    async fn list_scripts(&self) -> Vec<ScriptHandle> {
        let mut handles: Vec<_> = self.scripts.lock().await.keys().cloned().collect();
        handles.sort();
        handles
    }

    async fn stats(&self, handle: &ScriptHandle) -> Option<ScriptStats> {
        let scripts = self.scripts.lock().await;
        let script = scripts.get(handle)?;
        Some(ScriptStats {
            pid: script.pid,
            uptime: (Utc::now() - script.info.started_at)
                .to_std()
                .unwrap_or_default(),
            memory_rss_bytes: script.pid.and_then(read_rss_bytes),
        })
    }

    async fn info(&self, handle: &ScriptHandle) -> Option<ScriptInfo> {
        self.scripts
            .lock()
            .await
            .get(handle)
            .map(|script| script.info.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<ScriptEvent> {
        self.events.subscribe()
    }
}

/// Own a child process until it exits or a stop is requested.
async fn supervise(
    mut child: Child,
    handle: ScriptHandle,
    stop_rx: oneshot::Receiver<()>,
    scripts: Arc<Mutex<HashMap<ScriptHandle, ProcessScript>>>,
    events: broadcast::Sender<ScriptEvent>,
    kill_grace: Duration,
) {
    tokio::select! {
        status = child.wait() => {
            let exit_code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Failed to wait for script process");
                    None
                }
            };

            // A script already removed through the runtime is not reported again.
            if scripts.lock().await.remove(&handle).is_some() {
                info!(handle = %handle, exit_code = ?exit_code, "Script process exited");
                let _ = events.send(ScriptEvent::Exited { handle, exit_code });
            }
        }
        _ = stop_rx => {
            terminate(&mut child, &handle, kill_grace).await;
        }
    }
}

/// SIGTERM, then SIGKILL once the grace period runs out.
async fn terminate(child: &mut Child, handle: &ScriptHandle, kill_grace: Duration) {
    if let Some(pid) = child.id() {
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => debug!(handle = %handle, pid = pid, "Sent SIGTERM to script process"),
            Err(nix::errno::Errno::ESRCH) => {
                debug!(handle = %handle, pid = pid, "Script process already gone (ESRCH)");
            }
            Err(e) => warn!(handle = %handle, pid = pid, error = %e, "Failed to send SIGTERM"),
        }
    }

    match tokio::time::timeout(kill_grace, child.wait()).await {
        Ok(_) => info!(handle = %handle, "Script process terminated"),
        Err(_) => {
            warn!(
                handle = %handle,
                grace_secs = kill_grace.as_secs(),
                "Script process ignored SIGTERM, killing"
            );
            if let Err(e) = child.kill().await {
                warn!(handle = %handle, error = %e, "Failed to kill script process");
            }
        }
    }
}

/// Resident set size from `/proc/<pid>/status`, Linux only.
fn read_rss_bytes(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn sh_sandbox() -> ProcessSandbox {
        ProcessSandbox::new(ProcessSandboxConfig {
            interpreter: "sh".to_string(),
            args: Vec::new(),
            kill_grace: Duration::from_secs(2),
        })
    }

    fn write_script(dir: &Path, body: &str) -> ScriptDescriptor {
        let entry_path = dir.join("index.sh");
        std::fs::write(&entry_path, body).unwrap();
        ScriptDescriptor {
            name: "shell@1.0.0".to_string(),
            root_dir: dir.to_path_buf(),
            entry_path,
            capabilities: serde_json::json!({"net": false}),
        }
    }

    async fn next_exit(events: &mut broadcast::Receiver<ScriptEvent>) -> ScriptEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = events.recv().await.unwrap();
                if matches!(event, ScriptEvent::Exited { .. }) {
                    return event;
                }
            }
        })
        .await
        .expect("script should exit")
    }

    #[tokio::test]
    async fn test_process_sandbox_run_and_remove() {
        let dir = TempDir::new().unwrap();
        let sandbox = sh_sandbox();
        let descriptor = write_script(dir.path(), "exec sleep 30\n");

        let handle = sandbox.run(&descriptor).await.unwrap();
        assert_eq!(sandbox.list_scripts().await, vec![handle.clone()]);

        let stats = sandbox.stats(&handle).await.expect("stats for running script");
        assert!(stats.pid.is_some());

        let info = sandbox.info(&handle).await.unwrap();
        assert_eq!(info.name, "shell@1.0.0");

        sandbox.remove(&handle).await;
        assert!(sandbox.list_scripts().await.is_empty());
        assert!(sandbox.stats(&handle).await.is_none());
    }

    #[tokio::test]
    async fn test_process_sandbox_reports_exit() {
        let dir = TempDir::new().unwrap();
        let sandbox = sh_sandbox();
        let mut events = sandbox.subscribe();
        let descriptor = write_script(dir.path(), "exit 3\n");

        let handle = sandbox.run(&descriptor).await.unwrap();

        let event = next_exit(&mut events).await;
        assert_eq!(
            event,
            ScriptEvent::Exited {
                handle: handle.clone(),
                exit_code: Some(3)
            }
        );
        assert!(sandbox.list_scripts().await.is_empty());
    }

    #[tokio::test]
    async fn test_process_sandbox_passes_capabilities() {
        let dir = TempDir::new().unwrap();
        let sandbox = sh_sandbox();
        let mut events = sandbox.subscribe();
        let descriptor = write_script(
            dir.path(),
            "printf '%s' \"$BLOCKHOST_CAPABILITIES\" > caps.json\n",
        );

        sandbox.run(&descriptor).await.unwrap();
        next_exit(&mut events).await;

        let written = std::fs::read_to_string(dir.path().join("caps.json")).unwrap();
        let caps: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(caps, serde_json::json!({"net": false}));
    }

    #[tokio::test]
    async fn test_process_sandbox_missing_interpreter() {
        let dir = TempDir::new().unwrap();
        let sandbox = ProcessSandbox::new(ProcessSandboxConfig::new(
            "/nonexistent/blockhost-interpreter",
        ));
        let descriptor = write_script(dir.path(), "exit 0\n");

        let result = sandbox.run(&descriptor).await;
        assert!(matches!(result, Err(SandboxError::StartFailed(_))));
        assert!(sandbox.list_scripts().await.is_empty());
    }

    #[test]
    fn test_read_rss_of_unknown_pid() {
        assert!(read_rss_bytes(u32::MAX).is_none());
    }
}
