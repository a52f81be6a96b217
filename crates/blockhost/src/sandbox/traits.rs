// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sandbox runtime trait definitions.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from sandbox operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SandboxError {
    /// The script could not be started.
    #[error("Script start failed: {0}")]
    StartFailed(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Opaque identifier assigned by the sandbox when a script starts.
///
/// Only meaningful to the runtime that issued it and only for the lifetime of
/// the hosting process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptHandle(String);

impl ScriptHandle {
    /// Wrap a runtime-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the sandbox needs to start one script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDescriptor {
    /// Display name, `<blockName>@<blockVersion>`
    pub name: String,
    /// Root directory of the version's code
    pub root_dir: PathBuf,
    /// Entry file inside `root_dir`
    pub entry_path: PathBuf,
    /// Capability set granted to the script
    pub capabilities: Value,
}

/// Resource usage of a running script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptStats {
    /// OS process id, when the runtime uses processes
    pub pid: Option<u32>,
    /// Time since the script started
    pub uptime: Duration,
    /// Resident memory in bytes, if known
    pub memory_rss_bytes: Option<u64>,
}

/// Metadata about a running script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptInfo {
    /// Handle of the script
    pub handle: ScriptHandle,
    /// Display name the script was started with
    pub name: String,
    /// Root directory the script runs in
    pub root_dir: PathBuf,
    /// Entry file the script was started from
    pub entry_path: PathBuf,
    /// When the script started
    pub started_at: DateTime<Utc>,
}

/// Lifecycle notifications published by a sandbox runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    /// A script was started.
    Started {
        /// Handle of the new script.
        handle: ScriptHandle,
        /// Display name of the script.
        name: String,
    },
    /// A script terminated on its own (exit, crash, kill from outside).
    Exited {
        /// Handle of the terminated script.
        handle: ScriptHandle,
        /// Exit code, if the script exited normally.
        exit_code: Option<i32>,
    },
    /// A script was removed through [`SandboxRuntime::remove`].
    Removed {
        /// Handle of the removed script.
        handle: ScriptHandle,
    },
}

impl ScriptEvent {
    /// Handle the event refers to.
    pub fn handle(&self) -> &ScriptHandle {
        match self {
            ScriptEvent::Started { handle, .. } => handle,
            ScriptEvent::Exited { handle, .. } => handle,
            ScriptEvent::Removed { handle } => handle,
        }
    }
}

/// Capacity of the event channel each runtime keeps.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Trait for sandbox runtimes.
///
/// A runtime executes one script per [`run`](Self::run) call and hands back an
/// opaque handle. Runtimes are PURE execution engines - they do NOT access the
/// database. Bookkeeping of which instance owns which handle is done by the
/// caller.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Runtime type identifier (e.g., "process", "mock")
    fn runtime_type(&self) -> &'static str;

    /// Start a script and return its handle.
    async fn run(&self, descriptor: &ScriptDescriptor) -> Result<ScriptHandle>;

    /// Tear down a script. Fire-and-forget: unknown handles are ignored and
    /// failures are only logged.
    async fn remove(&self, handle: &ScriptHandle);

    /// Handles of every script this runtime currently tracks.
    async fn list_scripts(&self) -> Vec<ScriptHandle>;

    /// Resource usage of a script, `None` if the handle is unknown.
    async fn stats(&self, handle: &ScriptHandle) -> Option<ScriptStats>;

    /// Metadata of a script, `None` if the handle is unknown.
    async fn info(&self, handle: &ScriptHandle) -> Option<ScriptInfo>;

    /// Subscribe to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<ScriptEvent>;
}
