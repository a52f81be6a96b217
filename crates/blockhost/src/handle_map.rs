// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-local handle tracking.
//!
//! [`HandleMap`] records which sandbox handle each instance currently runs
//! under, with a reverse index for handle → instance lookups. Its contents
//! are never persisted and are empty after every process start.
//!
//! [`InstanceLocks`] serializes lifecycle operations per instance id. The
//! "probe handle → preflight → run → record" sequence is not atomic, so two
//! unserialized starts for the same id could both reach the sandbox and orphan
//! one of the scripts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::OwnedMutexGuard;

use crate::db::InstanceId;
use crate::sandbox::ScriptHandle;

#[derive(Debug, Default)]
struct Indices {
    by_instance: HashMap<InstanceId, ScriptHandle>,
    by_handle: HashMap<ScriptHandle, InstanceId>,
}

/// Forward and reverse index between instance ids and live script handles.
#[derive(Debug, Default)]
pub struct HandleMap {
    inner: RwLock<Indices>,
}

impl HandleMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of a running instance.
    pub fn get(&self, instance_id: InstanceId) -> Option<ScriptHandle> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_instance.get(&instance_id).cloned()
    }

    /// Instance running under a handle.
    pub fn instance_for(&self, handle: &ScriptHandle) -> Option<InstanceId> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_handle.get(handle).copied()
    }

    /// Record a handle for an instance, returning the handle it replaced.
    pub fn insert(&self, instance_id: InstanceId, handle: ScriptHandle) -> Option<ScriptHandle> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = inner.by_instance.insert(instance_id, handle.clone());
        if let Some(previous) = &previous {
            inner.by_handle.remove(previous);
        }
        inner.by_handle.insert(handle, instance_id);
        previous
    }

    /// Forget an instance's handle, returning it.
    pub fn remove(&self, instance_id: InstanceId) -> Option<ScriptHandle> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let handle = inner.by_instance.remove(&instance_id)?;
        inner.by_handle.remove(&handle);
        Some(handle)
    }

    /// Forget an instance's handle only if it is still `handle`.
    pub fn remove_if(&self, instance_id: InstanceId, handle: &ScriptHandle) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.by_instance.get(&instance_id) != Some(handle) {
            return false;
        }
        inner.by_instance.remove(&instance_id);
        inner.by_handle.remove(handle);
        true
    }

    /// Ids of every instance holding a handle, ascending.
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = inner.by_instance.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_instance.len()
    }

    /// Whether no handles are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-instance async mutexes.
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: Mutex<HashMap<InstanceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl InstanceLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one instance id.
    pub async fn acquire(&self, instance_id: InstanceId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(instance_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry for an id nobody holds or waits on.
    ///
    /// Must be called after the caller's own guard is released.
    pub fn forget_if_idle(&self, instance_id: InstanceId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&instance_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&instance_id);
        }
    }

    /// Number of ids with a lock entry.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
