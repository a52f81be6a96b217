// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for blockhost tests.
//!
//! Provides TestContext wiring an in-memory database, a mock sandbox and a
//! temporary directory for block code.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use sqlx::SqlitePool;

use blockhost::db::{self, BlockInstance};
use blockhost::instance_manager::{InstanceManager, InstanceManagerConfig};
use blockhost::sandbox::{MockSandbox, SandboxRuntime};
use blockhost::version_registry::VersionRegistry;

/// Entry file name used throughout the tests.
pub const ENTRY_FILE: &str = "index.js";

/// Open a fresh in-memory database with migrations applied.
pub async fn memory_pool() -> SqlitePool {
    let pool = db::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    blockhost::migrations::run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Test context that manages database, sandbox and block directories.
pub struct TestContext {
    pub pool: SqlitePool,
    pub sandbox: Arc<MockSandbox>,
    pub registry: Arc<VersionRegistry>,
    pub manager: Arc<InstanceManager>,
    pub blocks_dir: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TestContext {
    /// Create a context around a plain mock sandbox.
    pub async fn new() -> Self {
        Self::with_sandbox(MockSandbox::new()).await
    }

    /// Create a context around a preconfigured mock sandbox.
    pub async fn with_sandbox(sandbox: MockSandbox) -> Self {
        Self::with_options(sandbox, serde_json::json!({})).await
    }

    /// Create a context with a capability set injected on every start.
    pub async fn with_options(sandbox: MockSandbox, capabilities: Value) -> Self {
        let pool = memory_pool().await;
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let blocks_dir = temp_dir.path().to_path_buf();

        let sandbox = Arc::new(sandbox);
        let registry = Arc::new(VersionRegistry::new(pool.clone()));
        let manager = Arc::new(InstanceManager::new(
            pool.clone(),
            registry.clone(),
            sandbox.clone() as Arc<dyn SandboxRuntime>,
            InstanceManagerConfig {
                capabilities,
                entry_file: ENTRY_FILE.to_string(),
            },
        ));

        Self {
            pool,
            sandbox,
            registry,
            manager,
            blocks_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Directory a block version's code would live in. Not created.
    pub fn version_dir(&self, name: &str, version: &str) -> PathBuf {
        self.blocks_dir.join(name).join(version)
    }

    /// Create a version folder with an entry file and return its path.
    pub fn write_block(&self, name: &str, version: &str) -> PathBuf {
        let dir = self.version_dir(name, version);
        std::fs::create_dir_all(&dir).expect("Failed to create block dir");
        std::fs::write(dir.join(ENTRY_FILE), "console.log('block');\n")
            .expect("Failed to write entry file");
        dir
    }

    /// Register a version pointing at `path`.
    pub async fn associate_at(&self, name: &str, version: &str, path: &std::path::Path) {
        self.registry
            .associate(name, version, &path.to_string_lossy(), None)
            .await
            .expect("Failed to associate version");
    }

    /// Write a block's code, register it and create one instance of it.
    pub async fn deployed_instance(&self, name: &str, version: &str) -> BlockInstance {
        if self.registry.get(name, version).await.unwrap().is_none() {
            let dir = self.write_block(name, version);
            self.associate_at(name, version, &dir).await;
        }
        self.manager
            .create(name, version)
            .await
            .expect("Failed to create instance")
    }
}
