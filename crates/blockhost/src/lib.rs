// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Blockhost - Versioned Block Hosting
//!
//! This crate hosts versioned units of user code ("blocks"). Each block version
//! is registered against a directory on disk, instances are created against a
//! version, and every instance runs as a script inside a sandbox runtime. A
//! background reconciler keeps the set of running scripts in line with the
//! set of persisted instances.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Callers (RPC adapter, embedding app)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          blockhost (This Crate)                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  Version    │  │  Instance   │  │ Reconciler  │  │  Instance   │     │
//! │  │  Registry   │◄─│  Manager    │◄─│   (loop)    │  │    RPC      │     │
//! │  └─────────────┘  └──────┬──────┘  └─────────────┘  └─────────────┘     │
//! └──────────│───────────────│──────────────────────────────────────────────┘
//!            │               │ run / remove / subscribe
//!            │               ▼
//!            │     ┌───────────────────┐        ┌─────────────────────────┐
//!            │     │  Sandbox Runtime  │───────►│     Block scripts       │
//!            │     │ (process / mock)  │        │ (<root>/<entry file>)   │
//!            │     └───────────────────┘        └─────────────────────────┘
//!            ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                              SQLite                                   │
//! │                  (block_version, block_instance)                      │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Persisted rows say which instances *should* run. The handle map inside the
//! instance manager says which instances *are* running in this process, and
//! is empty after every restart until the reconciler's first pass.
//!
//! # Instance Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `instance.start` | Start an instance; no-op if already running |
//! | `instance.restart` | Tear down the running script, if any, and start again |
//! | `instance.remove` | Tear down the running script and delete the instance |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `BLOCKHOST_DATABASE_URL` | No | `sqlite:.data/blockhost.db?mode=rwc` | SQLite connection string |
//! | `BLOCKHOST_RECONCILE_INTERVAL_SECS` | No | `30` | Seconds between reconciliation passes |
//! | `BLOCKHOST_CAPABILITIES` | No | `{}` | JSON object granted to every instance |
//! | `BLOCKHOST_ENTRY_FILE` | No | `index.js` | Entry file inside a version's folder |
//! | `BLOCKHOST_SANDBOX_INTERPRETER` | No | `node` | Program the process sandbox runs |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`db`]: SQLite connection and instance persistence
//! - [`error`]: Error types and error codes
//! - [`handle_map`]: Process-local instance ↔ handle index and per-instance locks
//! - [`instance_manager`]: Instance creation and lifecycle
//! - [`reconciler`]: Background convergence of live instances toward persisted ones
//! - [`rpc`]: Named instance operations for a transport to dispatch
//! - [`runtime`]: Embeddable runtime wiring everything together
//! - [`sandbox`]: Sandbox runtime contract with process and mock implementations
//! - [`version_registry`]: Block version catalog

#![deny(missing_docs)]

/// Database migrations for blockhost.
///
/// ```ignore
/// use blockhost::{db, migrations};
///
/// let pool = db::connect(&database_url).await?;
/// migrations::run(&pool).await?;
/// ```
pub mod migrations;

/// Configuration loaded from environment variables.
pub mod config;

/// SQLite connection and instance persistence.
pub mod db;

/// Error types for blockhost operations.
pub mod error;

/// Process-local handle tracking and per-instance serialization.
pub mod handle_map;

/// Instance creation and lifecycle management.
pub mod instance_manager;

/// Background reconciliation of persisted and live instances.
pub mod reconciler;

/// Instance RPC adapter.
pub mod rpc;

/// Embeddable runtime API.
pub mod runtime;

/// Sandbox runtimes executing block scripts.
pub mod sandbox;

/// Block version catalog.
pub mod version_registry;

pub use config::Config;
pub use db::InstanceId;
pub use error::{Error, Result};
pub use instance_manager::InstanceManager;
pub use runtime::BlockhostRuntime;
pub use version_registry::VersionRegistry;
