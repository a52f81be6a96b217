// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for blockhost.
//!
//! # Example
//!
//! ```ignore
//! use blockhost::{db, migrations};
//!
//! let pool = db::connect("sqlite:.data/blockhost.db?mode=rwc").await?;
//! migrations::run(&pool).await?;
//! ```

use sqlx::SqlitePool;
use sqlx::migrate::Migrator;

use crate::error::Result;

/// SQLite migrator with the block registry schema embedded.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run all migrations.
///
/// Safe to call multiple times; already-applied migrations are skipped.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}
