// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database operations for persisted block instances.
//!
//! An instance row records that a unit *should* be running. It never says
//! whether it *is* running; that lives in the process-local handle map.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// Surrogate identifier of a persisted block instance.
pub type InstanceId = i64;

/// Instance record from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockInstance {
    /// Surrogate instance id.
    pub id: InstanceId,
    /// Version this instance runs.
    pub block_version_id: i64,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the instance was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Instance joined with the version it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstanceWithVersion {
    /// Surrogate instance id.
    pub id: InstanceId,
    /// Version this instance runs.
    pub block_version_id: i64,
    /// Block name (from block_version).
    pub block_name: String,
    /// Block version (from block_version).
    pub block_version: String,
    /// Root directory of the version's code (from block_version).
    pub path: String,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the instance was last updated.
    pub updated_at: DateTime<Utc>,
}

impl InstanceWithVersion {
    /// Script name handed to the sandbox: `<name>@<version>`.
    pub fn script_name(&self) -> String {
        format!("{}@{}", self.block_name, self.block_version)
    }
}

/// Open a SQLite pool with foreign key enforcement on.
///
/// In-memory databases are pinned to a single connection that is never
/// recycled, since every new connection would see an empty database.
pub async fn connect(database_url: &str) -> crate::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    if in_memory {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        return Ok(pool);
    }

    if let Some(parent) = options.get_filename().parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Insert an instance row referencing `block_version_id`.
///
/// Fails with a foreign key violation if the version row does not exist.
pub async fn insert_instance(
    pool: &SqlitePool,
    block_version_id: i64,
) -> Result<BlockInstance, sqlx::Error> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO block_instance (block_version_id, created_at, updated_at)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(block_version_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(BlockInstance {
        id: result.last_insert_rowid(),
        block_version_id,
        created_at: now,
        updated_at: now,
    })
}

/// Get an instance together with its version.
pub async fn get_instance_with_version(
    pool: &SqlitePool,
    instance_id: InstanceId,
) -> Result<Option<InstanceWithVersion>, sqlx::Error> {
    sqlx::query_as::<_, InstanceWithVersion>(
        r#"
        SELECT i.id, i.block_version_id, v.name AS block_name, v.version AS block_version,
               v.path, i.created_at, i.updated_at
        FROM block_instance i
        JOIN block_version v ON v.id = i.block_version_id
        WHERE i.id = ?
        "#,
    )
    .bind(instance_id)
    .fetch_optional(pool)
    .await
}

/// List every instance together with its version, oldest first.
pub async fn list_instances_with_version(
    pool: &SqlitePool,
) -> Result<Vec<InstanceWithVersion>, sqlx::Error> {
    sqlx::query_as::<_, InstanceWithVersion>(
        r#"
        SELECT i.id, i.block_version_id, v.name AS block_name, v.version AS block_version,
               v.path, i.created_at, i.updated_at
        FROM block_instance i
        JOIN block_version v ON v.id = i.block_version_id
        ORDER BY i.id
        "#,
    )
    .fetch_all(pool)
    .await
}

/// List the ids of every persisted instance.
pub async fn list_instance_ids(pool: &SqlitePool) -> Result<Vec<InstanceId>, sqlx::Error> {
    sqlx::query_scalar::<_, InstanceId>("SELECT id FROM block_instance ORDER BY id")
        .fetch_all(pool)
        .await
}

/// Delete an instance row. Returns whether a row was removed.
pub async fn delete_instance(pool: &SqlitePool, instance_id: InstanceId) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM block_instance WHERE id = ?")
        .bind(instance_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
