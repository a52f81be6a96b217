// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Version Registry
//!
//! Durable catalog mapping a block's (name, version) pair to the directory
//! holding its code. Uniqueness and in-use protection are enforced by the
//! storage engine at write time; the registry only translates the resulting
//! constraint violations into domain errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{Error, Result, is_foreign_key_violation, is_unique_violation};

/// A registered block version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockVersion {
    /// Surrogate version id
    pub id: i64,
    /// Block name
    pub name: String,
    /// Block version string
    pub version: String,
    /// Root directory of the version's code
    pub path: String,
    /// When the version was associated
    pub created_at: DateTime<Utc>,
    /// When the version was last updated
    pub updated_at: DateTime<Utc>,
}

/// Version registry - manages block versions in the database.
pub struct VersionRegistry {
    pool: SqlitePool,
}

impl VersionRegistry {
    /// Create a new version registry
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Associate a (name, version) pair with a code location.
    ///
    /// Pass `Some(conn)` to run inside a transaction the caller already holds
    /// (for example `Some(&mut *tx)`); with `None` the pool is used.
    ///
    /// Fails with [`Error::VersionAlreadyExists`] when the pair is taken.
    pub async fn associate(
        &self,
        name: &str,
        version: &str,
        path: &str,
        conn: Option<&mut SqliteConnection>,
    ) -> Result<BlockVersion> {
        let now = Utc::now();
        let query = sqlx::query(
            r#"
            INSERT INTO block_version (name, version, path, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(version)
        .bind(path)
        .bind(now)
        .bind(now);

        let result = match conn {
            Some(conn) => query.execute(conn).await,
            None => query.execute(&self.pool).await,
        };

        let result = match result {
            Ok(result) => result,
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::VersionAlreadyExists {
                    name: name.to_string(),
                    version: version.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        info!(name = %name, version = %version, path = %path, "Associated block version");

        Ok(BlockVersion {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            version: version.to_string(),
            path: path.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Remove a (name, version) association.
    ///
    /// Succeeds without doing anything when no such version exists. Fails with
    /// [`Error::VersionInUse`] if instances still reference the version.
    /// Returns whether a row was deleted.
    pub async fn unassociate(
        &self,
        name: &str,
        version: &str,
        conn: Option<&mut SqliteConnection>,
    ) -> Result<bool> {
        let query = sqlx::query("DELETE FROM block_version WHERE name = ? AND version = ?")
            .bind(name)
            .bind(version);

        let result = match conn {
            Some(conn) => query.execute(conn).await,
            None => query.execute(&self.pool).await,
        };

        match result {
            Ok(result) if result.rows_affected() == 0 => {
                debug!(name = %name, version = %version, "No block version to unassociate");
                Ok(false)
            }
            Ok(_) => {
                info!(name = %name, version = %version, "Unassociated block version");
                Ok(true)
            }
            Err(e) if is_foreign_key_violation(&e) => Err(Error::VersionInUse {
                name: name.to_string(),
                version: version.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Get a version by (name, version)
    pub async fn get(&self, name: &str, version: &str) -> Result<Option<BlockVersion>> {
        let row = sqlx::query_as::<_, BlockVersion>(
            r#"
            SELECT id, name, version, path, created_at, updated_at
            FROM block_version
            WHERE name = ? AND version = ?
            "#,
        )
        .bind(name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Get a version by id
    pub async fn get_by_id(&self, id: i64) -> Result<Option<BlockVersion>> {
        let row = sqlx::query_as::<_, BlockVersion>(
            r#"
            SELECT id, name, version, path, created_at, updated_at
            FROM block_version
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// List all versions, ordered by name then version
    pub async fn list(&self) -> Result<Vec<BlockVersion>> {
        let rows = sqlx::query_as::<_, BlockVersion>(
            r#"
            SELECT id, name, version, path, created_at, updated_at
            FROM block_version
            ORDER BY name, version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// List all versions of one block
    pub async fn list_by_name(&self, name: &str) -> Result<Vec<BlockVersion>> {
        let rows = sqlx::query_as::<_, BlockVersion>(
            r#"
            SELECT id, name, version, path, created_at, updated_at
            FROM block_version
            WHERE name = ?
            ORDER BY created_at, id
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
