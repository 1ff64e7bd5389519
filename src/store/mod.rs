// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Unified ACID-backed mail store (spec §4.A).

pub mod accounts;
pub mod attachments;
pub mod audit_store;
pub mod emails;
pub mod metrics_store;
pub mod migrations;
pub mod models;
pub mod rules_store;
pub mod schema;

use crate::error::CoreResult;
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Handle to the unified store. Cheap to clone -- wraps a pooled connection.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if absent) the SQLite database at `db_path`, enable WAL
    /// mode and foreign key enforcement, and run pending migrations.
    pub async fn open(db_path: &str) -> CoreResult<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))
            .map_err(|e| crate::error::CoreError::IntegrityError(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let version = migrations::run_migrations(&pool).await?;
        info!("store opened at {db_path}, schema version {version}");

        Ok(Self { pool })
    }

    /// Open an in-memory store. Used by tests and anywhere ephemeral state suffices.
    pub async fn open_in_memory() -> CoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        migrations::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_in_memory_and_runs_migrations() {
        let store = Store::open_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM migrations")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.0, schema::MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn opens_file_backed_store_creating_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("intentmail.db");
        let store = Store::open(db_path.to_str().unwrap()).await.unwrap();
        store.close().await;
    }
}
