// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Ordered, checksum-verified migrations (spec §4.A).
//!
//! Each declared migration's DDL is hashed with SHA-256. A previously applied
//! migration whose checksum no longer matches fails loudly at startup --
//! that's tampering or an in-place edit of supposedly-immutable history, not
//! something to silently reapply.

use crate::error::{CoreError, CoreResult};
use crate::store::schema::MIGRATIONS;
use log::{info, warn};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

fn checksum(sql: &str) -> String {
    let digest = Sha256::digest(sql.as_bytes());
    hex::encode(digest)
}

async fn ensure_migrations_table(pool: &SqlitePool) -> CoreResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Apply every migration not yet recorded, verifying checksums of ones that are.
///
/// Returns the current schema version (`max(applied)`).
pub async fn run_migrations(pool: &SqlitePool) -> CoreResult<i64> {
    ensure_migrations_table(pool).await?;

    let mut current_version = 0i64;

    for migration in MIGRATIONS {
        let sum = checksum(migration.sql);

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT checksum FROM migrations WHERE version = ?")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;

        match existing {
            Some((recorded_checksum,)) => {
                if recorded_checksum != sum {
                    return Err(CoreError::IntegrityError(format!(
                        "migration {} ({}) checksum mismatch: recorded {} computed {}",
                        migration.version, migration.name, recorded_checksum, sum
                    )));
                }
                current_version = current_version.max(migration.version);
            }
            None => {
                info!(
                    "applying migration {} ({})",
                    migration.version, migration.name
                );
                let mut tx = pool.begin().await?;
                sqlx::query(migration.sql).execute(&mut *tx).await?;
                sqlx::query(
                    "INSERT INTO migrations (version, name, checksum, applied_at) VALUES (?, ?, ?, ?)",
                )
                .bind(migration.version)
                .bind(migration.name)
                .bind(&sum)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                current_version = current_version.max(migration.version);
            }
        }
    }

    let row = sqlx::query("SELECT COALESCE(MAX(version), 0) as v FROM migrations")
        .fetch_one(pool)
        .await?;
    let recorded_max: i64 = row.try_get("v")?;
    if recorded_max != current_version {
        warn!(
            "migrations table max version {} differs from declared set max {}",
            recorded_max, current_version
        );
    }

    Ok(current_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn applies_all_migrations_and_is_idempotent() {
        let pool = memory_pool().await;
        let v1 = run_migrations(&pool).await.unwrap();
        assert_eq!(v1, MIGRATIONS.last().unwrap().version);

        // Re-running against the same pool must be a no-op, not a re-apply.
        let v2 = run_migrations(&pool).await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn tampered_checksum_is_rejected() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query("UPDATE migrations SET checksum = 'deadbeef' WHERE version = 1")
            .execute(&pool)
            .await
            .unwrap();

        let err = run_migrations(&pool).await.unwrap_err();
        assert!(matches!(err, CoreError::IntegrityError(_)));
    }
}
