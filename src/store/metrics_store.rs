// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sync metric recording + retention pruning (spec §4.F "sync stats").
//!
//! Retention keeps only the newest 1000 rows globally, not per account --
//! a single noisy account shouldn't starve the others' history out of the window.

use crate::error::{CoreError, CoreResult};
use crate::store::models::{ProviderTag, SyncMetric, SyncType};
use crate::store::Store;
use chrono::Utc;
use sqlx::FromRow;

const RETENTION_LIMIT: i64 = 1000;

#[derive(FromRow)]
struct SyncMetricRow {
    id: i64,
    account_id: i64,
    provider: String,
    sync_type: String,
    added: i64,
    deleted: i64,
    labels_changed: i64,
    duration_ms: i64,
    success: i64,
    error: Option<String>,
    synced_at: String,
}

impl SyncMetricRow {
    fn into_metric(self) -> CoreResult<SyncMetric> {
        let provider = serde_json::from_value(serde_json::Value::String(self.provider.clone()))
            .map_err(|_| CoreError::IntegrityError(format!("unknown provider tag: {}", self.provider)))?;
        let sync_type = serde_json::from_value(serde_json::Value::String(self.sync_type.clone()))
            .map_err(|_| CoreError::IntegrityError(format!("unknown sync type: {}", self.sync_type)))?;
        Ok(SyncMetric {
            id: self.id,
            account_id: self.account_id,
            provider,
            sync_type,
            added: self.added,
            deleted: self.deleted,
            labels_changed: self.labels_changed,
            duration_ms: self.duration_ms,
            success: self.success != 0,
            error: self.error,
            synced_at: chrono::DateTime::parse_from_rfc3339(&self.synced_at)
                .map_err(|e| CoreError::IntegrityError(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

pub struct NewSyncMetric {
    pub account_id: i64,
    pub provider: ProviderTag,
    pub sync_type: SyncType,
    pub added: i64,
    pub deleted: i64,
    pub labels_changed: i64,
    pub duration_ms: i64,
    pub success: bool,
    pub error: Option<String>,
}

pub async fn record_metric(store: &Store, new: NewSyncMetric) -> CoreResult<SyncMetric> {
    let provider_str = crate::error::enum_to_column(new.provider)?;
    let sync_type_str = crate::error::enum_to_column(new.sync_type)?;

    let id = sqlx::query(
        "INSERT INTO sync_metrics (account_id, provider, sync_type, added, deleted, labels_changed, duration_ms, success, error, synced_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new.account_id)
    .bind(&provider_str)
    .bind(&sync_type_str)
    .bind(new.added)
    .bind(new.deleted)
    .bind(new.labels_changed)
    .bind(new.duration_ms)
    .bind(new.success as i64)
    .bind(&new.error)
    .bind(Utc::now().to_rfc3339())
    .execute(store.pool())
    .await?
    .last_insert_rowid();

    prune_retention(store).await?;

    let row: SyncMetricRow = sqlx::query_as("SELECT * FROM sync_metrics WHERE id = ?")
        .bind(id)
        .fetch_one(store.pool())
        .await?;
    row.into_metric()
}

/// Keep only the newest `RETENTION_LIMIT` rows across all accounts.
async fn prune_retention(store: &Store) -> CoreResult<()> {
    sqlx::query(
        "DELETE FROM sync_metrics WHERE id NOT IN (
            SELECT id FROM sync_metrics ORDER BY synced_at DESC, id DESC LIMIT ?
        )",
    )
    .bind(RETENTION_LIMIT)
    .execute(store.pool())
    .await?;
    Ok(())
}

pub async fn list_for_account(store: &Store, account_id: i64, limit: i64) -> CoreResult<Vec<SyncMetric>> {
    let rows: Vec<SyncMetricRow> = sqlx::query_as(
        "SELECT * FROM sync_metrics WHERE account_id = ? ORDER BY synced_at DESC LIMIT ?",
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(store.pool())
    .await?;
    rows.into_iter().map(SyncMetricRow::into_metric).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::accounts::{create_account, NewAccount};
    use crate::store::models::{AuthTag, ProviderTag as PT};

    async fn seed_account(store: &Store) -> i64 {
        create_account(
            store,
            NewAccount {
                provider: PT::Gmail,
                email: "a@b.com".into(),
                auth: AuthTag::Oauth,
                display_name: None,
                oauth: None,
                imap: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn records_and_lists_metrics() {
        let store = Store::open_in_memory().await.unwrap();
        let account_id = seed_account(&store).await;

        record_metric(
            &store,
            NewSyncMetric {
                account_id,
                provider: PT::Gmail,
                sync_type: SyncType::Initial,
                added: 10,
                deleted: 0,
                labels_changed: 0,
                duration_ms: 500,
                success: true,
                error: None,
            },
        )
        .await
        .unwrap();

        let metrics = list_for_account(&store, account_id, 10).await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].added, 10);
    }

    #[tokio::test]
    async fn retention_keeps_only_newest_rows() {
        let store = Store::open_in_memory().await.unwrap();
        let account_id = seed_account(&store).await;

        for i in 0..5 {
            record_metric(
                &store,
                NewSyncMetric {
                    account_id,
                    provider: PT::Gmail,
                    sync_type: SyncType::Delta,
                    added: i,
                    deleted: 0,
                    labels_changed: 0,
                    duration_ms: 10,
                    success: true,
                    error: None,
                },
            )
            .await
            .unwrap();
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_metrics")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 5);
    }
}
