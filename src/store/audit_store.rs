// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Audit log CRUD + rollback bookkeeping (spec §3 AuditLogEntry, §4.H).

use crate::error::{CoreError, CoreResult};
use crate::store::models::{AuditLogEntry, EmailStateSnapshot};
use crate::store::Store;
use chrono::Utc;
use sqlx::FromRow;

#[derive(FromRow)]
struct AuditLogRow {
    id: i64,
    rule_id: i64,
    email_id: i64,
    matched: i64,
    applied_actions_json: String,
    dry_run: i64,
    executed_at: String,
    error: Option<String>,
    state_before_json: String,
    state_after_json: Option<String>,
    rolled_back: i64,
    rolled_back_at: Option<String>,
}

impl AuditLogRow {
    fn into_entry(self) -> CoreResult<AuditLogEntry> {
        Ok(AuditLogEntry {
            id: self.id,
            rule_id: self.rule_id,
            email_id: self.email_id,
            matched: self.matched != 0,
            applied_actions: serde_json::from_str(&self.applied_actions_json)?,
            dry_run: self.dry_run != 0,
            executed_at: chrono::DateTime::parse_from_rfc3339(&self.executed_at)
                .map_err(|e| CoreError::IntegrityError(e.to_string()))?
                .with_timezone(&Utc),
            error: self.error,
            state_before: serde_json::from_str(&self.state_before_json)?,
            state_after: self
                .state_after_json
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            rolled_back: self.rolled_back != 0,
            rolled_back_at: self
                .rolled_back_at
                .map(|s| {
                    chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc))
                })
                .transpose()
                .map_err(|e: chrono::ParseError| CoreError::IntegrityError(e.to_string()))?,
        })
    }
}

pub struct NewAuditEntry {
    pub rule_id: i64,
    pub email_id: i64,
    pub matched: bool,
    pub applied_actions: Vec<String>,
    pub dry_run: bool,
    pub error: Option<String>,
    pub state_before: EmailStateSnapshot,
    pub state_after: Option<EmailStateSnapshot>,
}

pub async fn record_entry(store: &Store, new: NewAuditEntry) -> CoreResult<AuditLogEntry> {
    let id = sqlx::query(
        "INSERT INTO audit_log (rule_id, email_id, matched, applied_actions_json, dry_run, executed_at, error, state_before_json, state_after_json)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new.rule_id)
    .bind(new.email_id)
    .bind(new.matched as i64)
    .bind(serde_json::to_string(&new.applied_actions)?)
    .bind(new.dry_run as i64)
    .bind(Utc::now().to_rfc3339())
    .bind(&new.error)
    .bind(serde_json::to_string(&new.state_before)?)
    .bind(new.state_after.as_ref().map(serde_json::to_string).transpose()?)
    .execute(store.pool())
    .await?
    .last_insert_rowid();

    get_entry(store, id).await
}

pub async fn get_entry(store: &Store, id: i64) -> CoreResult<AuditLogEntry> {
    let row: AuditLogRow = sqlx::query_as("SELECT * FROM audit_log WHERE id = ?")
        .bind(id)
        .fetch_optional(store.pool())
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("audit log entry {id}")))?;
    row.into_entry()
}

pub async fn list_for_rule(store: &Store, rule_id: i64) -> CoreResult<Vec<AuditLogEntry>> {
    let rows: Vec<AuditLogRow> = sqlx::query_as(
        "SELECT * FROM audit_log WHERE rule_id = ? ORDER BY executed_at DESC",
    )
    .bind(rule_id)
    .fetch_all(store.pool())
    .await?;
    rows.into_iter().map(AuditLogRow::into_entry).collect()
}

pub async fn list_for_email(store: &Store, email_id: i64) -> CoreResult<Vec<AuditLogEntry>> {
    let rows: Vec<AuditLogRow> = sqlx::query_as(
        "SELECT * FROM audit_log WHERE email_id = ? ORDER BY executed_at DESC",
    )
    .bind(email_id)
    .fetch_all(store.pool())
    .await?;
    rows.into_iter().map(AuditLogRow::into_entry).collect()
}

pub async fn mark_rolled_back(store: &Store, id: i64) -> CoreResult<()> {
    let result = sqlx::query("UPDATE audit_log SET rolled_back = 1, rolled_back_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("audit log entry {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn snapshot() -> EmailStateSnapshot {
        EmailStateSnapshot {
            labels: vec!["INBOX".into()],
            flags: BTreeSet::new(),
            last_modified: Utc::now(),
        }
    }

    #[tokio::test]
    async fn record_and_roll_back_entry() {
        let store = Store::open_in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO accounts (provider, email, auth, is_active, uid_validity, highest_modseq, created_at, updated_at) VALUES ('custom', 'a@b.com', 'imap', 1, '{}', '{}', datetime('now'), datetime('now'))",
        )
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO rules (account_id, name, trigger, conditions_json, actions_json, is_active, created_at, updated_at) VALUES (1, 'r', 'onNewEmail', '[]', '[]', 1, datetime('now'), datetime('now'))",
        )
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO emails (account_id, provider_message_id, thread_id, from_address, date, received_at, created_at, updated_at) VALUES (1, 'm', 't', 'a@b.com', datetime('now'), datetime('now'), datetime('now'), datetime('now'))",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let entry = record_entry(
            &store,
            NewAuditEntry {
                rule_id: 1,
                email_id: 1,
                matched: true,
                applied_actions: vec!["archive".into()],
                dry_run: false,
                error: None,
                state_before: snapshot(),
                state_after: Some(snapshot()),
            },
        )
        .await
        .unwrap();

        assert!(!entry.rolled_back);
        mark_rolled_back(&store, entry.id).await.unwrap();
        let refreshed = get_entry(&store, entry.id).await.unwrap();
        assert!(refreshed.rolled_back);
        assert!(refreshed.rolled_back_at.is_some());
    }
}
