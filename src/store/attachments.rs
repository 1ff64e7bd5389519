// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Attachment metadata CRUD (spec §3 Attachment, §4.B).
//!
//! The `local_path` column is written only once the content cache has the
//! bytes on disk (see `cache::AttachmentCache`); it starts `NULL` for
//! metadata recorded from a provider listing that hasn't been fetched yet.

use crate::error::{CoreError, CoreResult};
use crate::store::models::Attachment;
use crate::store::Store;
use chrono::Utc;
use sqlx::FromRow;

#[derive(FromRow)]
struct AttachmentRow {
    id: i64,
    email_id: i64,
    filename: String,
    mime_type: String,
    size_bytes: i64,
    content_id: Option<String>,
    provider_attachment_id: String,
    local_path: Option<String>,
    created_at: String,
}

impl AttachmentRow {
    fn into_attachment(self) -> CoreResult<Attachment> {
        Ok(Attachment {
            id: self.id,
            email_id: self.email_id,
            filename: self.filename,
            mime_type: self.mime_type,
            size_bytes: self.size_bytes,
            content_id: self.content_id,
            provider_attachment_id: self.provider_attachment_id,
            local_path: self.local_path,
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map_err(|e| CoreError::IntegrityError(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

pub struct NewAttachment {
    pub email_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub content_id: Option<String>,
    pub provider_attachment_id: String,
}

pub async fn record_attachment(store: &Store, new: NewAttachment) -> CoreResult<Attachment> {
    let id = sqlx::query(
        "INSERT INTO attachments (email_id, filename, mime_type, size_bytes, content_id, provider_attachment_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new.email_id)
    .bind(&new.filename)
    .bind(&new.mime_type)
    .bind(new.size_bytes)
    .bind(&new.content_id)
    .bind(&new.provider_attachment_id)
    .bind(Utc::now().to_rfc3339())
    .execute(store.pool())
    .await?
    .last_insert_rowid();

    get_attachment(store, id).await
}

pub async fn get_attachment(store: &Store, id: i64) -> CoreResult<Attachment> {
    let row: AttachmentRow = sqlx::query_as("SELECT * FROM attachments WHERE id = ?")
        .bind(id)
        .fetch_optional(store.pool())
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("attachment {id}")))?;
    row.into_attachment()
}

pub async fn list_for_email(store: &Store, email_id: i64) -> CoreResult<Vec<Attachment>> {
    let rows: Vec<AttachmentRow> =
        sqlx::query_as("SELECT * FROM attachments WHERE email_id = ? ORDER BY id ASC")
            .bind(email_id)
            .fetch_all(store.pool())
            .await?;
    rows.into_iter().map(AttachmentRow::into_attachment).collect()
}

pub async fn set_local_path(store: &Store, id: i64, local_path: &str) -> CoreResult<()> {
    let result = sqlx::query("UPDATE attachments SET local_path = ? WHERE id = ?")
        .bind(local_path)
        .bind(id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("attachment {id}")));
    }
    Ok(())
}

pub async fn clear_local_path(store: &Store, id: i64) -> CoreResult<()> {
    sqlx::query("UPDATE attachments SET local_path = NULL WHERE id = ?")
        .bind(id)
        .execute(store.pool())
        .await?;
    Ok(())
}

/// Replace every attachment row for `email_id` with `new_attachments` in one
/// transaction (spec §4.F upsertAttachmentsForEmail). `ON DELETE CASCADE`
/// would handle removal via the email row, but a sync pass needs to redo just
/// the attachment set for an email that already exists -- re-synced messages
/// drop any cached `local_path`, which is fine: the bytes are refetched into
/// the cache on next access.
pub async fn replace_for_email(store: &Store, email_id: i64, new_attachments: Vec<NewAttachment>) -> CoreResult<Vec<Attachment>> {
    let mut tx = store.pool().begin().await?;

    sqlx::query("DELETE FROM attachments WHERE email_id = ?")
        .bind(email_id)
        .execute(&mut *tx)
        .await?;

    let mut ids = Vec::with_capacity(new_attachments.len());
    for new in &new_attachments {
        let id = sqlx::query(
            "INSERT INTO attachments (email_id, filename, mime_type, size_bytes, content_id, provider_attachment_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(email_id)
        .bind(&new.filename)
        .bind(&new.mime_type)
        .bind(new.size_bytes)
        .bind(&new.content_id)
        .bind(&new.provider_attachment_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        ids.push(id);
    }

    tx.commit().await?;

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        out.push(get_attachment(store, id).await?);
    }
    Ok(out)
}

/// Cache entries ordered oldest-`created_at`-first, for LRU eviction (spec §4.B).
pub async fn list_cached_oldest_first(store: &Store) -> CoreResult<Vec<Attachment>> {
    let rows: Vec<AttachmentRow> = sqlx::query_as(
        "SELECT * FROM attachments WHERE local_path IS NOT NULL ORDER BY created_at ASC",
    )
    .fetch_all(store.pool())
    .await?;
    rows.into_iter().map(AttachmentRow::into_attachment).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::accounts::{create_account, NewAccount};
    use crate::store::emails::{upsert_email, IncomingEmail};
    use crate::store::models::{Address, AuthTag, ProviderTag};
    use std::collections::{BTreeMap, BTreeSet};

    async fn seed_email(store: &Store) -> i64 {
        let account = create_account(
            store,
            NewAccount {
                provider: ProviderTag::Custom,
                email: "owner@example.com".into(),
                auth: AuthTag::Imap,
                display_name: None,
                oauth: None,
                imap: None,
            },
        )
        .await
        .unwrap();

        upsert_email(
            store,
            IncomingEmail {
                account_id: account.id,
                provider_message_id: "m1".into(),
                thread_id: "t1".into(),
                from: Address {
                    address: "a@b.com".into(),
                    name: None,
                },
                to: vec![],
                cc: vec![],
                bcc: vec![],
                subject: "s".into(),
                body_text: None,
                body_html: None,
                snippet: "".into(),
                date: Utc::now(),
                flags: BTreeSet::new(),
                labels: vec![],
                in_reply_to: None,
                references: vec![],
                raw_headers: BTreeMap::new(),
                size_bytes: 0,
                has_attachments: true,
                attachments: vec![],
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn record_and_fetch_roundtrip() {
        let store = Store::open_in_memory().await.unwrap();
        let email_id = seed_email(&store).await;

        let attachment = record_attachment(
            &store,
            NewAttachment {
                email_id,
                filename: "invoice.pdf".into(),
                mime_type: "application/pdf".into(),
                size_bytes: 2048,
                content_id: None,
                provider_attachment_id: "att-1".into(),
            },
        )
        .await
        .unwrap();

        assert!(attachment.local_path.is_none());
        set_local_path(&store, attachment.id, "/cache/abc123.pdf").await.unwrap();
        let fetched = get_attachment(&store, attachment.id).await.unwrap();
        assert_eq!(fetched.local_path.as_deref(), Some("/cache/abc123.pdf"));

        let for_email = list_for_email(&store, email_id).await.unwrap();
        assert_eq!(for_email.len(), 1);
    }
}
