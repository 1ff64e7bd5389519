// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Email CRUD and label/flag set-operations (spec §3 Email, §4.A, §4.F).

use crate::error::{CoreError, CoreResult};
use crate::store::models::{Address, Email, Flag, IncomingAttachment};
use crate::store::Store;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::{BTreeMap, BTreeSet};

#[derive(FromRow)]
struct EmailRow {
    id: i64,
    account_id: i64,
    provider_message_id: String,
    thread_id: String,
    from_address: String,
    from_name: Option<String>,
    to_json: String,
    cc_json: String,
    bcc_json: String,
    subject: String,
    body_text: Option<String>,
    body_html: Option<String>,
    snippet: String,
    date: String,
    received_at: String,
    flags: String,
    labels_json: String,
    in_reply_to: Option<String>,
    references_json: String,
    raw_headers_json: String,
    size_bytes: i64,
    has_attachments: i64,
    created_at: String,
    updated_at: String,
}

fn parse_dt(s: &str) -> CoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| CoreError::IntegrityError(e.to_string()))?
        .with_timezone(&Utc))
}

fn flags_to_str(flags: &BTreeSet<Flag>) -> CoreResult<String> {
    Ok(flags
        .iter()
        .map(|f| crate::error::enum_to_column(f))
        .collect::<CoreResult<Vec<_>>>()?
        .join(","))
}

fn flags_from_str(s: &str) -> CoreResult<BTreeSet<Flag>> {
    s.split(',')
        .filter(|p| !p.is_empty())
        .map(|p| {
            serde_json::from_value(serde_json::Value::String(p.to_string()))
                .map_err(|_| CoreError::IntegrityError(format!("unknown flag: {p}")))
        })
        .collect()
}

impl EmailRow {
    fn into_email(self) -> CoreResult<Email> {
        Ok(Email {
            id: self.id,
            account_id: self.account_id,
            provider_message_id: self.provider_message_id,
            thread_id: self.thread_id,
            from: Address {
                address: self.from_address,
                name: self.from_name,
            },
            to: serde_json::from_str(&self.to_json)?,
            cc: serde_json::from_str(&self.cc_json)?,
            bcc: serde_json::from_str(&self.bcc_json)?,
            subject: self.subject,
            body_text: self.body_text,
            body_html: self.body_html,
            snippet: self.snippet,
            date: parse_dt(&self.date)?,
            received_at: parse_dt(&self.received_at)?,
            flags: flags_from_str(&self.flags)?,
            labels: serde_json::from_str(&self.labels_json)?,
            in_reply_to: self.in_reply_to,
            references: serde_json::from_str(&self.references_json)?,
            raw_headers: serde_json::from_str::<BTreeMap<String, String>>(&self.raw_headers_json)?,
            size_bytes: self.size_bytes,
            has_attachments: self.has_attachments != 0,
            created_at: parse_dt(&self.created_at)?,
            updated_at: parse_dt(&self.updated_at)?,
        })
    }
}

/// Everything a provider adapter supplies for one message (spec §4.E).
pub struct IncomingEmail {
    pub account_id: i64,
    pub provider_message_id: String,
    pub thread_id: String,
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub snippet: String,
    pub date: DateTime<Utc>,
    pub flags: BTreeSet<Flag>,
    pub labels: Vec<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub raw_headers: BTreeMap<String, String>,
    pub size_bytes: i64,
    pub has_attachments: bool,
    pub attachments: Vec<IncomingAttachment>,
}

/// Insert, or update in place when `(account_id, provider_message_id)` already exists.
///
/// Idempotent by design so the sync engine can retry a batch without creating
/// duplicates (spec §4.F).
pub async fn upsert_email(store: &Store, incoming: IncomingEmail) -> CoreResult<Email> {
    let now = Utc::now();
    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM emails WHERE account_id = ? AND provider_message_id = ?",
    )
    .bind(incoming.account_id)
    .bind(&incoming.provider_message_id)
    .fetch_optional(store.pool())
    .await?;

    let id = if let Some((id,)) = existing {
        sqlx::query(
            "UPDATE emails SET thread_id = ?, from_address = ?, from_name = ?, to_json = ?, cc_json = ?, bcc_json = ?,
             subject = ?, body_text = ?, body_html = ?, snippet = ?, date = ?, received_at = ?, flags = ?, labels_json = ?,
             in_reply_to = ?, references_json = ?, raw_headers_json = ?, size_bytes = ?, has_attachments = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&incoming.thread_id)
        .bind(&incoming.from.address)
        .bind(&incoming.from.name)
        .bind(serde_json::to_string(&incoming.to)?)
        .bind(serde_json::to_string(&incoming.cc)?)
        .bind(serde_json::to_string(&incoming.bcc)?)
        .bind(&incoming.subject)
        .bind(&incoming.body_text)
        .bind(&incoming.body_html)
        .bind(&incoming.snippet)
        .bind(incoming.date.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(flags_to_str(&incoming.flags)?)
        .bind(serde_json::to_string(&incoming.labels)?)
        .bind(&incoming.in_reply_to)
        .bind(serde_json::to_string(&incoming.references)?)
        .bind(serde_json::to_string(&incoming.raw_headers)?)
        .bind(incoming.size_bytes)
        .bind(incoming.has_attachments as i64)
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(store.pool())
        .await?;
        id
    } else {
        sqlx::query(
            "INSERT INTO emails (
                account_id, provider_message_id, thread_id, from_address, from_name,
                to_json, cc_json, bcc_json, subject, body_text, body_html, snippet,
                date, received_at, flags, labels_json, in_reply_to, references_json,
                raw_headers_json, size_bytes, has_attachments, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(incoming.account_id)
        .bind(&incoming.provider_message_id)
        .bind(&incoming.thread_id)
        .bind(&incoming.from.address)
        .bind(&incoming.from.name)
        .bind(serde_json::to_string(&incoming.to)?)
        .bind(serde_json::to_string(&incoming.cc)?)
        .bind(serde_json::to_string(&incoming.bcc)?)
        .bind(&incoming.subject)
        .bind(&incoming.body_text)
        .bind(&incoming.body_html)
        .bind(&incoming.snippet)
        .bind(incoming.date.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(flags_to_str(&incoming.flags)?)
        .bind(serde_json::to_string(&incoming.labels)?)
        .bind(&incoming.in_reply_to)
        .bind(serde_json::to_string(&incoming.references)?)
        .bind(serde_json::to_string(&incoming.raw_headers)?)
        .bind(incoming.size_bytes)
        .bind(incoming.has_attachments as i64)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(store.pool())
        .await?
        .last_insert_rowid()
    };

    get_email(store, id).await
}

pub async fn get_email(store: &Store, id: i64) -> CoreResult<Email> {
    let row: EmailRow = sqlx::query_as("SELECT * FROM emails WHERE id = ?")
        .bind(id)
        .fetch_optional(store.pool())
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("email {id}")))?;
    row.into_email()
}

pub async fn get_thread(store: &Store, account_id: i64, thread_id: &str) -> CoreResult<Vec<Email>> {
    let rows: Vec<EmailRow> = sqlx::query_as(
        "SELECT * FROM emails WHERE account_id = ? AND thread_id = ? ORDER BY date ASC",
    )
    .bind(account_id)
    .bind(thread_id)
    .fetch_all(store.pool())
    .await?;
    rows.into_iter().map(EmailRow::into_email).collect()
}

pub async fn set_labels(store: &Store, id: i64, labels: Vec<String>) -> CoreResult<()> {
    let result = sqlx::query("UPDATE emails SET labels_json = ?, updated_at = ? WHERE id = ?")
        .bind(serde_json::to_string(&labels)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("email {id}")));
    }
    Ok(())
}

pub async fn add_labels(store: &Store, id: i64, labels: &[String]) -> CoreResult<()> {
    let email = get_email(store, id).await?;
    let mut set: BTreeSet<String> = email.labels.into_iter().collect();
    set.extend(labels.iter().cloned());
    set_labels(store, id, set.into_iter().collect()).await
}

pub async fn remove_labels(store: &Store, id: i64, labels: &[String]) -> CoreResult<()> {
    let email = get_email(store, id).await?;
    let to_remove: BTreeSet<&str> = labels.iter().map(|s| s.as_str()).collect();
    let remaining: Vec<String> = email
        .labels
        .into_iter()
        .filter(|l| !to_remove.contains(l.as_str()))
        .collect();
    set_labels(store, id, remaining).await
}

pub async fn set_flags(store: &Store, id: i64, flags: BTreeSet<Flag>) -> CoreResult<()> {
    let result = sqlx::query("UPDATE emails SET flags = ?, updated_at = ? WHERE id = ?")
        .bind(flags_to_str(&flags)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("email {id}")));
    }
    Ok(())
}

pub async fn delete_email(store: &Store, id: i64) -> CoreResult<()> {
    let result = sqlx::query("DELETE FROM emails WHERE id = ?")
        .bind(id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("email {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::accounts::{create_account, NewAccount};
    use crate::store::models::{AuthTag, ProviderTag};

    async fn seed_account(store: &Store) -> i64 {
        create_account(
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
        .unwrap()
        .id
    }

    fn sample(account_id: i64) -> IncomingEmail {
        IncomingEmail {
            account_id,
            provider_message_id: "msg-1".into(),
            thread_id: "thread-1".into(),
            from: Address {
                address: "sender@example.com".into(),
                name: Some("Sender".into()),
            },
            to: vec![],
            cc: vec![],
            bcc: vec![],
            subject: "Hello".into(),
            body_text: Some("hi there".into()),
            body_html: None,
            snippet: "hi there".into(),
            date: Utc::now(),
            flags: BTreeSet::new(),
            labels: vec!["INBOX".into()],
            in_reply_to: None,
            references: vec![],
            raw_headers: BTreeMap::new(),
            size_bytes: 128,
            has_attachments: false,
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_provider_message_id() {
        let store = Store::open_in_memory().await.unwrap();
        let account_id = seed_account(&store).await;

        let first = upsert_email(&store, sample(account_id)).await.unwrap();
        let mut again = sample(account_id);
        again.subject = "Hello (edited)".into();
        let second = upsert_email(&store, again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.subject, "Hello (edited)");

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM emails")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn label_add_and_remove_are_set_operations() {
        let store = Store::open_in_memory().await.unwrap();
        let account_id = seed_account(&store).await;
        let email = upsert_email(&store, sample(account_id)).await.unwrap();

        add_labels(&store, email.id, &["Work".to_string(), "INBOX".to_string()])
            .await
            .unwrap();
        let updated = get_email(&store, email.id).await.unwrap();
        assert_eq!(updated.labels.len(), 2);

        remove_labels(&store, email.id, &["Work".to_string()]).await.unwrap();
        let updated = get_email(&store, email.id).await.unwrap();
        assert_eq!(updated.labels, vec!["INBOX".to_string()]);
    }

    #[tokio::test]
    async fn thread_fetch_orders_by_date() {
        let store = Store::open_in_memory().await.unwrap();
        let account_id = seed_account(&store).await;
        upsert_email(&store, sample(account_id)).await.unwrap();

        let mut second = sample(account_id);
        second.provider_message_id = "msg-2".into();
        second.date = Utc::now() + chrono::Duration::seconds(60);
        upsert_email(&store, second).await.unwrap();

        let thread = get_thread(&store, account_id, "thread-1").await.unwrap();
        assert_eq!(thread.len(), 2);
        assert!(thread[0].date <= thread[1].date);
    }
}
