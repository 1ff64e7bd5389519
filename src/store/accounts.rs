// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Account CRUD (spec §3 Account, §4.A).

use crate::error::{CoreError, CoreResult};
use crate::store::models::{Account, AuthTag, ImapCredentials, OAuthCredentials, ProviderTag, SyncCursor};
use crate::store::Store;
use chrono::Utc;
use sqlx::FromRow;
use std::collections::BTreeMap;

#[derive(FromRow)]
struct AccountRow {
    id: i64,
    provider: String,
    email: String,
    auth: String,
    display_name: Option<String>,
    is_active: i64,
    oauth_access_token: Option<String>,
    oauth_refresh_token: Option<String>,
    oauth_expires_at: Option<String>,
    imap_host: Option<String>,
    imap_port: Option<i64>,
    smtp_host: Option<String>,
    smtp_port: Option<i64>,
    encrypted_password: Option<String>,
    provider_cursor: Option<String>,
    uid_validity: String,
    highest_modseq: String,
    last_sync_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn provider_from_str(s: &str) -> CoreResult<ProviderTag> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| CoreError::IntegrityError(format!("unknown provider tag: {s}")))
}

fn auth_from_str(s: &str) -> CoreResult<AuthTag> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| CoreError::IntegrityError(format!("unknown auth tag: {s}")))
}

impl AccountRow {
    fn into_account(self) -> CoreResult<Account> {
        let provider = provider_from_str(&self.provider)?;
        let auth = auth_from_str(&self.auth)?;

        let oauth = match (
            self.oauth_access_token,
            self.oauth_refresh_token,
            self.oauth_expires_at,
        ) {
            (Some(access_token), Some(refresh_token), Some(expires_at)) => Some(OAuthCredentials {
                access_token,
                refresh_token,
                expires_at: chrono::DateTime::parse_from_rfc3339(&expires_at)
                    .map_err(|e| CoreError::IntegrityError(e.to_string()))?
                    .with_timezone(&Utc),
            }),
            _ => None,
        };

        let imap = match (self.imap_host, self.smtp_host, self.encrypted_password) {
            (Some(imap_host), Some(smtp_host), Some(encrypted_password)) => Some(ImapCredentials {
                imap_host,
                imap_port: self.imap_port.unwrap_or(993) as u16,
                smtp_host,
                smtp_port: self.smtp_port.unwrap_or(587) as u16,
                encrypted_password,
            }),
            _ => None,
        };

        let uid_validity: BTreeMap<String, u32> = serde_json::from_str(&self.uid_validity)?;
        let highest_modseq: BTreeMap<String, u64> = serde_json::from_str(&self.highest_modseq)?;
        let last_sync_at = self
            .last_sync_at
            .map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()
            .map_err(|e: chrono::ParseError| CoreError::IntegrityError(e.to_string()))?;

        Ok(Account {
            id: self.id,
            provider,
            email: self.email,
            auth,
            display_name: self.display_name,
            is_active: self.is_active != 0,
            oauth,
            imap,
            sync_cursor: SyncCursor {
                provider_cursor: self.provider_cursor,
                uid_validity,
                highest_modseq,
                last_sync_at,
            },
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map_err(|e| CoreError::IntegrityError(e.to_string()))?
                .with_timezone(&Utc),
            updated_at: chrono::DateTime::parse_from_rfc3339(&self.updated_at)
                .map_err(|e| CoreError::IntegrityError(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

/// Fields needed to register a new account. Credentials are already
/// encrypted/validated by the caller (vault / OAuth flow sit above this layer).
pub struct NewAccount {
    pub provider: ProviderTag,
    pub email: String,
    pub auth: AuthTag,
    pub display_name: Option<String>,
    pub oauth: Option<OAuthCredentials>,
    pub imap: Option<ImapCredentials>,
}

pub async fn create_account(store: &Store, new: NewAccount) -> CoreResult<Account> {
    let now = Utc::now();
    let provider_str = crate::error::enum_to_column(new.provider)?;
    let auth_str = crate::error::enum_to_column(new.auth)?;

    let id = sqlx::query(
        "INSERT INTO accounts (
            provider, email, auth, display_name, is_active,
            oauth_access_token, oauth_refresh_token, oauth_expires_at,
            imap_host, imap_port, smtp_host, smtp_port, encrypted_password,
            uid_validity, highest_modseq, created_at, updated_at
        ) VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?, '{}', '{}', ?, ?)",
    )
    .bind(&provider_str)
    .bind(&new.email)
    .bind(&auth_str)
    .bind(&new.display_name)
    .bind(new.oauth.as_ref().map(|o| o.access_token.clone()))
    .bind(new.oauth.as_ref().map(|o| o.refresh_token.clone()))
    .bind(new.oauth.as_ref().map(|o| o.expires_at.to_rfc3339()))
    .bind(new.imap.as_ref().map(|i| i.imap_host.clone()))
    .bind(new.imap.as_ref().map(|i| i.imap_port as i64))
    .bind(new.imap.as_ref().map(|i| i.smtp_host.clone()))
    .bind(new.imap.as_ref().map(|i| i.smtp_port as i64))
    .bind(new.imap.as_ref().map(|i| i.encrypted_password.clone()))
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(store.pool())
    .await?
    .last_insert_rowid();

    get_account(store, id).await
}

pub async fn get_account(store: &Store, id: i64) -> CoreResult<Account> {
    let row: AccountRow = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(store.pool())
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("account {id}")))?;
    row.into_account()
}

pub async fn list_accounts(store: &Store) -> CoreResult<Vec<Account>> {
    let rows: Vec<AccountRow> =
        sqlx::query_as("SELECT * FROM accounts ORDER BY created_at ASC").fetch_all(store.pool()).await?;
    rows.into_iter().map(AccountRow::into_account).collect()
}

pub async fn set_active(store: &Store, id: i64, is_active: bool) -> CoreResult<()> {
    let result = sqlx::query("UPDATE accounts SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(is_active as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("account {id}")));
    }
    Ok(())
}

pub async fn update_sync_cursor(store: &Store, id: i64, cursor: &SyncCursor) -> CoreResult<()> {
    let result = sqlx::query(
        "UPDATE accounts SET provider_cursor = ?, uid_validity = ?, highest_modseq = ?, last_sync_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&cursor.provider_cursor)
    .bind(serde_json::to_string(&cursor.uid_validity)?)
    .bind(serde_json::to_string(&cursor.highest_modseq)?)
    .bind(cursor.last_sync_at.map(|t| t.to_rfc3339()))
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(store.pool())
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("account {id}")));
    }
    Ok(())
}

pub async fn update_oauth_credentials(store: &Store, id: i64, oauth: &OAuthCredentials) -> CoreResult<()> {
    let result = sqlx::query(
        "UPDATE accounts SET oauth_access_token = ?, oauth_refresh_token = ?, oauth_expires_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&oauth.access_token)
    .bind(&oauth.refresh_token)
    .bind(oauth.expires_at.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(store.pool())
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("account {id}")));
    }
    Ok(())
}

/// Cascades to emails, attachments, rules, audit log and sync metrics via FK ON DELETE CASCADE.
pub async fn delete_account(store: &Store, id: i64) -> CoreResult<()> {
    let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
        .bind(id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("account {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_imap() -> ImapCredentials {
        ImapCredentials {
            imap_host: "imap.example.com".into(),
            imap_port: 993,
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            encrypted_password: "deadbeef:cafebabe".into(),
        }
    }

    #[tokio::test]
    async fn create_get_and_list_roundtrip() {
        let store = Store::open_in_memory().await.unwrap();
        let account = create_account(
            &store,
            NewAccount {
                provider: ProviderTag::Custom,
                email: "student@example.com".into(),
                auth: AuthTag::Imap,
                display_name: Some("Student".into()),
                oauth: None,
                imap: Some(sample_imap()),
            },
        )
        .await
        .unwrap();

        assert_eq!(account.email, "student@example.com");
        assert!(account.is_active);

        let fetched = get_account(&store, account.id).await.unwrap();
        assert_eq!(fetched.email, account.email);

        let all = list_accounts(&store).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_provider_email_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let new = || NewAccount {
            provider: ProviderTag::Gmail,
            email: "dup@example.com".into(),
            auth: AuthTag::Oauth,
            display_name: None,
            oauth: None,
            imap: None,
        };
        create_account(&store, new()).await.unwrap();
        let err = create_account(&store, new()).await.unwrap_err();
        assert!(matches!(err, CoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn get_missing_account_is_not_found() {
        let store = Store::open_in_memory().await.unwrap();
        let err = get_account(&store, 999).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_account_cascades_to_emails() {
        let store = Store::open_in_memory().await.unwrap();
        let account = create_account(
            &store,
            NewAccount {
                provider: ProviderTag::Custom,
                email: "cascade@example.com".into(),
                auth: AuthTag::Imap,
                display_name: None,
                oauth: None,
                imap: Some(sample_imap()),
            },
        )
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO emails (account_id, provider_message_id, thread_id, from_address, date, received_at, created_at, updated_at)
             VALUES (?, 'm1', 't1', 'a@b.com', ?, ?, ?, ?)",
        )
        .bind(account.id)
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(store.pool())
        .await
        .unwrap();

        delete_account(&store, account.id).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM emails")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
