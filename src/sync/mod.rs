// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sync engine: dispatches initial vs. delta sync per account, de-dupes
//! within a single run, retries transient provider failures with backoff,
//! and records a `SyncMetric` for every attempt (spec §4.F).

use crate::error::{CoreError, CoreResult};
use crate::provider::registry::ProviderRegistry;
use crate::provider::{self, LiveCredentials};
use crate::store::models::{Account, SyncType};
use crate::store::{accounts, attachments, emails, metrics_store, Store};
use crate::vault::CredentialVault;
use log::{info, warn};
use std::collections::HashSet;
use std::time::Duration;

const MAX_RETRIES: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(250);

pub struct SyncEngine {
    store: Store,
    registry: ProviderRegistry,
    vault: CredentialVault,
}

impl SyncEngine {
    pub fn new(store: Store, registry: ProviderRegistry, vault: CredentialVault) -> Self {
        Self { store, registry, vault }
    }

    async fn live_credentials(&self, account: &Account) -> CoreResult<LiveCredentials> {
        provider::resolve_live_credentials(&self.store, &self.vault, &self.registry, account).await
    }

    /// Run one sync pass for `account_id`: delta if a cursor is already
    /// recorded, initial otherwise. Always records a `SyncMetric`, win or lose.
    pub async fn sync_account(&self, account_id: i64) -> CoreResult<()> {
        let started = std::time::Instant::now();
        let account = accounts::get_account(&self.store, account_id).await?;
        let provider = self.registry.resolve(account.provider);
        let credentials = self.live_credentials(&account).await?;

        let is_initial = account.sync_cursor.provider_cursor.is_none();
        let sync_type = if is_initial { SyncType::Initial } else { SyncType::Delta };

        let result = if is_initial {
            self.run_initial(&account, provider.as_ref(), &credentials).await
        } else {
            self.run_delta(&account, provider.as_ref(), &credentials).await
        };

        let duration_ms = started.elapsed().as_millis() as i64;
        match &result {
            Ok((added, deleted)) => {
                metrics_store::record_metric(
                    &self.store,
                    metrics_store::NewSyncMetric {
                        account_id,
                        provider: account.provider,
                        sync_type,
                        added: *added,
                        deleted: *deleted,
                        labels_changed: 0,
                        duration_ms,
                        success: true,
                        error: None,
                    },
                )
                .await?;
            }
            Err(err) => {
                metrics_store::record_metric(
                    &self.store,
                    metrics_store::NewSyncMetric {
                        account_id,
                        provider: account.provider,
                        sync_type,
                        added: 0,
                        deleted: 0,
                        labels_changed: 0,
                        duration_ms,
                        success: false,
                        error: Some(err.to_string()),
                    },
                )
                .await?;
            }
        }

        result.map(|_| ())
    }

    async fn run_initial(
        &self,
        account: &Account,
        provider: &dyn crate::provider::MailProvider,
        credentials: &LiveCredentials,
    ) -> CoreResult<(i64, i64)> {
        let mut seen = HashSet::new();
        let mut added = 0i64;
        let mut cursor = None;

        loop {
            let page = retry(|| async {
                provider.list_messages(credentials, "INBOX", cursor.as_deref()).await
            })
            .await?;

            let fresh_ids: Vec<String> = page
                .items
                .into_iter()
                .filter(|id| seen.insert(id.clone()))
                .collect();

            if !fresh_ids.is_empty() {
                let messages = retry(|| async { provider.batch_get_messages(credentials, &fresh_ids).await }).await?;
                for mut incoming in messages {
                    incoming.account_id = account.id;
                    let new_attachments = std::mem::take(&mut incoming.attachments);
                    let email = emails::upsert_email(&self.store, incoming).await?;
                    persist_attachments(&self.store, email.id, new_attachments).await?;
                    added += 1;
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let cursor = retry(|| async { provider.current_cursor(credentials, "INBOX").await }).await?;
        let mut updated_cursor = account.sync_cursor.clone();
        updated_cursor.provider_cursor = Some(cursor);
        updated_cursor.last_sync_at = Some(chrono::Utc::now());
        accounts::update_sync_cursor(&self.store, account.id, &updated_cursor).await?;

        info!("initial sync for account {} added {added} messages", account.id);
        Ok((added, 0))
    }

    async fn run_delta(
        &self,
        account: &Account,
        provider: &dyn crate::provider::MailProvider,
        credentials: &LiveCredentials,
    ) -> CoreResult<(i64, i64)> {
        let cursor = account.sync_cursor.provider_cursor.clone().unwrap_or_default();

        let delta = retry(|| async { provider.list_delta(credentials, &cursor).await }).await?;

        let mut seen = HashSet::new();
        let mut added = 0i64;
        for mut incoming in delta.upserts {
            if !seen.insert(incoming.provider_message_id.clone()) {
                continue;
            }
            incoming.account_id = account.id;
            let new_attachments = std::mem::take(&mut incoming.attachments);
            let email = emails::upsert_email(&self.store, incoming).await?;
            persist_attachments(&self.store, email.id, new_attachments).await?;
            added += 1;
        }

        let mut deleted = 0i64;
        for provider_message_id in &delta.removed_provider_message_ids {
            if let Ok(email) = find_by_provider_id(&self.store, account.id, provider_message_id).await {
                emails::delete_email(&self.store, email.id).await?;
                deleted += 1;
            }
        }

        let mut updated_cursor = account.sync_cursor.clone();
        updated_cursor.provider_cursor = Some(delta.next_cursor);
        updated_cursor.last_sync_at = Some(chrono::Utc::now());
        accounts::update_sync_cursor(&self.store, account.id, &updated_cursor).await?;

        info!("delta sync for account {} added {added} deleted {deleted}", account.id);
        Ok((added, deleted))
    }
}

/// Translate a provider's `IncomingAttachment` listing into the store's
/// attachment rows for `email_id`, replacing whatever was recorded before.
async fn persist_attachments(store: &Store, email_id: i64, incoming: Vec<crate::store::models::IncomingAttachment>) -> CoreResult<()> {
    if incoming.is_empty() {
        return Ok(());
    }
    let new_attachments = incoming
        .into_iter()
        .map(|a| attachments::NewAttachment {
            email_id,
            filename: a.filename,
            mime_type: a.mime_type,
            size_bytes: a.size_bytes,
            content_id: a.content_id,
            provider_attachment_id: a.provider_attachment_id,
        })
        .collect();
    attachments::replace_for_email(store, email_id, new_attachments).await?;
    Ok(())
}

async fn find_by_provider_id(store: &Store, account_id: i64, provider_message_id: &str) -> CoreResult<crate::store::models::Email> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM emails WHERE account_id = ? AND provider_message_id = ?")
        .bind(account_id)
        .bind(provider_message_id)
        .fetch_optional(store.pool())
        .await?;
    match row {
        Some((id,)) => emails::get_email(store, id).await,
        None => Err(CoreError::NotFound(format!("email {provider_message_id}"))),
    }
}

/// Retry `op` with exponential backoff for the two retryable error classes
/// (spec §7); anything else propagates immediately.
async fn retry<F, Fut, T>(mut op: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                let backoff = BASE_BACKOFF * 2u32.pow(attempt);
                warn!("retryable sync error ({err}), attempt {attempt}, backing off {backoff:?}");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: CoreResult<()> = retry(|| {
            calls += 1;
            async { Err(CoreError::Transient("boom".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, MAX_RETRIES as usize + 1);
    }

    #[tokio::test]
    async fn retry_stops_immediately_on_non_retryable_error() {
        let mut calls = 0;
        let result: CoreResult<()> = retry(|| {
            calls += 1;
            async { Err(CoreError::Permanent("nope".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
