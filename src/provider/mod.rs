// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provider abstraction shared by Gmail, Outlook/Graph and IMAP/SMTP
//! adapters (spec §4.D, §4.E).

pub mod detect;
pub mod gmail;
pub mod graph;
pub mod imap_smtp;
pub mod registry;

use crate::error::{CoreError, CoreResult};
use crate::provider::registry::ProviderRegistry;
use crate::store::accounts;
use crate::store::emails::IncomingEmail;
use crate::store::models::{Account, AuthTag, OAuthCredentials};
use crate::store::Store;
use crate::vault::CredentialVault;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};

/// One page of a provider listing, plus whatever cursor continues it.
#[derive(Debug, Clone, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Result of a delta (incremental) sync pass: messages to upsert, message ids
/// that were removed from the mailbox, and the cursor to persist for next time.
#[derive(Debug, Clone, Default)]
pub struct DeltaResult {
    pub upserts: Vec<IncomingEmail>,
    pub removed_provider_message_ids: Vec<String>,
    pub next_cursor: String,
}

#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub in_reply_to: Option<String>,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MailboxFolder {
    pub name: String,
    pub unread_count: Option<u32>,
}

/// Live credentials a provider adapter needs for one call. Distinct from the
/// store's `OAuthCredentials`/`ImapCredentials` so adapters never see the
/// encrypted-at-rest representation directly.
#[derive(Debug, Clone)]
pub enum LiveCredentials {
    OAuth { access_token: String },
    Imap {
        username: String,
        password: String,
        imap_host: String,
        imap_port: u16,
        smtp_host: String,
        smtp_port: u16,
    },
}

/// Operations every mail provider adapter implements (spec §4.D).
///
/// Implementations translate provider-specific failures into the shared
/// `CoreError` taxonomy (§7) -- rate limiting as `RateLimited`, network
/// blips as `Transient`, 4xx-style rejections as `Permanent`.
#[async_trait]
pub trait MailProvider: Send + Sync {
    fn tag(&self) -> &'static str;

    async fn user_profile(&self, credentials: &LiveCredentials) -> CoreResult<ProviderProfile>;

    async fn list_messages(
        &self,
        credentials: &LiveCredentials,
        folder: &str,
        cursor: Option<&str>,
    ) -> CoreResult<Page<String>>;

    async fn get_message(&self, credentials: &LiveCredentials, provider_message_id: &str)
        -> CoreResult<IncomingEmail>;

    async fn batch_get_messages(
        &self,
        credentials: &LiveCredentials,
        provider_message_ids: &[String],
    ) -> CoreResult<Vec<IncomingEmail>>;

    /// Incremental sync since `cursor` (Gmail `historyId`, Graph delta link,
    /// or IMAP UID/MODSEQ watermark depending on adapter).
    async fn list_delta(&self, credentials: &LiveCredentials, cursor: &str) -> CoreResult<DeltaResult>;

    /// The provider's "as of right now" cursor, captured once initial sync
    /// drains every page, so the very next delta sync has a real watermark
    /// instead of a placeholder (spec §4.F).
    async fn current_cursor(&self, credentials: &LiveCredentials, folder: &str) -> CoreResult<String>;

    async fn send_message(&self, credentials: &LiveCredentials, message: SendMessageRequest) -> CoreResult<String>;

    async fn modify_labels(
        &self,
        credentials: &LiveCredentials,
        provider_message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> CoreResult<()>;

    async fn trash(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<()>;

    async fn untrash(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<()>;

    async fn delete_permanently(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<()>;

    async fn get_attachment(
        &self,
        credentials: &LiveCredentials,
        provider_message_id: &str,
        provider_attachment_id: &str,
    ) -> CoreResult<Vec<u8>>;

    async fn list_folders(&self, credentials: &LiveCredentials) -> CoreResult<Vec<MailboxFolder>>;
}

/// Does `expires_at` fall within the 5-minute refresh lookahead window (spec §4.D)?
pub fn needs_refresh(expires_at: DateTime<Utc>) -> bool {
    Utc::now() + chrono::Duration::minutes(5) >= expires_at
}

/// Token endpoint details needed to redeem a stored `refresh_token`, one per
/// OAuth-backed provider tag (spec §4.D).
#[derive(Debug, Clone)]
pub struct OAuthRefreshConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

/// Exchange `oauth.refresh_token` for a fresh access token, keeping the same
/// refresh token unless the authorization server rotates it (spec §4.D).
pub async fn refresh_oauth_token(config: &OAuthRefreshConfig, oauth: &OAuthCredentials) -> CoreResult<OAuthCredentials> {
    use oauth2::reqwest::async_http_client;

    let client = BasicClient::new(
        ClientId::new(config.client_id.clone()),
        Some(ClientSecret::new(config.client_secret.clone())),
        AuthUrl::new("https://unused.invalid".to_string()).map_err(|e| CoreError::IntegrityError(e.to_string()))?,
        Some(TokenUrl::new(config.token_url.clone()).map_err(|e| CoreError::IntegrityError(e.to_string()))?),
    );

    let token = client
        .exchange_refresh_token(&RefreshToken::new(oauth.refresh_token.clone()))
        .request_async(async_http_client)
        .await
        .map_err(|e| CoreError::AuthFailed(format!("oauth refresh failed: {e}")))?;

    let expires_at = Utc::now() + chrono::Duration::seconds(token.expires_in().map(|d| d.as_secs() as i64).unwrap_or(3600));

    Ok(OAuthCredentials {
        access_token: token.access_token().secret().clone(),
        refresh_token: token.refresh_token().map(|t| t.secret().clone()).unwrap_or_else(|| oauth.refresh_token.clone()),
        expires_at,
    })
}

/// Resolve live credentials for `account`, refreshing and persisting an
/// expiring OAuth access token along the way (spec §4.D). Shared by the sync
/// engine and the facade so both refresh the same way.
pub async fn resolve_live_credentials(
    store: &Store,
    vault: &CredentialVault,
    registry: &ProviderRegistry,
    account: &Account,
) -> CoreResult<LiveCredentials> {
    match account.auth {
        AuthTag::Oauth => {
            let oauth = account
                .oauth
                .as_ref()
                .ok_or_else(|| CoreError::IntegrityError(format!("account {} missing oauth credentials", account.id)))?;

            let oauth = if needs_refresh(oauth.expires_at) {
                match registry.oauth_refresh_config(account.provider) {
                    Some(config) => {
                        let refreshed = refresh_oauth_token(&config, oauth).await?;
                        accounts::update_oauth_credentials(store, account.id, &refreshed).await?;
                        refreshed
                    }
                    None => oauth.clone(),
                }
            } else {
                oauth.clone()
            };

            Ok(LiveCredentials::OAuth {
                access_token: oauth.access_token,
            })
        }
        AuthTag::Imap => {
            let imap = account
                .imap
                .as_ref()
                .ok_or_else(|| CoreError::IntegrityError(format!("account {} missing imap credentials", account.id)))?;
            let password = vault
                .decrypt(&imap.encrypted_password)
                .map_err(|e| CoreError::IntegrityError(e.to_string()))?;
            Ok(LiveCredentials::Imap {
                username: account.email.clone(),
                password,
                imap_host: imap.imap_host.clone(),
                imap_port: imap.imap_port,
                smtp_host: imap.smtp_host.clone(),
                smtp_port: imap.smtp_port,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_window_is_five_minutes() {
        assert!(needs_refresh(Utc::now() + chrono::Duration::minutes(4)));
        assert!(!needs_refresh(Utc::now() + chrono::Duration::minutes(10)));
    }
}
