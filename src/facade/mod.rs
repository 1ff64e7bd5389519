// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stateless operation facade (spec §4.I): the typed surface an external
//! tool-dispatch layer calls into. Every operation returns an
//! `OperationResponse<T>` rather than a bare `Result` so the dispatcher can
//! serialize failures the same way it serializes successes.

use crate::config::{GmailOAuthConfig, OutlookOAuthConfig};
use crate::error::CoreError;
use crate::provider::registry::ProviderRegistry;
use crate::provider::detect;
use crate::rules::applier;
use crate::search::{self, SearchQuery, SearchResults};
use crate::store::models::{
    Account, Action, AuditLogEntry, Attachment, Condition, Email, ImapCredentials, Rule, RuleTrigger, SyncMetric,
};
use crate::store::{accounts, attachments, audit_store, emails, metrics_store, rules_store, Store};
use crate::sync::SyncEngine;
use crate::vault::CredentialVault;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, TokenUrl,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct OperationResponse<T: Serialize> {
    pub success: bool,
    pub payload: Option<T>,
    pub message: Option<String>,
}

impl<T: Serialize> OperationResponse<T> {
    fn ok(payload: T) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            message: None,
        }
    }

    fn err(error: CoreError) -> Self {
        Self {
            success: false,
            payload: None,
            message: Some(error.to_string()),
        }
    }
}

fn respond<T: Serialize>(result: Result<T, CoreError>) -> OperationResponse<T> {
    match result {
        Ok(value) => OperationResponse::ok(value),
        Err(err) => OperationResponse::err(err),
    }
}

pub async fn list_accounts(store: &Store) -> OperationResponse<Vec<Account>> {
    respond(accounts::list_accounts(store).await)
}

/// Build a PKCE-protected Gmail authorization URL; the caller's own UI
/// surfaces it to the user and captures the redirect (the HTTP callback
/// listener itself is out of scope here).
#[derive(Debug, Serialize)]
pub struct StartOAuthResult {
    pub authorize_url: String,
    pub pkce_verifier: String,
    pub csrf_token: String,
}

pub fn start_gmail_oauth(config: &GmailOAuthConfig) -> OperationResponse<StartOAuthResult> {
    start_oauth(
        &config.client_id,
        &config.client_secret,
        "https://accounts.google.com/o/oauth2/v2/auth",
        "https://oauth2.googleapis.com/token",
        &config.redirect_uri,
        &["https://www.googleapis.com/auth/gmail.modify"],
    )
}

pub fn start_outlook_oauth(config: &OutlookOAuthConfig) -> OperationResponse<StartOAuthResult> {
    start_oauth(
        &config.client_id,
        &config.client_secret,
        &format!("https://login.microsoftonline.com/{}/oauth2/v2.0/authorize", config.tenant_id),
        &format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", config.tenant_id),
        &config.redirect_uri,
        &["Mail.ReadWrite", "Mail.Send", "offline_access"],
    )
}

fn start_oauth(
    client_id: &str,
    client_secret: &str,
    auth_url: &str,
    token_url: &str,
    redirect_uri: &str,
    scopes: &[&str],
) -> OperationResponse<StartOAuthResult> {
    let build = || -> Result<StartOAuthResult, CoreError> {
        let client = BasicClient::new(
            ClientId::new(client_id.to_string()),
            Some(ClientSecret::new(client_secret.to_string())),
            AuthUrl::new(auth_url.to_string()).map_err(|e| CoreError::IntegrityError(e.to_string()))?,
            Some(TokenUrl::new(token_url.to_string()).map_err(|e| CoreError::IntegrityError(e.to_string()))?),
        )
        .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string()).map_err(|e| CoreError::IntegrityError(e.to_string()))?);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let mut request = client.authorize_url(CsrfToken::new_random).set_pkce_challenge(pkce_challenge);
        for scope in scopes {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        let (authorize_url, csrf_token) = request.url();

        Ok(StartOAuthResult {
            authorize_url: authorize_url.to_string(),
            pkce_verifier: pkce_verifier.secret().clone(),
            csrf_token: csrf_token.secret().clone(),
        })
    };

    respond(build())
}

/// Exchange an authorization `code` for tokens and register the account.
/// `provider` selects which OAuth config/token endpoint to use.
pub async fn complete_gmail_oauth(
    store: &Store,
    config: &GmailOAuthConfig,
    code: String,
    pkce_verifier: String,
    email: String,
) -> OperationResponse<Account> {
    let result = complete_oauth(
        &config.client_id,
        &config.client_secret,
        "https://accounts.google.com/o/oauth2/v2/auth",
        "https://oauth2.googleapis.com/token",
        &config.redirect_uri,
        code,
        pkce_verifier,
    )
    .await;

    match result {
        Ok(oauth) => respond(
            accounts::create_account(
                store,
                accounts::NewAccount {
                    provider: crate::store::models::ProviderTag::Gmail,
                    email,
                    auth: crate::store::models::AuthTag::Oauth,
                    display_name: None,
                    oauth: Some(oauth),
                    imap: None,
                },
            )
            .await,
        ),
        Err(err) => OperationResponse::err(err),
    }
}

pub async fn complete_outlook_oauth(
    store: &Store,
    config: &OutlookOAuthConfig,
    code: String,
    pkce_verifier: String,
    email: String,
) -> OperationResponse<Account> {
    let result = complete_oauth(
        &config.client_id,
        &config.client_secret,
        &format!("https://login.microsoftonline.com/{}/oauth2/v2.0/authorize", config.tenant_id),
        &format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", config.tenant_id),
        &config.redirect_uri,
        code,
        pkce_verifier,
    )
    .await;

    match result {
        Ok(oauth) => respond(
            accounts::create_account(
                store,
                accounts::NewAccount {
                    provider: crate::store::models::ProviderTag::Outlook,
                    email,
                    auth: crate::store::models::AuthTag::Oauth,
                    display_name: None,
                    oauth: Some(oauth),
                    imap: None,
                },
            )
            .await,
        ),
        Err(err) => OperationResponse::err(err),
    }
}

async fn complete_oauth(
    client_id: &str,
    client_secret: &str,
    auth_url: &str,
    token_url: &str,
    redirect_uri: &str,
    code: String,
    pkce_verifier: String,
) -> Result<crate::store::models::OAuthCredentials, CoreError> {
    use oauth2::reqwest::async_http_client;
    use oauth2::{AuthorizationCode, TokenResponse};

    let client = BasicClient::new(
        ClientId::new(client_id.to_string()),
        Some(ClientSecret::new(client_secret.to_string())),
        AuthUrl::new(auth_url.to_string()).map_err(|e| CoreError::IntegrityError(e.to_string()))?,
        Some(TokenUrl::new(token_url.to_string()).map_err(|e| CoreError::IntegrityError(e.to_string()))?),
    )
    .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string()).map_err(|e| CoreError::IntegrityError(e.to_string()))?);

    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
        .request_async(async_http_client)
        .await
        .map_err(|e| CoreError::AuthFailed(e.to_string()))?;

    let expires_at = chrono::Utc::now()
        + chrono::Duration::seconds(token.expires_in().map(|d| d.as_secs() as i64).unwrap_or(3600));

    Ok(crate::store::models::OAuthCredentials {
        access_token: token.access_token().secret().clone(),
        refresh_token: token.refresh_token().map(|t| t.secret().clone()).unwrap_or_default(),
        expires_at,
    })
}

pub async fn send_message(
    registry: &ProviderRegistry,
    vault: &CredentialVault,
    store: &Store,
    account_id: i64,
    request: crate::provider::SendMessageRequest,
) -> OperationResponse<String> {
    let result = async {
        let account = accounts::get_account(store, account_id).await?;
        let provider = registry.resolve(account.provider);
        let credentials = live_credentials_for(store, vault, registry, &account).await?;
        provider.send_message(&credentials, request).await
    }
    .await;
    respond(result)
}

pub async fn sync_account(engine: &SyncEngine, account_id: i64) -> OperationResponse<()> {
    respond(engine.sync_account(account_id).await)
}

pub async fn search_emails(store: &Store, query: SearchQuery) -> OperationResponse<SearchResults> {
    respond(search::search(store, query).await)
}

pub async fn get_thread(store: &Store, account_id: i64, thread_id: &str) -> OperationResponse<Vec<Email>> {
    respond(emails::get_thread(store, account_id, thread_id).await)
}

pub async fn apply_label(store: &Store, email_id: i64, add: Vec<String>, remove: Vec<String>) -> OperationResponse<()> {
    let result = async {
        if !add.is_empty() {
            emails::add_labels(store, email_id, &add).await?;
        }
        if !remove.is_empty() {
            emails::remove_labels(store, email_id, &remove).await?;
        }
        Ok(())
    }
    .await;
    respond(result)
}

pub async fn list_folders(
    registry: &ProviderRegistry,
    vault: &CredentialVault,
    store: &Store,
    account_id: i64,
) -> OperationResponse<Vec<crate::provider::MailboxFolder>> {
    let result = async {
        let account = accounts::get_account(store, account_id).await?;
        let provider = registry.resolve(account.provider);
        let credentials = live_credentials_for(store, vault, registry, &account).await?;
        provider.list_folders(&credentials).await
    }
    .await;
    respond(result)
}

/// Lives here rather than on `SyncEngine` so read-only facade operations
/// (listFolders, getAttachment) don't need a whole engine instance.
async fn live_credentials_for(
    store: &Store,
    vault: &CredentialVault,
    registry: &ProviderRegistry,
    account: &Account,
) -> Result<crate::provider::LiveCredentials, CoreError> {
    crate::provider::resolve_live_credentials(store, vault, registry, account).await
}

pub async fn list_attachments(store: &Store, email_id: i64) -> OperationResponse<Vec<Attachment>> {
    respond(attachments::list_for_email(store, email_id).await)
}

/// Serve an attachment's bytes from the content cache, fetching and caching
/// them from the provider first on a cache miss (spec §4.B, §4.D).
pub async fn get_attachment(
    registry: &ProviderRegistry,
    vault: &CredentialVault,
    cache: &crate::cache::AttachmentCache,
    store: &Store,
    account_id: i64,
    attachment_id: i64,
) -> OperationResponse<Vec<u8>> {
    let result = async {
        if cache.is_cached(attachment_id).await? {
            return cache.read(attachment_id).await;
        }

        let account = accounts::get_account(store, account_id).await?;
        let attachment = attachments::get_attachment(store, attachment_id).await?;
        let email = emails::get_email(store, attachment.email_id).await?;
        let provider = registry.resolve(account.provider);
        let credentials = live_credentials_for(store, vault, registry, &account).await?;
        let bytes = provider
            .get_attachment(&credentials, &email.provider_message_id, &attachment.provider_attachment_id)
            .await?;
        cache.cache(attachment_id, &bytes).await?;
        Ok(bytes)
    }
    .await;
    respond(result)
}

pub async fn create_rule(
    store: &Store,
    account_id: i64,
    name: String,
    description: Option<String>,
    trigger: RuleTrigger,
    conditions: Vec<Condition>,
    actions: Vec<Action>,
) -> OperationResponse<Rule> {
    let result = async {
        let account = accounts::get_account(store, account_id).await?;
        let actions = crate::rules::rewrite_for_provider(actions, account.provider);
        crate::rules::validate(&conditions, &actions)?;
        rules_store::create_rule(
            store,
            rules_store::NewRule {
                account_id,
                name,
                description,
                trigger,
                conditions,
                actions,
            },
        )
        .await
    }
    .await;
    respond(result)
}

pub async fn list_rules(store: &Store, account_id: i64) -> OperationResponse<Vec<Rule>> {
    respond(rules_store::list_rules(store, account_id).await)
}

pub async fn delete_rule(store: &Store, rule_id: i64) -> OperationResponse<()> {
    respond(rules_store::delete_rule(store, rule_id).await)
}

pub async fn apply_rule(
    registry: &ProviderRegistry,
    vault: &CredentialVault,
    store: &Store,
    rule_id: i64,
    email_id: i64,
    dry_run: bool,
) -> OperationResponse<applier::ApplyOutcome> {
    let result = async {
        let rule = rules_store::get_rule(store, rule_id).await?;
        applier::apply_rule(store, registry, vault, &rule, email_id, dry_run).await
    }
    .await;
    respond(result)
}

pub async fn rollback(store: &Store, audit_entry_id: i64) -> OperationResponse<()> {
    respond(applier::rollback(store, audit_entry_id).await)
}

pub async fn preview_rollback(store: &Store, audit_entry_id: i64) -> OperationResponse<applier::RollbackPreview> {
    respond(applier::preview_rollback(store, audit_entry_id).await)
}

pub async fn sync_stats(store: &Store, account_id: i64, limit: i64) -> OperationResponse<Vec<SyncMetric>> {
    respond(metrics_store::list_for_account(store, account_id, limit).await)
}

pub async fn audit_log_for_rule(store: &Store, rule_id: i64) -> OperationResponse<Vec<AuditLogEntry>> {
    respond(audit_store::list_for_rule(store, rule_id).await)
}

/// Register an IMAP/SMTP account, encrypting the password at rest via the
/// vault. Host/port fall back to curated autodiscovery (spec §4.D) for
/// well-known domains when the caller doesn't already know them; an unknown
/// domain with no explicit host is a validation error.
pub async fn imap_auth(
    store: &Store,
    vault: &CredentialVault,
    email: String,
    password: String,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
) -> OperationResponse<Account> {
    let result = async {
        let detected = detect::detect(&email);

        let imap_host = imap_host
            .or_else(|| detected.map(|s| s.imap_host.to_string()))
            .ok_or_else(|| {
                CoreError::ValidationError(vec![crate::error::ValidationIssue::error("imap_host_required", "imapHost")])
            })?;
        let imap_port = imap_port.or_else(|| detected.map(|s| s.imap_port)).unwrap_or(993);
        let smtp_host = smtp_host
            .or_else(|| detected.map(|s| s.smtp_host.to_string()))
            .ok_or_else(|| {
                CoreError::ValidationError(vec![crate::error::ValidationIssue::error("smtp_host_required", "smtpHost")])
            })?;
        let smtp_port = smtp_port.or_else(|| detected.map(|s| s.smtp_port)).unwrap_or(587);

        let encrypted_password = vault.encrypt(&password);
        accounts::create_account(
            store,
            accounts::NewAccount {
                provider: crate::store::models::ProviderTag::Custom,
                email,
                auth: crate::store::models::AuthTag::Imap,
                display_name: None,
                oauth: None,
                imap: Some(ImapCredentials {
                    imap_host,
                    imap_port,
                    smtp_host,
                    smtp_port,
                    encrypted_password,
                }),
            },
        )
        .await
    }
    .await;
    respond(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_oauth_produces_verifier_and_url() {
        let config = GmailOAuthConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://localhost:8787/callback".into(),
        };
        let response = start_gmail_oauth(&config);
        assert!(response.success);
        let payload = response.payload.unwrap();
        assert!(payload.authorize_url.starts_with("https://accounts.google.com"));
        assert!(!payload.pkce_verifier.is_empty());
    }

    #[tokio::test]
    async fn imap_auth_stores_encrypted_password() {
        let store = Store::open_in_memory().await.unwrap();
        let vault = CredentialVault::new("facade-test-key");

        let response = imap_auth(
            &store,
            &vault,
            "user@example.com".to_string(),
            "hunter2".to_string(),
            Some("imap.example.com".to_string()),
            Some(993),
            Some("smtp.example.com".to_string()),
            Some(587),
        )
        .await;

        assert!(response.success);
        let account = response.payload.unwrap();
        let stored_password = account.imap.unwrap().encrypted_password;
        assert_ne!(stored_password, "hunter2");
        assert_eq!(vault.decrypt(&stored_password).unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn imap_auth_autodetects_known_domain_host() {
        let store = Store::open_in_memory().await.unwrap();
        let vault = CredentialVault::new("facade-test-key");

        let response = imap_auth(&store, &vault, "user@yahoo.com".to_string(), "hunter2".to_string(), None, None, None, None).await;

        assert!(response.success);
        let imap = response.payload.unwrap().imap.unwrap();
        assert_eq!(imap.imap_host, "imap.mail.yahoo.com");
    }

    #[tokio::test]
    async fn imap_auth_rejects_unknown_domain_without_host() {
        let store = Store::open_in_memory().await.unwrap();
        let vault = CredentialVault::new("facade-test-key");

        let response = imap_auth(
            &store,
            &vault,
            "user@some-private-domain.example".to_string(),
            "hunter2".to_string(),
            None,
            None,
            None,
            None,
        )
        .await;

        assert!(!response.success);
    }
}
