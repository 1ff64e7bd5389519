// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Microsoft Graph adapter (spec §4.E).
//!
//! Delta sync follows `@odata.deltaLink`/`@odata.nextLink` pagination: every
//! page but the last carries a `nextLink` to keep paging; the final page
//! carries a `deltaLink` that becomes next sync's cursor. Graph categories
//! stand in for Gmail-style labels.

use crate::config::OutlookOAuthConfig;
use crate::error::{CoreError, CoreResult};
use crate::provider::{
    DeltaResult, LiveCredentials, MailProvider, MailboxFolder, Page, ProviderProfile,
    SendMessageRequest,
};
use crate::store::emails::IncomingEmail;
use crate::store::models::{Address, Flag};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

const API_BASE: &str = "https://graph.microsoft.com/v1.0/me";

pub struct GraphProvider {
    #[allow(dead_code)]
    config: OutlookOAuthConfig,
    client: reqwest::Client,
}

impl GraphProvider {
    pub fn new(config: OutlookOAuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn access_token(credentials: &LiveCredentials) -> CoreResult<&str> {
        match credentials {
            LiveCredentials::OAuth { access_token } => Ok(access_token),
            LiveCredentials::Imap { .. } => Err(CoreError::AuthFailed("outlook requires oauth credentials".into())),
        }
    }
}

fn translate_status(response: &reqwest::Response) -> CoreResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status.as_u16() == 429 {
        return Err(CoreError::RateLimited(format!("graph rate limited: {status}")));
    }
    if status.is_server_error() {
        return Err(CoreError::Transient(format!("graph server error: {status}")));
    }
    if status.as_u16() == 410 {
        return Err(CoreError::Permanent(format!("graph delta link expired: {status}")));
    }
    Err(CoreError::Permanent(format!("graph request failed: {status}")))
}

#[derive(Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: GraphEmailAddress,
}

#[derive(Deserialize)]
struct GraphEmailAddress {
    address: String,
    name: Option<String>,
}

impl From<GraphRecipient> for Address {
    fn from(r: GraphRecipient) -> Self {
        Address {
            address: r.email_address.address,
            name: r.email_address.name,
        }
    }
}

#[derive(Deserialize)]
struct GraphBody {
    #[serde(rename = "contentType")]
    content_type: String,
    content: String,
}

#[derive(Deserialize)]
struct GraphMessage {
    id: String,
    #[serde(rename = "conversationId")]
    conversation_id: String,
    from: Option<GraphRecipient>,
    #[serde(rename = "toRecipients", default)]
    to_recipients: Vec<GraphRecipient>,
    #[serde(rename = "ccRecipients", default)]
    cc_recipients: Vec<GraphRecipient>,
    #[serde(rename = "bccRecipients", default)]
    bcc_recipients: Vec<GraphRecipient>,
    subject: Option<String>,
    body: Option<GraphBody>,
    #[serde(rename = "bodyPreview", default)]
    body_preview: String,
    #[serde(rename = "receivedDateTime")]
    received_date_time: Option<String>,
    #[serde(rename = "isRead", default)]
    is_read: bool,
    #[serde(default)]
    flag: Option<GraphFlag>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(rename = "hasAttachments", default)]
    has_attachments: bool,
    #[serde(rename = "internetMessageId")]
    internet_message_id: Option<String>,
}

#[derive(Deserialize)]
struct GraphFlag {
    #[serde(rename = "flagStatus")]
    flag_status: String,
}

fn message_to_incoming(account_id: i64, message: GraphMessage) -> IncomingEmail {
    let date = message
        .received_date_time
        .as_deref()
        .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut flags = BTreeSet::new();
    if message.is_read {
        flags.insert(Flag::Seen);
    }
    if message.flag.as_ref().map(|f| f.flag_status == "flagged").unwrap_or(false) {
        flags.insert(Flag::Flagged);
    }

    let (body_text, body_html) = match message.body {
        Some(b) if b.content_type.eq_ignore_ascii_case("html") => (None, Some(b.content)),
        Some(b) => (Some(b.content), None),
        None => (None, None),
    };

    let mut raw_headers = BTreeMap::new();
    if let Some(mid) = &message.internet_message_id {
        raw_headers.insert("Message-Id".to_string(), mid.clone());
    }

    IncomingEmail {
        account_id,
        provider_message_id: message.id,
        thread_id: message.conversation_id,
        from: message.from.map(Address::from).unwrap_or(Address {
            address: String::new(),
            name: None,
        }),
        to: message.to_recipients.into_iter().map(Address::from).collect(),
        cc: message.cc_recipients.into_iter().map(Address::from).collect(),
        bcc: message.bcc_recipients.into_iter().map(Address::from).collect(),
        subject: message.subject.unwrap_or_default(),
        body_text,
        body_html,
        snippet: message.body_preview,
        date,
        flags,
        labels: message.categories,
        in_reply_to: None,
        references: vec![],
        raw_headers,
        size_bytes: 0,
        has_attachments: message.has_attachments,
        attachments: vec![],
    }
}

#[async_trait]
impl MailProvider for GraphProvider {
    fn tag(&self) -> &'static str {
        "outlook"
    }

    async fn user_profile(&self, credentials: &LiveCredentials) -> CoreResult<ProviderProfile> {
        let token = Self::access_token(credentials)?;
        #[derive(Deserialize)]
        struct MeResponse {
            mail: Option<String>,
            #[serde(rename = "userPrincipalName")]
            user_principal_name: String,
            #[serde(rename = "displayName")]
            display_name: Option<String>,
        }
        let response = self.client.get(API_BASE).bearer_auth(token).send().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        let me: MeResponse = response.json().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        Ok(ProviderProfile {
            email: me.mail.unwrap_or(me.user_principal_name),
            display_name: me.display_name,
        })
    }

    async fn list_messages(&self, credentials: &LiveCredentials, folder: &str, cursor: Option<&str>) -> CoreResult<Page<String>> {
        let token = Self::access_token(credentials)?;
        let url = cursor
            .map(|c| c.to_string())
            .unwrap_or_else(|| format!("{API_BASE}/mailFolders/{folder}/messages?$select=id"));

        #[derive(Deserialize)]
        struct ListResponse {
            value: Vec<IdOnly>,
            #[serde(rename = "@odata.nextLink")]
            next_link: Option<String>,
        }
        #[derive(Deserialize)]
        struct IdOnly {
            id: String,
        }

        let response = self.client.get(&url).bearer_auth(token).send().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        let parsed: ListResponse = response.json().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        Ok(Page {
            items: parsed.value.into_iter().map(|m| m.id).collect(),
            next_cursor: parsed.next_link,
        })
    }

    async fn get_message(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<IncomingEmail> {
        let token = Self::access_token(credentials)?;
        let response = self
            .client
            .get(format!("{API_BASE}/messages/{provider_message_id}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        let message: GraphMessage = response.json().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        Ok(message_to_incoming(0, message))
    }

    async fn batch_get_messages(&self, credentials: &LiveCredentials, provider_message_ids: &[String]) -> CoreResult<Vec<IncomingEmail>> {
        let mut out = Vec::with_capacity(provider_message_ids.len());
        for id in provider_message_ids {
            out.push(self.get_message(credentials, id).await?);
        }
        Ok(out)
    }

    /// `cursor` is either a `deltaLink`/`nextLink` URL from a prior call, or
    /// empty to start a fresh delta chain against the inbox.
    async fn list_delta(&self, credentials: &LiveCredentials, cursor: &str) -> CoreResult<DeltaResult> {
        let token = Self::access_token(credentials)?;
        let url = if cursor.is_empty() {
            format!("{API_BASE}/mailFolders/inbox/messages/delta")
        } else {
            cursor.to_string()
        };

        #[derive(Deserialize)]
        struct DeltaResponse {
            value: Vec<GraphMessage>,
            #[serde(rename = "@odata.nextLink")]
            next_link: Option<String>,
            #[serde(rename = "@odata.deltaLink")]
            delta_link: Option<String>,
        }

        let response = self.client.get(&url).bearer_auth(token).send().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        let parsed: DeltaResponse = response.json().await.map_err(|e| CoreError::Transient(e.to_string()))?;

        let upserts = parsed.value.into_iter().map(|m| message_to_incoming(0, m)).collect();
        let next_cursor = parsed.delta_link.or(parsed.next_link).unwrap_or_default();

        Ok(DeltaResult {
            upserts,
            removed_provider_message_ids: vec![],
            next_cursor,
        })
    }

    /// `$deltatoken=latest` asks Graph for a delta link with no enumerated
    /// messages -- exactly the watermark the next real delta sync needs,
    /// without re-walking the mailbox (spec §4.F).
    async fn current_cursor(&self, credentials: &LiveCredentials, folder: &str) -> CoreResult<String> {
        let token = Self::access_token(credentials)?;
        let url = format!("{API_BASE}/mailFolders/{folder}/messages/delta?$deltatoken=latest");

        #[derive(Deserialize)]
        struct DeltaResponse {
            #[serde(rename = "@odata.deltaLink")]
            delta_link: Option<String>,
        }

        let response = self.client.get(&url).bearer_auth(token).send().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        let parsed: DeltaResponse = response.json().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        parsed
            .delta_link
            .ok_or_else(|| CoreError::Transient("graph delta response missing deltaLink".to_string()))
    }

    async fn send_message(&self, credentials: &LiveCredentials, message: SendMessageRequest) -> CoreResult<String> {
        let token = Self::access_token(credentials)?;

        #[derive(serde::Serialize)]
        struct Recipient {
            #[serde(rename = "emailAddress")]
            email_address: EmailAddressBody,
        }
        #[derive(serde::Serialize)]
        struct EmailAddressBody {
            address: String,
        }
        #[derive(serde::Serialize)]
        struct Body {
            #[serde(rename = "contentType")]
            content_type: &'static str,
            content: String,
        }
        #[derive(serde::Serialize)]
        struct MessagePayload {
            subject: String,
            body: Body,
            #[serde(rename = "toRecipients")]
            to_recipients: Vec<Recipient>,
            #[serde(rename = "ccRecipients")]
            cc_recipients: Vec<Recipient>,
            #[serde(rename = "bccRecipients")]
            bcc_recipients: Vec<Recipient>,
        }
        #[derive(serde::Serialize)]
        struct SendMailRequest {
            message: MessagePayload,
            #[serde(rename = "saveToSentItems")]
            save_to_sent_items: bool,
        }

        fn to_recipients(addresses: &[String]) -> Vec<Recipient> {
            addresses
                .iter()
                .map(|a| Recipient {
                    email_address: EmailAddressBody { address: a.clone() },
                })
                .collect()
        }

        let (content_type, content) = match &message.body_html {
            Some(html) => ("HTML", html.clone()),
            None => ("Text", message.body_text.clone()),
        };

        let payload = SendMailRequest {
            message: MessagePayload {
                subject: message.subject,
                body: Body { content_type, content },
                to_recipients: to_recipients(&message.to),
                cc_recipients: to_recipients(&message.cc),
                bcc_recipients: to_recipients(&message.bcc),
            },
            save_to_sent_items: true,
        };

        let response = self
            .client
            .post(format!("{API_BASE}/sendMail"))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        // Graph's sendMail returns 202 Accepted with no body and no message id;
        // the caller tracks the send by subject/recipients until the sent item syncs.
        Ok(String::new())
    }

    async fn modify_labels(&self, credentials: &LiveCredentials, provider_message_id: &str, add: &[String], remove: &[String]) -> CoreResult<()> {
        let token = Self::access_token(credentials)?;
        let current = self.get_message(credentials, provider_message_id).await?;
        let mut categories: BTreeSet<String> = current.labels.into_iter().collect();
        for label in add {
            categories.insert(label.clone());
        }
        for label in remove {
            categories.remove(label);
        }

        #[derive(serde::Serialize)]
        struct PatchBody {
            categories: Vec<String>,
        }
        let response = self
            .client
            .patch(format!("{API_BASE}/messages/{provider_message_id}"))
            .bearer_auth(token)
            .json(&PatchBody {
                categories: categories.into_iter().collect(),
            })
            .send()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        Ok(())
    }

    async fn trash(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<()> {
        let token = Self::access_token(credentials)?;
        let response = self
            .client
            .post(format!("{API_BASE}/messages/{provider_message_id}/move"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "destinationId": "deleteditems" }))
            .send()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        Ok(())
    }

    async fn untrash(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<()> {
        let token = Self::access_token(credentials)?;
        let response = self
            .client
            .post(format!("{API_BASE}/messages/{provider_message_id}/move"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "destinationId": "inbox" }))
            .send()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        Ok(())
    }

    async fn delete_permanently(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<()> {
        let token = Self::access_token(credentials)?;
        let response = self
            .client
            .delete(format!("{API_BASE}/messages/{provider_message_id}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        Ok(())
    }

    async fn get_attachment(&self, credentials: &LiveCredentials, provider_message_id: &str, provider_attachment_id: &str) -> CoreResult<Vec<u8>> {
        let token = Self::access_token(credentials)?;
        #[derive(Deserialize)]
        struct AttachmentResponse {
            #[serde(rename = "contentBytes")]
            content_bytes: String,
        }
        let response = self
            .client
            .get(format!("{API_BASE}/messages/{provider_message_id}/attachments/{provider_attachment_id}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        let parsed: AttachmentResponse = response.json().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(parsed.content_bytes)
            .map_err(|e| CoreError::IntegrityError(e.to_string()))
    }

    async fn list_folders(&self, credentials: &LiveCredentials) -> CoreResult<Vec<MailboxFolder>> {
        let token = Self::access_token(credentials)?;
        #[derive(Deserialize)]
        struct FoldersResponse {
            value: Vec<GraphFolder>,
        }
        #[derive(Deserialize)]
        struct GraphFolder {
            #[serde(rename = "displayName")]
            display_name: String,
            #[serde(rename = "unreadItemCount")]
            unread_item_count: Option<u32>,
        }
        let response = self
            .client
            .get(format!("{API_BASE}/mailFolders"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        let parsed: FoldersResponse = response.json().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        Ok(parsed
            .value
            .into_iter()
            .map(|f| MailboxFolder {
                name: f.display_name,
                unread_count: f.unread_item_count,
            })
            .collect())
    }
}
