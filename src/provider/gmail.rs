// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gmail REST v1 adapter (spec §4.E).
//!
//! Delta sync rides `users.history.list` keyed by `historyId`; a `404` on
//! that call means the watermark aged out of Gmail's retention window and
//! the caller needs a fresh initial sync (surfaced as `CoreError::Permanent`
//! so the sync engine doesn't retry it forever).

use crate::config::GmailOAuthConfig;
use crate::error::{CoreError, CoreResult};
use crate::provider::{
    DeltaResult, LiveCredentials, MailProvider, MailboxFolder, Page, ProviderProfile,
    SendMessageRequest,
};
use crate::store::emails::IncomingEmail;
use crate::store::models::Address;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

pub struct GmailProvider {
    #[allow(dead_code)]
    config: GmailOAuthConfig,
    client: reqwest::Client,
}

impl GmailProvider {
    pub fn new(config: GmailOAuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn access_token(credentials: &LiveCredentials) -> CoreResult<&str> {
        match credentials {
            LiveCredentials::OAuth { access_token } => Ok(access_token),
            LiveCredentials::Imap { .. } => Err(CoreError::AuthFailed("gmail requires oauth credentials".into())),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, token: &str) -> CoreResult<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        response.json::<T>().await.map_err(|e| CoreError::Transient(e.to_string()))
    }
}

fn translate_status(response: &reqwest::Response) -> CoreResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status.as_u16() == 429 {
        return Err(CoreError::RateLimited(format!("gmail rate limited: {status}")));
    }
    if status.is_server_error() {
        return Err(CoreError::Transient(format!("gmail server error: {status}")));
    }
    Err(CoreError::Permanent(format!("gmail request failed: {status}")))
}

#[derive(Deserialize)]
struct MessagesListResponse {
    messages: Option<Vec<MessageIdRef>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct MessageIdRef {
    id: String,
}

#[derive(Deserialize)]
struct GmailProfileResponse {
    #[serde(rename = "emailAddress")]
    email_address: String,
    #[serde(rename = "historyId")]
    history_id: String,
}

#[derive(Deserialize)]
struct GmailMessage {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: String,
    #[serde(rename = "labelIds", default)]
    label_ids: Vec<String>,
    snippet: Option<String>,
    #[serde(rename = "sizeEstimate", default)]
    size_estimate: i64,
    payload: GmailPayload,
}

#[derive(Deserialize)]
struct GmailPayload {
    #[serde(default)]
    headers: Vec<GmailHeader>,
    #[serde(default)]
    parts: Vec<GmailPayload>,
    body: Option<GmailBody>,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
}

#[derive(Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct GmailBody {
    data: Option<String>,
    #[serde(rename = "attachmentId")]
    attachment_id: Option<String>,
    #[serde(default)]
    size: i64,
}

fn header(headers: &[GmailHeader], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

fn parse_address_list(value: &str) -> Vec<Address> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            let s = s.trim();
            if let Some(idx) = s.rfind('<') {
                let name = s[..idx].trim().trim_matches('"');
                let address = s[idx + 1..].trim_end_matches('>').to_string();
                Address {
                    address,
                    name: if name.is_empty() { None } else { Some(name.to_string()) },
                }
            } else {
                Address {
                    address: s.to_string(),
                    name: None,
                }
            }
        })
        .collect()
}

/// Walk `payload.parts` recursively collecting `text/plain` and `text/html` bodies.
fn walk_parts(payload: &GmailPayload, text: &mut Option<String>, html: &mut Option<String>) {
    if payload.mime_type == "text/plain" {
        if let Some(body) = &payload.body {
            if let Some(data) = &body.data {
                if let Ok(decoded) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data) {
                    *text = String::from_utf8(decoded).ok();
                }
            }
        }
    } else if payload.mime_type == "text/html" {
        if let Some(body) = &payload.body {
            if let Some(data) = &body.data {
                if let Ok(decoded) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data) {
                    *html = String::from_utf8(decoded).ok();
                }
            }
        }
    }
    for part in &payload.parts {
        walk_parts(part, text, html);
    }
}

/// Walk `payload.parts` recursively collecting parts that carry an
/// `attachmentId` -- Gmail's signal that a part is a downloadable attachment
/// rather than inline body text (spec §4.B, §4.E).
fn walk_attachments(payload: &GmailPayload, out: &mut Vec<crate::store::models::IncomingAttachment>) {
    if let Some(body) = &payload.body {
        if let Some(attachment_id) = &body.attachment_id {
            let content_id = header(&payload.headers, "Content-ID").map(|v| v.trim_matches(['<', '>']).to_string());
            out.push(crate::store::models::IncomingAttachment {
                filename: if payload.filename.is_empty() {
                    "attachment".to_string()
                } else {
                    payload.filename.clone()
                },
                mime_type: payload.mime_type.clone(),
                size_bytes: body.size,
                content_id,
                provider_attachment_id: attachment_id.clone(),
            });
        }
    }
    for part in &payload.parts {
        walk_attachments(part, out);
    }
}

fn message_to_incoming(account_id: i64, message: GmailMessage) -> IncomingEmail {
    let mut body_text = None;
    let mut body_html = None;
    walk_parts(&message.payload, &mut body_text, &mut body_html);

    let mut attachments = Vec::new();
    walk_attachments(&message.payload, &mut attachments);

    let from_header = header(&message.payload.headers, "From").unwrap_or_default();
    let from = parse_address_list(&from_header).into_iter().next().unwrap_or(Address {
        address: String::new(),
        name: None,
    });

    let date = header(&message.payload.headers, "Date")
        .and_then(|d| chrono::DateTime::parse_from_rfc2822(&d).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut raw_headers = BTreeMap::new();
    for h in &message.payload.headers {
        raw_headers.insert(h.name.clone(), h.value.clone());
    }

    IncomingEmail {
        account_id,
        provider_message_id: message.id,
        thread_id: message.thread_id,
        from,
        to: parse_address_list(&header(&message.payload.headers, "To").unwrap_or_default()),
        cc: parse_address_list(&header(&message.payload.headers, "Cc").unwrap_or_default()),
        bcc: vec![],
        subject: header(&message.payload.headers, "Subject").unwrap_or_default(),
        body_text,
        body_html,
        snippet: message.snippet.unwrap_or_default(),
        date,
        flags: {
            let mut flags = BTreeSet::new();
            if !message.label_ids.iter().any(|l| l == "UNREAD") {
                flags.insert(crate::store::models::Flag::Seen);
            }
            if message.label_ids.iter().any(|l| l == "STARRED") {
                flags.insert(crate::store::models::Flag::Flagged);
            }
            flags
        },
        labels: message.label_ids,
        in_reply_to: header(&message.payload.headers, "In-Reply-To"),
        references: header(&message.payload.headers, "References")
            .map(|r| r.split_whitespace().map(String::from).collect())
            .unwrap_or_default(),
        raw_headers,
        size_bytes: message.size_estimate,
        has_attachments: !attachments.is_empty(),
        attachments,
    }
}

#[async_trait]
impl MailProvider for GmailProvider {
    fn tag(&self) -> &'static str {
        "gmail"
    }

    async fn user_profile(&self, credentials: &LiveCredentials) -> CoreResult<ProviderProfile> {
        let token = Self::access_token(credentials)?;
        let profile: GmailProfileResponse = self.get_json(&format!("{API_BASE}/profile"), token).await?;
        Ok(ProviderProfile {
            email: profile.email_address,
            display_name: None,
        })
    }

    async fn list_messages(&self, credentials: &LiveCredentials, folder: &str, cursor: Option<&str>) -> CoreResult<Page<String>> {
        let token = Self::access_token(credentials)?;
        let mut url = format!("{API_BASE}/messages?labelIds={folder}");
        if let Some(cursor) = cursor {
            url.push_str(&format!("&pageToken={cursor}"));
        }
        let response: MessagesListResponse = self.get_json(&url, token).await?;
        Ok(Page {
            items: response.messages.unwrap_or_default().into_iter().map(|m| m.id).collect(),
            next_cursor: response.next_page_token,
        })
    }

    // account_id is 0 here; the sync engine owns the mapping from a live
    // provider session to a stored account and fills it in before upsert.
    async fn get_message(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<IncomingEmail> {
        let token = Self::access_token(credentials)?;
        let message: GmailMessage = self
            .get_json(&format!("{API_BASE}/messages/{provider_message_id}?format=full"), token)
            .await?;
        Ok(message_to_incoming(0, message))
    }

    async fn batch_get_messages(&self, credentials: &LiveCredentials, provider_message_ids: &[String]) -> CoreResult<Vec<IncomingEmail>> {
        let mut out = Vec::with_capacity(provider_message_ids.len());
        for id in provider_message_ids {
            out.push(self.get_message(credentials, id).await?);
        }
        Ok(out)
    }

    async fn list_delta(&self, credentials: &LiveCredentials, cursor: &str) -> CoreResult<DeltaResult> {
        let token = Self::access_token(credentials)?;

        #[derive(Deserialize)]
        struct HistoryResponse {
            history: Option<Vec<HistoryRecord>>,
            #[serde(rename = "historyId")]
            history_id: String,
            #[serde(rename = "nextPageToken")]
            next_page_token: Option<String>,
        }
        #[derive(Deserialize)]
        struct HistoryRecord {
            #[serde(rename = "messagesAdded", default)]
            messages_added: Vec<MessageWrapper>,
            #[serde(rename = "messagesDeleted", default)]
            messages_deleted: Vec<MessageWrapper>,
            #[serde(rename = "labelsAdded", default)]
            labels_added: Vec<MessageWrapper>,
            #[serde(rename = "labelsRemoved", default)]
            labels_removed: Vec<MessageWrapper>,
        }
        #[derive(Deserialize)]
        struct MessageWrapper {
            message: MessageIdRef,
        }

        let url = format!("{API_BASE}/history?startHistoryId={cursor}");
        let response = self.client.get(&url).bearer_auth(token).send().await.map_err(|e| CoreError::Transient(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Err(CoreError::Permanent(format!("gmail history watermark {cursor} expired, full resync required")));
        }
        translate_status(&response)?;
        let parsed: HistoryResponse = response.json().await.map_err(|e| CoreError::Transient(e.to_string()))?;

        let mut added_ids = Vec::new();
        let mut removed_ids = Vec::new();
        let mut label_changed_ids = Vec::new();
        for record in parsed.history.unwrap_or_default() {
            added_ids.extend(record.messages_added.into_iter().map(|m| m.message.id));
            removed_ids.extend(record.messages_deleted.into_iter().map(|m| m.message.id));
            label_changed_ids.extend(record.labels_added.into_iter().map(|m| m.message.id));
            label_changed_ids.extend(record.labels_removed.into_iter().map(|m| m.message.id));
        }

        // A label-only change re-fetches and re-upserts the same message so its
        // labels/flags stay in sync, without counting as a newly-added message.
        let mut refetch_ids: Vec<String> = added_ids.clone();
        for id in label_changed_ids {
            if !refetch_ids.contains(&id) && !removed_ids.contains(&id) {
                refetch_ids.push(id);
            }
        }

        let mut upserts = Vec::new();
        for id in &refetch_ids {
            upserts.push(self.get_message(credentials, id).await?);
        }

        Ok(DeltaResult {
            upserts,
            removed_provider_message_ids: removed_ids,
            next_cursor: parsed.next_page_token.unwrap_or(parsed.history_id),
        })
    }

    /// `users.getProfile`'s `historyId` is Gmail's "as of right now" watermark,
    /// usable directly as the next delta sync's `startHistoryId` (spec §4.F).
    async fn current_cursor(&self, credentials: &LiveCredentials, _folder: &str) -> CoreResult<String> {
        let token = Self::access_token(credentials)?;
        let profile: GmailProfileResponse = self.get_json(&format!("{API_BASE}/profile"), token).await?;
        Ok(profile.history_id)
    }

    async fn send_message(&self, credentials: &LiveCredentials, message: SendMessageRequest) -> CoreResult<String> {
        let token = Self::access_token(credentials)?;

        let mut builder = mail_builder::MessageBuilder::new()
            .to(message.to.clone())
            .cc(message.cc.clone())
            .bcc(message.bcc.clone())
            .subject(message.subject.clone())
            .text_body(message.body_text.clone());
        if let Some(html) = &message.body_html {
            builder = builder.html_body(html.clone());
        }
        let raw = builder.write_to_vec().map_err(|e| CoreError::Permanent(e.to_string()))?;
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw);

        #[derive(serde::Serialize)]
        struct SendBody {
            raw: String,
        }
        #[derive(Deserialize)]
        struct SendResponse {
            id: String,
        }

        let response = self
            .client
            .post(format!("{API_BASE}/messages/send"))
            .bearer_auth(token)
            .json(&SendBody { raw: encoded })
            .send()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        translate_status(&response)?;
        let parsed: SendResponse = response.json().await.map_err(|e| CoreError::Transient(e.to_string()))?;
        Ok(parsed.id)
    }

    async fn modify_labels(&self, credentials: &LiveCredentials, provider_message_id: &str, add: &[String], remove: &[String]) -> CoreResult<()> {
        let token = Self::access_token(credentials)?;
        #[derive(serde::Serialize)]
        struct ModifyBody<'a> {
            #[serde(rename = "addLabelIds")]
            add_label_ids: &'a [String],
            #[serde(rename = "removeLabelIds")]
            remove_label_ids: &'a [String],
        }
        let response = self
            .client
            .post(format!("{API_BASE}/messages/{provider_message_id}/modify"))
            .bearer_auth(token)
            .json(&ModifyBody { add_label_ids: add, remove_label_ids: remove })
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
            .post(format!("{API_BASE}/messages/{provider_message_id}/trash"))
            .bearer_auth(token)
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
            .post(format!("{API_BASE}/messages/{provider_message_id}/untrash"))
            .bearer_auth(token)
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
            data: String,
        }
        let response: AttachmentResponse = self
            .get_json(
                &format!("{API_BASE}/messages/{provider_message_id}/attachments/{provider_attachment_id}"),
                token,
            )
            .await?;
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(response.data)
            .map_err(|e| CoreError::IntegrityError(e.to_string()))
    }

    async fn list_folders(&self, credentials: &LiveCredentials) -> CoreResult<Vec<MailboxFolder>> {
        let token = Self::access_token(credentials)?;
        #[derive(Deserialize)]
        struct LabelsResponse {
            labels: Vec<GmailLabel>,
        }
        #[derive(Deserialize)]
        struct GmailLabel {
            name: String,
            #[serde(rename = "messagesUnread")]
            messages_unread: Option<u32>,
        }
        let response: LabelsResponse = self.get_json(&format!("{API_BASE}/labels"), token).await?;
        Ok(response
            .labels
            .into_iter()
            .map(|l| MailboxFolder {
                name: l.name,
                unread_count: l.messages_unread,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_list_with_display_name() {
        let addresses = parse_address_list("\"Jane Doe\" <jane@example.com>, plain@example.com");
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0].address, "jane@example.com");
        assert_eq!(addresses[0].name.as_deref(), Some("Jane Doe"));
        assert_eq!(addresses[1].address, "plain@example.com");
        assert!(addresses[1].name.is_none());
    }
}
