// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Entity types for the unified mail store (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTag {
    Gmail,
    Outlook,
    Yahoo,
    Icloud,
    Fastmail,
    Protonmail,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthTag {
    Oauth,
    Imap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImapCredentials {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Encrypted form, `ivHex:ciphertextHex` (spec §4.C). Never holds plaintext.
    pub encrypted_password: String,
}

/// Provider-specific sync cursor (spec §3 Account "Sync state").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Gmail `historyId` or Graph `@odata.deltaLink`.
    pub provider_cursor: Option<String>,
    /// IMAP folder UIDVALIDITY, keyed by folder name.
    pub uid_validity: BTreeMap<String, u32>,
    /// IMAP highest MODSEQ seen, keyed by folder name (CONDSTORE-capable servers only).
    pub highest_modseq: BTreeMap<String, u64>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub provider: ProviderTag,
    pub email: String,
    pub auth: AuthTag,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub oauth: Option<OAuthCredentials>,
    pub imap: Option<ImapCredentials>,
    pub sync_cursor: SyncCursor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    Seen,
    Flagged,
    Draft,
    Answered,
    Deleted,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: i64,
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
    pub received_at: DateTime<Utc>,
    pub flags: BTreeSet<Flag>,
    pub labels: Vec<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub raw_headers: BTreeMap<String, String>,
    pub size_bytes: i64,
    pub has_attachments: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One attachment as surfaced by a provider adapter, before it has a row of
/// its own (spec §4.B, §4.E). `provider_attachment_id` is the provider's own
/// handle for a later `getAttachment` call (Gmail attachment id, IMAP part
/// index as a string, ...).
#[derive(Debug, Clone)]
pub struct IncomingAttachment {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub content_id: Option<String>,
    pub provider_attachment_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub email_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub content_id: Option<String>,
    pub provider_attachment_id: String,
    pub local_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleTrigger {
    OnNewEmail,
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionField {
    From,
    To,
    Cc,
    Subject,
    Body,
    Label,
    HasAttachment,
    ThreadSize,
    Date,
    AgeDays,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    MatchesRegex,
    GreaterThan,
    LessThan,
    In,
    NotIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    AddLabel,
    RemoveLabel,
    MarkRead,
    MarkUnread,
    Archive,
    MoveToTrash,
    Delete,
    Forward,
    MoveFolder,
    ApplyLabel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    pub parameter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub trigger: RuleTrigger,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Label/flag snapshot captured before and (optionally) after a rule execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailStateSnapshot {
    pub labels: Vec<String>,
    pub flags: BTreeSet<Flag>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub rule_id: i64,
    pub email_id: i64,
    pub matched: bool,
    pub applied_actions: Vec<String>,
    pub dry_run: bool,
    pub executed_at: DateTime<Utc>,
    pub error: Option<String>,
    pub state_before: EmailStateSnapshot,
    pub state_after: Option<EmailStateSnapshot>,
    pub rolled_back: bool,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncType {
    Initial,
    Delta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMetric {
    pub id: i64,
    pub account_id: i64,
    pub provider: ProviderTag,
    pub sync_type: SyncType,
    pub added: i64,
    pub deleted: i64,
    pub labels_changed: i64,
    pub duration_ms: i64,
    pub success: bool,
    pub error: Option<String>,
    pub synced_at: DateTime<Utc>,
}
