// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! DDL for each ordered migration (spec §4.A, §6 "Tables").
//!
//! FTS5 synchronization follows the external-content-table + AFTER triggers
//! idiom (grounded on `jstelzer-nevermail-core`'s `store/schema.rs`), adapted
//! to the `emails`/`emails_fts` pair and `(subject, bodyText, fromName,
//! fromAddress)` columns spec.md §4.A calls for.

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: INITIAL_SCHEMA,
    },
    Migration {
        version: 2,
        name: "emails_fts",
        sql: EMAILS_FTS,
    },
];

const INITIAL_SCHEMA: &str = "
CREATE TABLE accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    email TEXT NOT NULL,
    auth TEXT NOT NULL,
    display_name TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    oauth_access_token TEXT,
    oauth_refresh_token TEXT,
    oauth_expires_at TEXT,
    imap_host TEXT,
    imap_port INTEGER,
    smtp_host TEXT,
    smtp_port INTEGER,
    encrypted_password TEXT,
    provider_cursor TEXT,
    uid_validity TEXT NOT NULL DEFAULT '{}',
    highest_modseq TEXT NOT NULL DEFAULT '{}',
    last_sync_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (provider, email)
);

CREATE TABLE emails (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    provider_message_id TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    from_address TEXT NOT NULL,
    from_name TEXT,
    to_json TEXT NOT NULL DEFAULT '[]',
    cc_json TEXT NOT NULL DEFAULT '[]',
    bcc_json TEXT NOT NULL DEFAULT '[]',
    subject TEXT NOT NULL DEFAULT '',
    body_text TEXT,
    body_html TEXT,
    snippet TEXT NOT NULL DEFAULT '',
    date TEXT NOT NULL,
    received_at TEXT NOT NULL,
    flags TEXT NOT NULL DEFAULT '',
    labels_json TEXT NOT NULL DEFAULT '[]',
    in_reply_to TEXT,
    references_json TEXT NOT NULL DEFAULT '[]',
    raw_headers_json TEXT NOT NULL DEFAULT '{}',
    size_bytes INTEGER NOT NULL DEFAULT 0,
    has_attachments INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (account_id, provider_message_id)
);

CREATE INDEX idx_emails_account_date ON emails(account_id, date DESC);
CREATE INDEX idx_emails_thread ON emails(thread_id);

CREATE TABLE attachments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email_id INTEGER NOT NULL REFERENCES emails(id) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_id TEXT,
    provider_attachment_id TEXT NOT NULL,
    local_path TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_attachments_email ON attachments(email_id);
CREATE INDEX idx_attachments_local_path ON attachments(created_at);

CREATE TABLE rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    trigger TEXT NOT NULL,
    conditions_json TEXT NOT NULL,
    actions_json TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id INTEGER NOT NULL REFERENCES rules(id) ON DELETE CASCADE,
    email_id INTEGER NOT NULL REFERENCES emails(id) ON DELETE CASCADE,
    matched INTEGER NOT NULL,
    applied_actions_json TEXT NOT NULL DEFAULT '[]',
    dry_run INTEGER NOT NULL,
    executed_at TEXT NOT NULL,
    error TEXT,
    state_before_json TEXT NOT NULL,
    state_after_json TEXT,
    rolled_back INTEGER NOT NULL DEFAULT 0,
    rolled_back_at TEXT
);

CREATE INDEX idx_audit_rule ON audit_log(rule_id, executed_at DESC);
CREATE INDEX idx_audit_email ON audit_log(email_id, executed_at DESC);

CREATE TABLE sync_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    provider TEXT NOT NULL,
    sync_type TEXT NOT NULL,
    added INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    labels_changed INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL,
    error TEXT,
    synced_at TEXT NOT NULL
);

CREATE INDEX idx_sync_metrics_account ON sync_metrics(account_id, synced_at DESC);
";

const EMAILS_FTS: &str = "
CREATE VIRTUAL TABLE emails_fts USING fts5(
    subject,
    body_text,
    from_name,
    from_address,
    content='emails',
    content_rowid='id',
    tokenize='porter unicode61'
);

CREATE TRIGGER emails_fts_ai AFTER INSERT ON emails BEGIN
    INSERT INTO emails_fts(rowid, subject, body_text, from_name, from_address)
    VALUES (new.id, new.subject, new.body_text, new.from_name, new.from_address);
END;

CREATE TRIGGER emails_fts_ad AFTER DELETE ON emails BEGIN
    INSERT INTO emails_fts(emails_fts, rowid, subject, body_text, from_name, from_address)
    VALUES ('delete', old.id, old.subject, old.body_text, old.from_name, old.from_address);
END;

CREATE TRIGGER emails_fts_au AFTER UPDATE ON emails BEGIN
    INSERT INTO emails_fts(emails_fts, rowid, subject, body_text, from_name, from_address)
    VALUES ('delete', old.id, old.subject, old.body_text, old.from_name, old.from_address);
    INSERT INTO emails_fts(rowid, subject, body_text, from_name, from_address)
    VALUES (new.id, new.subject, new.body_text, new.from_name, new.from_address);
END;
";
