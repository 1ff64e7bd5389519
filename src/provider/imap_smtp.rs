// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Generic IMAP/SMTP adapter backing Yahoo, iCloud, Fastmail, ProtonMail
//! Bridge and any custom server (spec §4.E).
//!
//! Delta sync rides the mailbox's own UID space: `cursor` is
//! `"<UIDVALIDITY>:<lastSeenUid>"`. A UIDVALIDITY change means the server
//! renumbered the mailbox, so the adapter treats it as a fresh full listing
//! rather than trusting the old watermark. `provider_message_id` is the IMAP
//! UID itself, stringified -- stable as long as UIDVALIDITY doesn't change,
//! which is exactly the IMAP contract this adapter relies on. Folder
//! priority is INBOX first, then whatever else the account has previously
//! seen via `list_folders`; mutation operations (`trash`/`untrash`/label
//! stores) all act against `INBOX`, the only folder this adapter currently
//! syncs.

use crate::error::{CoreError, CoreResult};
use crate::provider::{
    DeltaResult, LiveCredentials, MailProvider, MailboxFolder, Page, ProviderProfile,
    SendMessageRequest,
};
use crate::store::emails::IncomingEmail;
use crate::store::models::{Address, Flag, IncomingAttachment};
use async_imap::types::Fetch;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};
use mail_parser::MessageParser;
use std::collections::BTreeSet;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

pub const INBOX_FOLDER_PRIORITY: &[&str] = &["INBOX", "Archive", "Sent", "Drafts"];
const TRASH_FOLDER: &str = "Trash";

type ImapSession = async_imap::Session<Compat<tokio_native_tls::TlsStream<TcpStream>>>;

pub struct ImapSmtpProvider;

impl ImapSmtpProvider {
    pub fn new() -> Self {
        Self
    }

    fn live_parts(credentials: &LiveCredentials) -> CoreResult<(&str, &str, &str, u16, &str, u16)> {
        match credentials {
            LiveCredentials::Imap {
                username,
                password,
                imap_host,
                imap_port,
                smtp_host,
                smtp_port,
            } => Ok((username, password, imap_host, *imap_port, smtp_host, *smtp_port)),
            LiveCredentials::OAuth { .. } => Err(CoreError::AuthFailed("imap/smtp requires password credentials".into())),
        }
    }

    /// Open an authenticated IMAP session: TCP connect, TLS handshake, LOGIN.
    async fn connect_session(host: &str, port: u16, username: &str, password: &str) -> CoreResult<ImapSession> {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| CoreError::Transient(format!("tls setup failed: {e}")))?;
        let tls_connector = tokio_native_tls::TlsConnector::from(tls);

        let addr = format!("{host}:{port}");
        let tcp_stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| CoreError::Transient(format!("imap connect to {addr} failed: {e}")))?;

        let tls_stream = tls_connector
            .connect(host, tcp_stream)
            .await
            .map_err(|e| CoreError::Transient(format!("imap tls handshake with {host} failed: {e}")))?;

        let compat_stream = tls_stream.compat();
        let client = async_imap::Client::new(compat_stream);
        client
            .login(username, password)
            .await
            .map_err(|(err, _client)| CoreError::AuthFailed(format!("imap login failed: {err}")))
    }

    async fn session(credentials: &LiveCredentials) -> CoreResult<ImapSession> {
        let (username, password, imap_host, imap_port, _, _) = Self::live_parts(credentials)?;
        Self::connect_session(imap_host, imap_port, username, password).await
    }
}

impl Default for ImapSmtpProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn imap_err(e: async_imap::error::Error) -> CoreError {
    match e {
        async_imap::error::Error::ConnectionLost | async_imap::error::Error::Io(_) => CoreError::Transient(e.to_string()),
        async_imap::error::Error::No(_) | async_imap::error::Error::Bad(_) => CoreError::Permanent(e.to_string()),
        _ => CoreError::Transient(e.to_string()),
    }
}

fn imap_flags_to_internal(flags: &[async_imap::types::Flag]) -> BTreeSet<Flag> {
    let mut out = BTreeSet::new();
    for flag in flags {
        match flag {
            async_imap::types::Flag::Seen => {
                out.insert(Flag::Seen);
            }
            async_imap::types::Flag::Flagged => {
                out.insert(Flag::Flagged);
            }
            async_imap::types::Flag::Draft => {
                out.insert(Flag::Draft);
            }
            async_imap::types::Flag::Answered => {
                out.insert(Flag::Answered);
            }
            async_imap::types::Flag::Deleted => {
                out.insert(Flag::Deleted);
            }
            _ => {}
        }
    }
    out
}

fn fetch_to_incoming(account_id: i64, fetch: &Fetch) -> CoreResult<IncomingEmail> {
    let body = fetch
        .body()
        .ok_or_else(|| CoreError::IntegrityError("imap fetch missing body".to_string()))?;
    let parsed = MessageParser::default()
        .parse(body)
        .ok_or_else(|| CoreError::IntegrityError("failed to parse rfc822 message".to_string()))?;

    let from = parsed
        .from()
        .and_then(|addrs| addrs.first())
        .map(|a| Address {
            address: a.address().unwrap_or_default().to_string(),
            name: a.name().map(|n| n.to_string()),
        })
        .unwrap_or(Address {
            address: String::new(),
            name: None,
        });

    let to = parsed
        .to()
        .map(|addrs| {
            addrs
                .iter()
                .map(|a| Address {
                    address: a.address().unwrap_or_default().to_string(),
                    name: a.name().map(|n| n.to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    let cc = parsed
        .cc()
        .map(|addrs| {
            addrs
                .iter()
                .map(|a| Address {
                    address: a.address().unwrap_or_default().to_string(),
                    name: a.name().map(|n| n.to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    let subject = parsed.subject().unwrap_or_default().to_string();
    let body_text = parsed.body_text(0).map(|s| s.to_string());
    let body_html = parsed.body_html(0).map(|s| s.to_string());
    let uid = fetch.uid.unwrap_or(0);

    let date = parsed
        .date()
        .map(|d| chrono::DateTime::from_timestamp(d.to_timestamp(), 0).unwrap_or_else(Utc::now))
        .unwrap_or_else(Utc::now);

    let attachments: Vec<IncomingAttachment> = parsed
        .attachments()
        .enumerate()
        .map(|(index, part)| IncomingAttachment {
            filename: part.attachment_name().unwrap_or("attachment").to_string(),
            mime_type: part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size_bytes: part.contents().len() as i64,
            content_id: part.content_id().map(|s| s.to_string()),
            provider_attachment_id: index.to_string(),
        })
        .collect();

    Ok(IncomingEmail {
        account_id,
        provider_message_id: uid.to_string(),
        thread_id: parsed
            .in_reply_to()
            .as_text()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("uid-{uid}")),
        from,
        to,
        cc,
        bcc: vec![],
        subject,
        body_text,
        body_html,
        snippet: String::new(),
        date,
        flags: imap_flags_to_internal(&fetch.flags().collect::<Vec<_>>()),
        labels: vec![],
        in_reply_to: parsed.in_reply_to().as_text().map(|s| s.to_string()),
        references: vec![],
        raw_headers: Default::default(),
        size_bytes: body.len() as i64,
        has_attachments: !attachments.is_empty(),
        attachments,
    })
}

/// `"<uidvalidity>:<lastSeenUid>"`, IMAP's delta-sync watermark for this adapter.
fn cursor_for(uid_validity: u32, last_uid: u32) -> String {
    format!("{uid_validity}:{last_uid}")
}

fn parse_cursor(cursor: &str) -> Option<(u32, u32)> {
    let (validity, uid) = cursor.split_once(':')?;
    Some((validity.parse().ok()?, uid.parse().ok()?))
}

#[async_trait]
impl MailProvider for ImapSmtpProvider {
    fn tag(&self) -> &'static str {
        "imap"
    }

    async fn user_profile(&self, credentials: &LiveCredentials) -> CoreResult<ProviderProfile> {
        let (username, ..) = Self::live_parts(credentials)?;
        Ok(ProviderProfile {
            email: username.to_string(),
            display_name: None,
        })
    }

    async fn list_messages(&self, _credentials: &LiveCredentials, _folder: &str, _cursor: Option<&str>) -> CoreResult<Page<String>> {
        // Listing by provider_message_id doesn't map cleanly onto IMAP's UID
        // space; initial sync instead drives straight through list_delta with
        // an empty cursor, which performs a full SEARCH ALL.
        Ok(Page::default())
    }

    async fn get_message(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<IncomingEmail> {
        let uid: u32 = provider_message_id
            .parse()
            .map_err(|_| CoreError::ValidationError(vec![crate::error::ValidationIssue::error("invalid_uid", "provider_message_id is not a uid")]))?;
        let mut session = Self::session(credentials).await?;
        session.select("INBOX").await.map_err(imap_err)?;
        let mut stream = session.uid_fetch(uid.to_string(), "(FLAGS INTERNALDATE BODY[])").await.map_err(imap_err)?;
        let fetch = stream
            .try_next()
            .await
            .map_err(imap_err)?
            .ok_or_else(|| CoreError::NotFound(format!("imap uid {uid} not found")))?;
        drop(stream);
        fetch_to_incoming(0, &fetch)
    }

    async fn batch_get_messages(&self, credentials: &LiveCredentials, provider_message_ids: &[String]) -> CoreResult<Vec<IncomingEmail>> {
        if provider_message_ids.is_empty() {
            return Ok(vec![]);
        }
        let sequence = provider_message_ids.join(",");
        let mut session = Self::session(credentials).await?;
        session.select("INBOX").await.map_err(imap_err)?;
        let mut stream = session.uid_fetch(&sequence, "(FLAGS INTERNALDATE BODY[])").await.map_err(imap_err)?;
        let mut out = Vec::with_capacity(provider_message_ids.len());
        while let Some(fetch) = stream.try_next().await.map_err(imap_err)? {
            out.push(fetch_to_incoming(0, &fetch)?);
        }
        Ok(out)
    }

    async fn list_delta(&self, credentials: &LiveCredentials, cursor: &str) -> CoreResult<DeltaResult> {
        let mut session = Self::session(credentials).await?;
        let mailbox = session.select("INBOX").await.map_err(imap_err)?;
        let uid_validity = mailbox.uid_validity.unwrap_or(0);
        let uid_next = mailbox.uid_next.unwrap_or(1);

        let previous = parse_cursor(cursor);
        let stale_watermark = previous.map(|(validity, _)| validity != uid_validity).unwrap_or(true);

        let search_criteria = match previous {
            Some((_, last_uid)) if !stale_watermark => format!("UID {}:*", last_uid + 1),
            _ => "ALL".to_string(),
        };

        let uids = session.uid_search(&search_criteria).await.map_err(imap_err)?;
        let mut uids: Vec<u32> = uids.into_iter().filter(|uid| *uid < uid_next).collect();
        uids.sort_unstable();

        let mut upserts = Vec::with_capacity(uids.len());
        if !uids.is_empty() {
            let sequence = uids.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",");
            let mut stream = session.uid_fetch(&sequence, "(FLAGS INTERNALDATE BODY[])").await.map_err(imap_err)?;
            while let Some(fetch) = stream.try_next().await.map_err(imap_err)? {
                upserts.push(fetch_to_incoming(0, &fetch)?);
            }
        }

        Ok(DeltaResult {
            upserts,
            // IMAP SEARCH can't report messages removed since a watermark
            // without walking the whole mailbox; deletions surface next time
            // the caller reconciles against the store's known UID set.
            removed_provider_message_ids: vec![],
            next_cursor: cursor_for(uid_validity, uid_next.saturating_sub(1)),
        })
    }

    /// `SELECT`'s returned `Mailbox` carries `UIDVALIDITY`/`UIDNEXT` fresh off
    /// the wire -- exactly the watermark the next delta sync needs, without a
    /// SEARCH (spec §4.F).
    async fn current_cursor(&self, credentials: &LiveCredentials, folder: &str) -> CoreResult<String> {
        let mut session = Self::session(credentials).await?;
        let mailbox = session.select(folder).await.map_err(imap_err)?;
        Ok(cursor_for(mailbox.uid_validity.unwrap_or(0), mailbox.uid_next.unwrap_or(1).saturating_sub(1)))
    }

    async fn send_message(&self, credentials: &LiveCredentials, message: SendMessageRequest) -> CoreResult<String> {
        let (username, password, _, _, smtp_host, smtp_port) = Self::live_parts(credentials)?;

        let mut builder = LettreMessage::builder()
            .from(username.parse::<Mailbox>().map_err(|e| {
                CoreError::ValidationError(vec![crate::error::ValidationIssue::error("invalid_from_address", e.to_string())])
            })?)
            .subject(&message.subject);

        for to in &message.to {
            builder = builder.to(to.parse::<Mailbox>().map_err(|e| CoreError::Permanent(e.to_string()))?);
        }
        for cc in &message.cc {
            builder = builder.cc(cc.parse::<Mailbox>().map_err(|e| CoreError::Permanent(e.to_string()))?);
        }
        for bcc in &message.bcc {
            builder = builder.bcc(bcc.parse::<Mailbox>().map_err(|e| CoreError::Permanent(e.to_string()))?);
        }
        if let Some(in_reply_to) = &message.in_reply_to {
            builder = builder.in_reply_to(in_reply_to.clone());
        }

        let email = match &message.body_html {
            Some(html) => builder
                .multipart(MultiPart::alternative_plain_html(message.body_text.clone(), html.clone()))
                .map_err(|e| CoreError::Permanent(e.to_string()))?,
            None => builder
                .singlepart(SinglePart::plain(message.body_text.clone()))
                .map_err(|e| CoreError::Permanent(e.to_string()))?,
        };

        let transport: AsyncSmtpTransport<Tokio1Executor> = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(|e| CoreError::Transient(e.to_string()))?
            .port(smtp_port)
            .credentials(SmtpCredentials::new(username.to_string(), password.to_string()))
            .build();

        transport.send(email).await.map_err(|e| CoreError::Transient(e.to_string()))?;

        Ok(String::new())
    }

    /// Only the flag-shaped labels (`\Seen`, `\Flagged`, `\Answered`,
    /// `\Draft`, `\Deleted`) translate to IMAP; anything else is silently
    /// ignored, matching this adapter's folder/flag-only label model.
    async fn modify_labels(&self, credentials: &LiveCredentials, provider_message_id: &str, add: &[String], remove: &[String]) -> CoreResult<()> {
        let mut session = Self::session(credentials).await?;
        session.select("INBOX").await.map_err(imap_err)?;

        if !add.is_empty() {
            let flags = add.join(" ");
            session.uid_store(provider_message_id, format!("+FLAGS ({flags})")).await.map_err(imap_err)?.try_collect::<Vec<_>>().await.map_err(imap_err)?;
        }
        if !remove.is_empty() {
            let flags = remove.join(" ");
            session.uid_store(provider_message_id, format!("-FLAGS ({flags})")).await.map_err(imap_err)?.try_collect::<Vec<_>>().await.map_err(imap_err)?;
        }
        Ok(())
    }

    /// MOVE (RFC 6851) when the server supports it, falling back to
    /// COPY + `\Deleted` + EXPUNGE (spec §4.E).
    async fn trash(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<()> {
        let mut session = Self::session(credentials).await?;
        session.select("INBOX").await.map_err(imap_err)?;
        if session.uid_mv(provider_message_id, TRASH_FOLDER).await.is_ok() {
            return Ok(());
        }
        session.uid_copy(provider_message_id, TRASH_FOLDER).await.map_err(imap_err)?;
        session
            .uid_store(provider_message_id, "+FLAGS (\\Deleted)")
            .await
            .map_err(imap_err)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(imap_err)?;
        session.expunge().await.map_err(imap_err)?.try_collect::<Vec<_>>().await.map_err(imap_err)?;
        Ok(())
    }

    async fn untrash(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<()> {
        let mut session = Self::session(credentials).await?;
        session.select(TRASH_FOLDER).await.map_err(imap_err)?;
        if session.uid_mv(provider_message_id, "INBOX").await.is_ok() {
            return Ok(());
        }
        session.uid_copy(provider_message_id, "INBOX").await.map_err(imap_err)?;
        session
            .uid_store(provider_message_id, "+FLAGS (\\Deleted)")
            .await
            .map_err(imap_err)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(imap_err)?;
        session.expunge().await.map_err(imap_err)?.try_collect::<Vec<_>>().await.map_err(imap_err)?;
        Ok(())
    }

    async fn delete_permanently(&self, credentials: &LiveCredentials, provider_message_id: &str) -> CoreResult<()> {
        let mut session = Self::session(credentials).await?;
        session.select("INBOX").await.map_err(imap_err)?;
        session
            .uid_store(provider_message_id, "+FLAGS (\\Deleted)")
            .await
            .map_err(imap_err)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(imap_err)?;
        session.expunge().await.map_err(imap_err)?.try_collect::<Vec<_>>().await.map_err(imap_err)?;
        Ok(())
    }

    /// `provider_attachment_id` is the 0-based index into `mail_parser`'s
    /// attachment iterator over the already-fetched rfc822 body.
    async fn get_attachment(&self, credentials: &LiveCredentials, provider_message_id: &str, provider_attachment_id: &str) -> CoreResult<Vec<u8>> {
        let index: usize = provider_attachment_id
            .parse()
            .map_err(|_| CoreError::ValidationError(vec![crate::error::ValidationIssue::error("invalid_attachment_index", "not a number")]))?;

        let mut session = Self::session(credentials).await?;
        session.select("INBOX").await.map_err(imap_err)?;
        let mut stream = session.uid_fetch(provider_message_id, "BODY[]").await.map_err(imap_err)?;
        let fetch = stream
            .try_next()
            .await
            .map_err(imap_err)?
            .ok_or_else(|| CoreError::NotFound(format!("imap uid {provider_message_id} not found")))?;
        let body = fetch.body().ok_or_else(|| CoreError::IntegrityError("imap fetch missing body".to_string()))?;
        drop(stream);

        let parsed = MessageParser::default()
            .parse(body)
            .ok_or_else(|| CoreError::IntegrityError("failed to parse rfc822 message".to_string()))?;
        parsed
            .attachments()
            .nth(index)
            .map(|part| part.contents().to_vec())
            .ok_or_else(|| CoreError::NotFound(format!("attachment {index} not found on uid {provider_message_id}")))
    }

    async fn list_folders(&self, credentials: &LiveCredentials) -> CoreResult<Vec<MailboxFolder>> {
        let mut session = Self::session(credentials).await?;
        let mut stream = session.list(None, Some("*")).await.map_err(imap_err)?;
        let mut names = Vec::new();
        while let Some(name) = stream.try_next().await.map_err(imap_err)? {
            names.push(name.name().to_string());
        }
        drop(stream);

        if names.is_empty() {
            return Ok(INBOX_FOLDER_PRIORITY
                .iter()
                .map(|name| MailboxFolder {
                    name: name.to_string(),
                    unread_count: None,
                })
                .collect());
        }

        let mut folders = Vec::with_capacity(names.len());
        for name in names {
            let unread_count = session
                .examine(&name)
                .await
                .ok()
                .and_then(|mailbox| mailbox.unseen);
            folders.push(MailboxFolder {
                name,
                unread_count,
            });
        }
        Ok(folders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_priority_puts_inbox_first() {
        assert_eq!(INBOX_FOLDER_PRIORITY[0], "INBOX");
    }

    #[test]
    fn cursor_round_trips_validity_and_uid() {
        let cursor = cursor_for(42, 100);
        assert_eq!(cursor, "42:100");
        assert_eq!(parse_cursor(&cursor), Some((42, 100)));
    }

    #[test]
    fn parse_cursor_rejects_malformed_input() {
        assert_eq!(parse_cursor("not-a-cursor"), None);
        assert_eq!(parse_cursor(""), None);
    }
}
