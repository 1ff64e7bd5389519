// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Content-addressed attachment cache with size-bounded LRU eviction (spec §4.B).
//!
//! Cache keys are derived from `sha256(attachment_id + filename)`, truncated
//! to 16 hex characters, with the original extension preserved for MIME
//! sniffing convenience. Ordering matters for crash safety: a `cache()` write
//! lands the bytes on disk before the store row is updated with `local_path`;
//! eviction deletes the store row before removing the file, so a crash
//! between the two leaves an orphaned file (harmless, reclaimable) rather
//! than a store row pointing at nothing.

use crate::error::{CoreError, CoreResult};
use crate::store::{attachments, Store};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub struct AttachmentCache {
    store: Store,
    cache_dir: PathBuf,
    max_bytes: u64,
}

fn cache_key(attachment_id: i64, filename: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(attachment_id.to_le_bytes());
    hasher.update(filename.as_bytes());
    let digest = hasher.finalize();
    let short = hex::encode(&digest[..8]);
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    format!("{short}.{ext}")
}

impl AttachmentCache {
    pub fn new(store: Store, cache_dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            store,
            cache_dir: cache_dir.into(),
            max_bytes,
        }
    }

    fn path_for(&self, attachment_id: i64, filename: &str) -> PathBuf {
        self.cache_dir.join(cache_key(attachment_id, filename))
    }

    /// True iff the recorded `local_path` exists on disk. A record pointing
    /// at a missing file is stale (cache dir wiped out-of-band, eviction
    /// crashed mid-way) and is cleared rather than trusted.
    pub async fn is_cached(&self, attachment_id: i64) -> CoreResult<bool> {
        let attachment = attachments::get_attachment(&self.store, attachment_id).await?;
        let Some(path) = attachment.local_path else {
            return Ok(false);
        };
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            Ok(true)
        } else {
            attachments::clear_local_path(&self.store, attachment_id).await?;
            Ok(false)
        }
    }

    /// Write `bytes` for `attachment_id`, evicting older entries first if the
    /// write would exceed `max_bytes`, then record the path in the store.
    pub async fn cache(&self, attachment_id: i64, bytes: &[u8]) -> CoreResult<PathBuf> {
        let attachment = attachments::get_attachment(&self.store, attachment_id).await?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        self.evict_if_needed(bytes.len() as u64).await?;

        let path = self.path_for(attachment_id, &attachment.filename);
        tokio::fs::write(&path, bytes).await?;
        attachments::set_local_path(&self.store, attachment_id, path.to_string_lossy().as_ref()).await?;

        Ok(path)
    }

    pub async fn read(&self, attachment_id: i64) -> CoreResult<Vec<u8>> {
        let attachment = attachments::get_attachment(&self.store, attachment_id).await?;
        let local_path = attachment
            .local_path
            .ok_or_else(|| CoreError::NotFound(format!("attachment {attachment_id} not cached")))?;
        match tokio::fs::read(&local_path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                attachments::clear_local_path(&self.store, attachment_id).await?;
                Err(CoreError::NotFound(format!("attachment {attachment_id} not cached")))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn current_cache_size(&self) -> CoreResult<u64> {
        let entries = attachments::list_cached_oldest_first(&self.store).await?;
        Ok(entries.iter().map(|a| a.size_bytes.max(0) as u64).sum())
    }

    /// Evict the oldest cached entries (by `created_at`) until there is room
    /// for `incoming_bytes` within `max_bytes`.
    async fn evict_if_needed(&self, incoming_bytes: u64) -> CoreResult<()> {
        let mut current = self.current_cache_size().await?;
        if current + incoming_bytes <= self.max_bytes {
            return Ok(());
        }

        let oldest_first = attachments::list_cached_oldest_first(&self.store).await?;
        for attachment in oldest_first {
            if current + incoming_bytes <= self.max_bytes {
                break;
            }
            if let Some(path) = attachment.local_path.clone() {
                attachments::clear_local_path(&self.store, attachment.id).await?;
                let _ = tokio::fs::remove_file(&path).await;
                current = current.saturating_sub(attachment.size_bytes.max(0) as u64);
            }
        }

        Ok(())
    }

    pub async fn evict(&self, attachment_id: i64) -> CoreResult<()> {
        let attachment = attachments::get_attachment(&self.store, attachment_id).await?;
        if let Some(path) = attachment.local_path {
            attachments::clear_local_path(&self.store, attachment_id).await?;
            let _ = tokio::fs::remove_file(&path).await;
        }
        Ok(())
    }

    /// Remove every cached file and clear all `local_path` references.
    pub async fn clear(&self) -> CoreResult<()> {
        let entries = attachments::list_cached_oldest_first(&self.store).await?;
        for attachment in entries {
            self.evict(attachment.id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::accounts::{create_account, NewAccount};
    use crate::store::attachments::{record_attachment, NewAttachment};
    use crate::store::emails::{upsert_email, IncomingEmail};
    use crate::store::models::{Address, AuthTag, ProviderTag};
    use std::collections::{BTreeMap, BTreeSet};

    async fn seed_attachment(store: &Store, size_bytes: i64, filename: &str) -> i64 {
        let account = create_account(
            store,
            NewAccount {
                provider: ProviderTag::Custom,
                email: format!("owner-{filename}@example.com"),
                auth: AuthTag::Imap,
                display_name: None,
                oauth: None,
                imap: None,
            },
        )
        .await
        .unwrap();

        let email = upsert_email(
            store,
            IncomingEmail {
                account_id: account.id,
                provider_message_id: format!("m-{filename}"),
                thread_id: "t".into(),
                from: Address {
                    address: "a@b.com".into(),
                    name: None,
                },
                to: vec![],
                cc: vec![],
                bcc: vec![],
                subject: "s".into(),
                body_text: None,
                body_html: None,
                snippet: "".into(),
                date: chrono::Utc::now(),
                flags: BTreeSet::new(),
                labels: vec![],
                in_reply_to: None,
                references: vec![],
                raw_headers: BTreeMap::new(),
                size_bytes: 0,
                has_attachments: true,
                attachments: vec![],
            },
        )
        .await
        .unwrap();

        record_attachment(
            store,
            NewAttachment {
                email_id: email.id,
                filename: filename.to_string(),
                mime_type: "application/octet-stream".into(),
                size_bytes,
                content_id: None,
                provider_attachment_id: format!("prov-{filename}"),
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn caches_and_reads_back_bytes() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let attachment_id = seed_attachment(&store, 10, "note.txt").await;

        let cache = AttachmentCache::new(store, dir.path(), 1024 * 1024);
        cache.cache(attachment_id, b"hello world").await.unwrap();

        assert!(cache.is_cached(attachment_id).await.unwrap());
        let bytes = cache.read(attachment_id).await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn is_cached_self_heals_when_file_is_missing() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let attachment_id = seed_attachment(&store, 10, "note.txt").await;

        let cache = AttachmentCache::new(store, dir.path(), 1024 * 1024);
        let path = cache.cache(attachment_id, b"hello world").await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert!(!cache.is_cached(attachment_id).await.unwrap());
        assert!(cache.read(attachment_id).await.is_err());

        let attachment = attachments::get_attachment(&cache.store, attachment_id).await.unwrap();
        assert!(attachment.local_path.is_none());
    }

    #[tokio::test]
    async fn evicts_oldest_entry_when_over_budget() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let first_id = seed_attachment(&store, 100, "first.bin").await;
        let second_id = seed_attachment(&store, 100, "second.bin").await;

        let cache = AttachmentCache::new(store, dir.path(), 150);
        cache.cache(first_id, &vec![0u8; 100]).await.unwrap();
        cache.cache(second_id, &vec![0u8; 100]).await.unwrap();

        assert!(!cache.is_cached(first_id).await.unwrap());
        assert!(cache.is_cached(second_id).await.unwrap());
    }
}
