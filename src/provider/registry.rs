// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `providerTag` -> adapter construction, so the sync engine and facade never
//! need a dynamic-dispatch `match` scattered across call sites (spec §4.D).

use crate::config::{GmailOAuthConfig, OutlookOAuthConfig};
use crate::provider::gmail::GmailProvider;
use crate::provider::graph::GraphProvider;
use crate::provider::imap_smtp::ImapSmtpProvider;
use crate::provider::{MailProvider, OAuthRefreshConfig};
use crate::store::models::ProviderTag;
use std::sync::Arc;

/// Builds the right adapter for a stored account's `provider` tag.
///
/// IMAP-family tags (`Yahoo`, `Icloud`, `Fastmail`, `Protonmail`, `Custom`)
/// all resolve to the generic IMAP/SMTP adapter; only Gmail and Outlook have
/// dedicated REST adapters.
pub struct ProviderRegistry {
    gmail_config: GmailOAuthConfig,
    outlook_config: OutlookOAuthConfig,
}

impl ProviderRegistry {
    pub fn new(gmail_config: GmailOAuthConfig, outlook_config: OutlookOAuthConfig) -> Self {
        Self {
            gmail_config,
            outlook_config,
        }
    }

    pub fn resolve(&self, tag: ProviderTag) -> Arc<dyn MailProvider> {
        match tag {
            ProviderTag::Gmail => Arc::new(GmailProvider::new(self.gmail_config.clone())),
            ProviderTag::Outlook => Arc::new(GraphProvider::new(self.outlook_config.clone())),
            ProviderTag::Yahoo | ProviderTag::Icloud | ProviderTag::Fastmail | ProviderTag::Protonmail | ProviderTag::Custom => {
                Arc::new(ImapSmtpProvider::new())
            }
        }
    }

    /// Token endpoint + client credentials for refreshing a stored
    /// `refresh_token` (spec §4.D). `None` for IMAP-family tags, which have
    /// no OAuth token to refresh.
    pub fn oauth_refresh_config(&self, tag: ProviderTag) -> Option<OAuthRefreshConfig> {
        match tag {
            ProviderTag::Gmail => Some(OAuthRefreshConfig {
                client_id: self.gmail_config.client_id.clone(),
                client_secret: self.gmail_config.client_secret.clone(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
            }),
            ProviderTag::Outlook => Some(OAuthRefreshConfig {
                client_id: self.outlook_config.client_id.clone(),
                client_secret: self.outlook_config.client_secret.clone(),
                token_url: format!(
                    "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                    self.outlook_config.tenant_id
                ),
            }),
            ProviderTag::Yahoo | ProviderTag::Icloud | ProviderTag::Fastmail | ProviderTag::Protonmail | ProviderTag::Custom => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_each_tag_to_an_adapter() {
        let registry = ProviderRegistry::new(GmailOAuthConfig::default(), OutlookOAuthConfig::default());
        assert_eq!(registry.resolve(ProviderTag::Gmail).tag(), "gmail");
        assert_eq!(registry.resolve(ProviderTag::Outlook).tag(), "outlook");
        assert_eq!(registry.resolve(ProviderTag::Custom).tag(), "imap");
    }
}
