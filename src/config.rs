// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use config::Environment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GmailOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutlookOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub tenant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub db_path: String,
    pub encryption_key: Option<String>,
    pub attachment_cache_dir: String,
    pub max_cache_bytes: u64,
    pub gmail: GmailOAuthConfig,
    pub outlook: OutlookOAuthConfig,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: "./data/intentmail.db".to_string(),
            encryption_key: None,
            attachment_cache_dir: "./data/attachment-cache".to_string(),
            max_cache_bytes: 500 * 1024 * 1024,
            gmail: GmailOAuthConfig::default(),
            outlook: OutlookOAuthConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    ///
    /// Mirrors `INTENTMAIL_DB_PATH`, `INTENTMAIL_ENCRYPTION_KEY`,
    /// `GMAIL_CLIENT_ID`/`_SECRET`/`_REDIRECT_URI`, and the matching
    /// `OUTLOOK_*` variables (spec §6 Environment).
    pub fn load() -> Result<Self, SettingsError> {
        let defaults = Settings::default();

        let builder = config::Config::builder()
            .set_default("db_path", defaults.db_path.clone())?
            .set_default("attachment_cache_dir", defaults.attachment_cache_dir.clone())?
            .set_default("max_cache_bytes", defaults.max_cache_bytes as i64)?
            .set_default("log_level", defaults.log_level.clone())?
            .set_default("gmail.client_id", "")?
            .set_default("gmail.client_secret", "")?
            .set_default("gmail.redirect_uri", "")?
            .set_default("outlook.client_id", "")?
            .set_default("outlook.client_secret", "")?
            .set_default("outlook.redirect_uri", "")?
            .set_default("outlook.tenant_id", "common")?
            .add_source(
                Environment::default()
                    .prefix("INTENTMAIL")
                    .separator("_")
                    .try_parsing(true),
            );

        let mut settings: Settings = builder.build()?.try_deserialize().unwrap_or(defaults);

        // The GMAIL_*/OUTLOOK_* variables are not under the INTENTMAIL_ prefix
        // (spec §6), so they're applied directly on top of the config-crate pass.
        if let Ok(v) = std::env::var("GMAIL_CLIENT_ID") {
            settings.gmail.client_id = v;
        }
        if let Ok(v) = std::env::var("GMAIL_CLIENT_SECRET") {
            settings.gmail.client_secret = v;
        }
        if let Ok(v) = std::env::var("GMAIL_REDIRECT_URI") {
            settings.gmail.redirect_uri = v;
        }
        if let Ok(v) = std::env::var("OUTLOOK_CLIENT_ID") {
            settings.outlook.client_id = v;
        }
        if let Ok(v) = std::env::var("OUTLOOK_CLIENT_SECRET") {
            settings.outlook.client_secret = v;
        }
        if let Ok(v) = std::env::var("OUTLOOK_REDIRECT_URI") {
            settings.outlook.redirect_uri = v;
        }
        if let Ok(v) = std::env::var("OUTLOOK_TENANT_ID") {
            settings.outlook.tenant_id = v;
        }
        if let Ok(v) = std::env::var("INTENTMAIL_ENCRYPTION_KEY") {
            settings.encryption_key = Some(v);
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_when_env_absent() {
        std::env::remove_var("INTENTMAIL_DB_PATH");
        std::env::remove_var("INTENTMAIL_ENCRYPTION_KEY");
        let settings = Settings::load().unwrap();
        assert_eq!(settings.db_path, "./data/intentmail.db");
        assert!(settings.encryption_key.is_none());
    }

    #[test]
    #[serial]
    fn env_overrides_db_path() {
        std::env::set_var("INTENTMAIL_DB_PATH", "/tmp/custom.db");
        let settings = Settings::load().unwrap();
        assert_eq!(settings.db_path, "/tmp/custom.db");
        std::env::remove_var("INTENTMAIL_DB_PATH");
    }
}
