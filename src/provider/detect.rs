// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Curated IMAP/SMTP host autodiscovery for common providers, so `imapAuth`
//! (spec §4.D) doesn't force the caller to already know server settings for
//! well-known domains.

pub struct ImapServerSettings {
    pub imap_host: &'static str,
    pub imap_port: u16,
    pub smtp_host: &'static str,
    pub smtp_port: u16,
}

const TABLE: &[(&str, ImapServerSettings)] = &[
    (
        "yahoo.com",
        ImapServerSettings {
            imap_host: "imap.mail.yahoo.com",
            imap_port: 993,
            smtp_host: "smtp.mail.yahoo.com",
            smtp_port: 465,
        },
    ),
    (
        "icloud.com",
        ImapServerSettings {
            imap_host: "imap.mail.me.com",
            imap_port: 993,
            smtp_host: "smtp.mail.me.com",
            smtp_port: 587,
        },
    ),
    (
        "me.com",
        ImapServerSettings {
            imap_host: "imap.mail.me.com",
            imap_port: 993,
            smtp_host: "smtp.mail.me.com",
            smtp_port: 587,
        },
    ),
    (
        "fastmail.com",
        ImapServerSettings {
            imap_host: "imap.fastmail.com",
            imap_port: 993,
            smtp_host: "smtp.fastmail.com",
            smtp_port: 587,
        },
    ),
    (
        "protonmail.com",
        ImapServerSettings {
            imap_host: "127.0.0.1",
            imap_port: 1143,
            smtp_host: "127.0.0.1",
            smtp_port: 1025,
        },
    ),
];

/// Look up known server settings for the domain portion of `email`, if any.
/// Unknown domains fall back to `Custom` provider semantics, which require
/// the caller to supply host/port explicitly.
pub fn detect(email: &str) -> Option<&'static ImapServerSettings> {
    let domain = email.rsplit('@').next()?.to_ascii_lowercase();
    TABLE
        .iter()
        .find(|(d, _)| *d == domain)
        .map(|(_, settings)| settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_domain_case_insensitively() {
        let settings = detect("Person@Yahoo.COM").unwrap();
        assert_eq!(settings.imap_host, "imap.mail.yahoo.com");
    }

    #[test]
    fn unknown_domain_returns_none() {
        assert!(detect("person@some-private-domain.example").is_none());
    }
}
