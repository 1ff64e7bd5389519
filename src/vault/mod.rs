// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Credential vault: AES-256-CBC encryption of IMAP/SMTP passwords at rest
//! (spec §4.C).
//!
//! The encryption key is SHA-256 of whatever string is configured as
//! `INTENTMAIL_ENCRYPTION_KEY` -- any length input collapses to a 32-byte
//! key, so operators don't need to generate hex themselves. Each encryption
//! draws a fresh random IV; ciphertext is stored as `ivHex:ciphertextHex`.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("malformed ciphertext: expected ivHex:ciphertextHex")]
    MalformedCiphertext,
    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("decryption failed (wrong key or corrupted data)")]
    DecryptionFailed,
}

pub struct CredentialVault {
    key: [u8; 32],
}

impl CredentialVault {
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, VaultError> {
        let (iv_hex, ciphertext_hex) = stored.split_once(':').ok_or(VaultError::MalformedCiphertext)?;
        let iv = hex::decode(iv_hex)?;
        let ciphertext = hex::decode(ciphertext_hex)?;
        if iv.len() != 16 {
            return Err(VaultError::MalformedCiphertext);
        }

        let mut iv_arr = [0u8; 16];
        iv_arr.copy_from_slice(&iv);

        let plaintext = Aes256CbcDec::new(&self.key.into(), &iv_arr.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_plaintext() {
        let vault = CredentialVault::new("test-secret-key");
        let encrypted = vault.encrypt("hunter2");
        assert!(encrypted.contains(':'));
        let decrypted = vault.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, "hunter2");
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let vault = CredentialVault::new("test-secret-key");
        let a = vault.encrypt("same-password");
        let b = vault.encrypt("same-password");
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let vault_a = CredentialVault::new("key-a");
        let vault_b = CredentialVault::new("key-b");
        let encrypted = vault_a.encrypt("secret");
        assert!(vault_b.decrypt(&encrypted).is_err());
    }

    #[test]
    fn malformed_ciphertext_is_rejected() {
        let vault = CredentialVault::new("test-secret-key");
        assert!(vault.decrypt("not-a-valid-payload").is_err());
    }
}
