// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Field-level encryption for Aadhaar numbers and bank details.
//!
//! ## Envelope
//!
//! ```text
//! v1:<base64(nonce[12] || ciphertext || tag[16])>
//! ```
//!
//! - AES-256-GCM with a fresh random nonce per value, so equal plaintexts
//!   produce different ciphertexts.
//! - The field purpose (`aadhaar`, `bank_account`, ...) is bound as
//!   associated data; a ciphertext copied into another field fails to open.
//! - The key is the SHA-256 digest of `FIELD_ENCRYPTION_KEY`.
//!
//! Because ciphertexts are randomized, uniqueness lookups use [`FieldCipher::hash`],
//! a keyed HMAC-SHA256 digest, never the ciphertext.

use std::fmt;

use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Version prefix of the sealed envelope.
const ENVELOPE_PREFIX: &str = "v1:";

/// Domain separator for the digest key.
const DIGEST_KEY_LABEL: &[u8] = b"dbt-portal/field-digest/v1";

/// Associated-data labels for encrypted fields.
pub mod purpose {
    pub const AADHAAR: &str = "aadhaar";
    pub const BANK_ACCOUNT: &str = "bank_account";
    pub const IFSC: &str = "ifsc";
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("field encryption key could not be initialised")]
    Key,

    #[error("random nonce generation failed")]
    Random,

    #[error("field encryption failed")]
    Seal,

    #[error("stored {0} could not be decrypted")]
    Decrypt(String),

    #[error("stored ciphertext is malformed: {0}")]
    Malformed(&'static str),
}

impl CryptoError {
    pub fn code(&self) -> &'static str {
        match self {
            CryptoError::Decrypt(_) | CryptoError::Malformed(_) => "decryption_failed",
            _ => "encryption_failed",
        }
    }
}

/// Ciphertext as stored in a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedField(String);

impl SealedField {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Symmetric cipher and keyed digest for sensitive record fields.
pub struct FieldCipher {
    key: LessSafeKey,
    digest: HmacSha256,
    rng: SystemRandom,
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    /// Derive the cipher and digest keys from a configuration secret.
    pub fn new(secret: &str) -> Result<Self, CryptoError> {
        let key_bytes = Sha256::digest(secret.as_bytes());
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| CryptoError::Key)?;

        let digest_key = Sha256::new()
            .chain_update(DIGEST_KEY_LABEL)
            .chain_update(secret.as_bytes())
            .finalize();
        let digest = HmacSha256::new_from_slice(&digest_key).map_err(|_| CryptoError::Key)?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            digest,
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt `plaintext` for the given field purpose.
    pub fn encrypt(&self, purpose: &str, plaintext: &str) -> Result<SealedField, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::Random)?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(purpose.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Seal)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + in_out.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&in_out);

        Ok(SealedField(format!(
            "{ENVELOPE_PREFIX}{}",
            Base64::encode_string(&envelope)
        )))
    }

    /// Decrypt a sealed value. Any tampering or purpose mismatch is an error.
    pub fn decrypt(&self, purpose: &str, sealed: &SealedField) -> Result<String, CryptoError> {
        let encoded = sealed
            .0
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or(CryptoError::Malformed("unknown envelope version"))?;
        let mut bytes =
            Base64::decode_vec(encoded).map_err(|_| CryptoError::Malformed("invalid base64"))?;

        if bytes.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CryptoError::Malformed("envelope truncated"));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at_mut(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CryptoError::Malformed("invalid nonce"))?;

        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(purpose.as_bytes()), ciphertext)
            .map_err(|_| CryptoError::Decrypt(purpose.to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| CryptoError::Malformed("plaintext is not UTF-8"))
    }

    /// Keyed one-way digest (hex HMAC-SHA256).
    ///
    /// Used for refresh tokens and for uniqueness indexes over encrypted fields.
    pub fn hash(&self, value: &str) -> String {
        let mut mac = self.digest.clone();
        mac.update(value.as_bytes());
        to_hex(&mac.finalize().into_bytes())
    }
}

/// Mask all but the last four digits of an identifier (`XXXX-XXXX-1234`).
pub fn mask_aadhaar(aadhaar: &str) -> String {
    let digits: Vec<char> = aadhaar.chars().filter(|c| c.is_ascii_digit()).collect();
    let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
    format!("XXXX-XXXX-{tail}")
}

/// Unkeyed SHA-256 of a byte slice, hex encoded. Used for document checksums.
pub fn sha256_hex(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> FieldCipher {
        FieldCipher::new("unit-test-secret").unwrap()
    }

    #[test]
    fn aadhaar_round_trip() {
        let cipher = cipher();
        let sealed = cipher.encrypt(purpose::AADHAAR, "123456789012").unwrap();
        assert!(sealed.as_str().starts_with("v1:"));
        assert!(!sealed.as_str().contains("123456789012"));
        assert_eq!(
            cipher.decrypt(purpose::AADHAAR, &sealed).unwrap(),
            "123456789012"
        );
    }

    #[test]
    fn equal_plaintexts_produce_distinct_ciphertexts() {
        let cipher = cipher();
        let a = cipher.encrypt(purpose::BANK_ACCOUNT, "000123456789").unwrap();
        let b = cipher.encrypt(purpose::BANK_ACCOUNT, "000123456789").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn purpose_mismatch_fails() {
        let cipher = cipher();
        let sealed = cipher.encrypt(purpose::IFSC, "SBIN0001234").unwrap();
        let result = cipher.decrypt(purpose::BANK_ACCOUNT, &sealed);
        assert!(matches!(result, Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = cipher().encrypt(purpose::AADHAAR, "123456789012").unwrap();
        let other = FieldCipher::new("another-secret").unwrap();
        assert!(other.decrypt(purpose::AADHAAR, &sealed).is_err());
    }

    #[test]
    fn malformed_envelope_is_reported() {
        let cipher = cipher();
        let result = cipher.decrypt(purpose::AADHAAR, &SealedField("plain".to_string()));
        assert!(matches!(result, Err(CryptoError::Malformed(_))));

        let result = cipher.decrypt(purpose::AADHAAR, &SealedField("v1:AAAA".to_string()));
        assert!(matches!(result, Err(CryptoError::Malformed(_))));
    }

    #[test]
    fn hash_is_deterministic_and_keyed() {
        let cipher = cipher();
        let h1 = cipher.hash("123456789012");
        assert_eq!(h1, cipher.hash("123456789012"));
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, cipher.hash("123456789013"));
        assert_ne!(h1, FieldCipher::new("other").unwrap().hash("123456789012"));
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn mask_keeps_last_four_digits() {
        assert_eq!(mask_aadhaar("123456789012"), "XXXX-XXXX-9012");
        assert_eq!(mask_aadhaar("12"), "XXXX-XXXX-12");
    }
}
