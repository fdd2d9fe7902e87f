//! Per-user symmetric encryption for free text kept at rest.

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext is not valid base64: {0}")]
    Encoding(String),
    #[error("ciphertext shorter than nonce")]
    Truncated,
    #[error("decryption failed")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
    #[error("plaintext is not utf-8")]
    Utf8,
}

/// AES-256-GCM-SIV keyed by SHA-256(user_id || salt).
///
/// Every value for a user is sealed under one fixed nonce, so the same text
/// for the same user always encrypts to the same value. Stored list items are
/// deduplicated by their encrypted name and rely on this.
pub struct TextCipher {
    nonce: [u8; NONCE_LEN],
    aead: Aes256GcmSiv,
}

impl TextCipher {
    pub fn for_user(user_id: &str, salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update(salt.as_bytes());
        let key: [u8; 32] = hasher.finalize().into();
        let digest = Sha256::digest(key);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        let aead = Aes256GcmSiv::new(&key.into());
        Self { nonce, aead }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Nonce::from_slice(&self.nonce);

        let sealed = self
            .aead
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let bytes = STANDARD
            .decode(ciphertext)
            .map_err(|e| CipherError::Encoding(e.to_string()))?;
        if bytes.len() < NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let plain = self
            .aead
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plain).map_err(|_| CipherError::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_what_it_encrypted() {
        let cipher = TextCipher::for_user("psid-1", "DSE");
        let sealed = cipher.encrypt("run 5k").unwrap();
        assert_ne!(sealed, "run 5k");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "run 5k");
    }

    #[test]
    fn same_text_same_user_is_stable() {
        let a = TextCipher::for_user("psid-1", "DSE").encrypt("Ava").unwrap();
        let b = TextCipher::for_user("psid-1", "DSE").encrypt("Ava").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_texts_differ_under_the_same_nonce() {
        let cipher = TextCipher::for_user("psid-1", "DSE");
        let a = STANDARD.decode(cipher.encrypt("run 5k").unwrap()).unwrap();
        let b = STANDARD.decode(cipher.encrypt("run 10k").unwrap()).unwrap();
        assert_eq!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a[NONCE_LEN..], b[NONCE_LEN..]);
        assert_eq!(cipher.decrypt(&STANDARD.encode(&b)).unwrap(), "run 10k");
    }

    #[test]
    fn other_user_cannot_decrypt() {
        let sealed = TextCipher::for_user("psid-1", "DSE").encrypt("Ava").unwrap();
        let other = TextCipher::for_user("psid-2", "DSE");
        assert!(matches!(other.decrypt(&sealed), Err(CipherError::Decrypt)));
        assert_ne!(
            sealed,
            TextCipher::for_user("psid-1", "other-salt").encrypt("Ava").unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        let cipher = TextCipher::for_user("psid-1", "DSE");
        assert!(matches!(cipher.decrypt("%%%"), Err(CipherError::Encoding(_))));
        assert!(matches!(cipher.decrypt("AAAA"), Err(CipherError::Truncated)));
    }
}
