//! Credential vault: symmetric encryption for secrets at rest
//!
//! Every secret persisted by the gateway (SSH passwords, private keys,
//! passphrases) passes through here. Ciphertexts are self-contained
//! `base64(nonce || ciphertext+tag)` strings, so each row carries its own
//! nonce and the store stays a plain string column.

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// ChaCha20-Poly1305 nonce length in bytes
const NONCE_LEN: usize = 12;

/// Poly1305 authentication tag length in bytes
const TAG_LEN: usize = 16;

/// Vault errors
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid ciphertext format")]
    InvalidFormat,

    #[error("UTF-8 decode error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Process-wide credential vault.
///
/// The key is derived once at startup from the configured secret and is
/// immutable afterwards. Construct it in `main` and share via `Arc`.
pub struct CredentialVault {
    key: Zeroizing<[u8; 32]>,
}

impl CredentialVault {
    /// Create a vault from the configured secret.
    ///
    /// The secret is digested with SHA-256 so operators can supply a
    /// passphrase of any length.
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        let digest = hasher.finalize();

        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&digest);

        Self { key }
    }

    /// Encrypt a secret. Each call draws a fresh random nonce, so the same
    /// plaintext never produces the same ciphertext twice.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&*self.key)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a vault string.
    ///
    /// Fails on tampering or wrong key; callers never see partial
    /// plaintext because Poly1305 authenticates before any byte is
    /// released.
    pub fn decrypt(&self, encoded: &str) -> Result<String, VaultError> {
        let blob = STANDARD
            .decode(encoded)
            .map_err(|_| VaultError::InvalidFormat)?;

        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::InvalidFormat);
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new_from_slice(&*self.key)
            .map_err(|_| VaultError::DecryptionFailed)?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)?;

        Ok(String::from_utf8(plaintext)?)
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let vault = CredentialVault::new("test-secret");
        let plaintext = "hunter2";

        let encrypted = vault.encrypt(plaintext).unwrap();
        assert_ne!(encrypted, plaintext);

        let decrypted = vault.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_nonce_uniqueness() {
        let vault = CredentialVault::new("test-secret");

        let a = vault.encrypt("same plaintext").unwrap();
        let b = vault.encrypt("same plaintext").unwrap();

        // Fresh nonce per call: ciphertexts differ, both decrypt
        assert_ne!(a, b);
        assert_eq!(vault.decrypt(&a).unwrap(), "same plaintext");
        assert_eq!(vault.decrypt(&b).unwrap(), "same plaintext");
    }

    #[test]
    fn test_tamper_detection() {
        let vault = CredentialVault::new("test-secret");
        let encrypted = vault.encrypt("sensitive data").unwrap();

        let mut blob = STANDARD.decode(&encrypted).unwrap();
        for i in 0..blob.len() {
            blob[i] ^= 0x01;
            let tampered = STANDARD.encode(&blob);
            assert!(vault.decrypt(&tampered).is_err(), "byte {} flip accepted", i);
            blob[i] ^= 0x01;
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let vault = CredentialVault::new("correct-secret");
        let other = CredentialVault::new("wrong-secret");

        let encrypted = vault.encrypt("payload").unwrap();
        assert!(matches!(
            other.decrypt(&encrypted),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_invalid_format_rejected() {
        let vault = CredentialVault::new("test-secret");

        assert!(matches!(
            vault.decrypt("not base64 at all!!!"),
            Err(VaultError::InvalidFormat)
        ));
        // Too short to hold nonce + tag
        assert!(matches!(
            vault.decrypt(&STANDARD.encode([0u8; 8])),
            Err(VaultError::InvalidFormat)
        ));
    }
}
