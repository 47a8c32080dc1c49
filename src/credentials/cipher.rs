//! AES-256-GCM decryption of stored channel tokens.
//!
//! Stored format: base64(nonce[12] || ciphertext || tag). The tenant id and
//! channel are bound as associated data, so a blob copied into another
//! tenant's record fails the integrity check.

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use super::SecretValue;

const NONCE_BYTES: usize = 12;

/// Cipher failures. Messages never include key or plaintext material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    /// Key passphrase is empty.
    #[error("encryption key is empty")]
    EmptyKey,
    /// Key environment variable is not set.
    #[error("encryption key variable '{var}' is not set")]
    MissingKey {
        /// Name of the missing variable.
        var: String,
    },
    /// Ciphertext is not valid base64.
    #[error("ciphertext encoding is invalid")]
    Encoding,
    /// Ciphertext is shorter than a nonce plus tag.
    #[error("ciphertext is truncated")]
    Truncated,
    /// Authentication tag did not verify (wrong key, tenant or channel).
    #[error("ciphertext integrity check failed")]
    Integrity,
    /// Plaintext is not UTF-8.
    #[error("decrypted secret is not valid UTF-8")]
    NotUtf8,
    /// Plaintext is blank.
    #[error("decrypted secret is empty")]
    EmptySecret,
    /// Encryption failed.
    #[error("secret encryption failed")]
    Encrypt,
}

/// Decrypt step injected into [`super::CredentialResolver`].
pub trait SecretDecryptor: Send + Sync {
    /// Decrypt a stored ciphertext bound to `aad`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError`] when the blob is malformed or fails verification.
    fn decrypt(&self, ciphertext: &str, aad: &[u8]) -> Result<SecretValue, CipherError>;
}

/// AES-256-GCM cipher keyed once per deployment.
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl AesGcmCipher {
    /// Derive the key as SHA-256 of the deployment passphrase.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::EmptyKey`] for a blank passphrase.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CipherError> {
        if passphrase.trim().is_empty() {
            return Err(CipherError::EmptyKey);
        }
        let digest = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&digest).map_err(|_| CipherError::EmptyKey)?;
        Ok(Self { cipher })
    }

    /// Read the passphrase from the named variable through `env`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::MissingKey`] when the variable is unset.
    pub fn from_env(var: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, CipherError> {
        let passphrase = env(var).ok_or_else(|| CipherError::MissingKey {
            var: var.to_owned(),
        })?;
        Self::from_passphrase(&passphrase)
    }

    /// Encrypt a secret for storage. Used by provisioning tools and tests.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encrypt`] if the AEAD operation fails.
    pub fn encrypt(&self, plaintext: &str, aad: &[u8]) -> Result<String, CipherError> {
        use aes_gcm::aead::rand_core::RngCore as _;

        let mut nonce = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad,
                },
            )
            .map_err(|_| CipherError::Encrypt)?;

        let mut payload = Vec::with_capacity(NONCE_BYTES.saturating_add(ciphertext.len()));
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64_STANDARD.encode(payload))
    }
}

impl SecretDecryptor for AesGcmCipher {
    fn decrypt(&self, ciphertext: &str, aad: &[u8]) -> Result<SecretValue, CipherError> {
        let raw = BASE64_STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| CipherError::Encoding)?;
        if raw.len() <= NONCE_BYTES {
            return Err(CipherError::Truncated);
        }
        let (nonce, sealed) = raw.split_at(NONCE_BYTES);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
            .map_err(|_| CipherError::Integrity)?;
        let secret = String::from_utf8(plaintext).map_err(|_| CipherError::NotUtf8)?;
        if secret.trim().is_empty() {
            return Err(CipherError::EmptySecret);
        }
        Ok(SecretValue::new(secret))
    }
}
