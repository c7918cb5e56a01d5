//! Credential encryption for source secrets.
//!
//! Sources keep their credentials as an opaque encrypted blob. Only adapters
//! ever see the plaintext; the engine moves ciphertext around.
//!
//! Ciphertext format: nonce (12 bytes) || AES-256-GCM ciphertext+tag

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_CONTEXT: &[u8] = b"bulksync/source-credentials/aes-256-gcm/v1";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Invalid ciphertext: too short")]
    CiphertextTooShort,

    #[error("Decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Credential payload invalid: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("No credential cipher configured")]
    CipherUnavailable,
}

/// Encrypts and decrypts opaque credential blobs
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CredentialError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CredentialError>;
}

/// AES-256-GCM cipher keyed from an operator passphrase
pub struct PassphraseCipher {
    key: [u8; 32],
}

impl PassphraseCipher {
    pub fn new(passphrase: &str) -> Result<Self, CredentialError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(passphrase.as_bytes())
            .map_err(|e| CredentialError::EncryptionFailed(e.to_string()))?;
        mac.update(KEY_CONTEXT);
        Ok(Self {
            key: mac.finalize().into_bytes().into(),
        })
    }

    fn cipher(&self) -> Result<Aes256Gcm, CredentialError> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CredentialError::EncryptionFailed(e.to_string()))
    }
}

impl CredentialCipher for PassphraseCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CredentialError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CredentialError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CredentialError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CredentialError::CiphertextTooShort);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CredentialError::DecryptionFailed)
    }
}
