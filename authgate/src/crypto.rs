//! Symmetric primitives: MAC helpers and the secret store used to unwrap configured secrets.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::{Rng, thread_rng};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of an HMAC-SHA256 tag.
pub const MAC_LEN: usize = 32;

/// Compute HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> anyhow::Result<[u8; MAC_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| anyhow::anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Check `tag` against HMAC-SHA256 of `data` in constant time.
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}

/// SHA-256 digest, used to stretch arbitrary secrets to a fixed-size MAC key.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Decrypts secrets that were stored encrypted in configuration.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn decrypt(&self, ciphertext: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// AES-256-GCM secret store. Ciphertexts are `nonce (12 bytes) || ciphertext`.
pub struct AesGcmSecretStore {
    cipher: Option<Aes256Gcm>,
}

impl AesGcmSecretStore {
    /// Build from a base64 encoded 32-byte key. `None` yields a store that cannot decrypt
    /// anything, so every configured secret is used as plaintext.
    pub fn new(master_key_b64: Option<&str>) -> anyhow::Result<Self> {
        let Some(key_b64) = master_key_b64 else {
            return Ok(Self { cipher: None });
        };

        let key_bytes = general_purpose::STANDARD
            .decode(key_b64)
            .map_err(|e| anyhow::anyhow!("Failed to decode master key: {}", e))?;

        if key_bytes.len() != 32 {
            return Err(anyhow::anyhow!(
                "Master key must be 32 bytes (256 bits), got {} bytes",
                key_bytes.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|e| anyhow::anyhow!("Failed to create cipher: {}", e))?;
        Ok(Self { cipher: Some(cipher) })
    }

    /// Encrypt `plaintext` with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let cipher = self.cipher.as_ref().ok_or_else(|| anyhow::anyhow!("No master key configured"))?;

        let mut nonce_bytes = [0u8; 12];
        thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }
}

#[async_trait]
impl SecretStore for AesGcmSecretStore {
    async fn decrypt(&self, encrypted: &[u8]) -> anyhow::Result<Vec<u8>> {
        let cipher = self.cipher.as_ref().ok_or_else(|| anyhow::anyhow!("No master key configured"))?;

        if encrypted.len() < 12 {
            return Err(anyhow::anyhow!("Encrypted data too short"));
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))
    }
}

/// Resolve the legacy HMAC secret from its configured form.
///
/// The configured value is base64 decoded (or taken as raw UTF-8 if it is not base64), then
/// decrypted. Values that do not decrypt are used as they are, which keeps secrets that were
/// configured before encryption was introduced working.
pub async fn resolve_shared_secret(configured: &str, store: &dyn SecretStore) -> Vec<u8> {
    let decoded = general_purpose::STANDARD
        .decode(configured)
        .unwrap_or_else(|_| configured.as_bytes().to_vec());

    match store.decrypt(&decoded).await {
        Ok(plaintext) => {
            debug!("Using decrypted legacy token secret");
            plaintext
        }
        Err(e) => {
            warn!("Legacy token secret is not encrypted, using configured value: {}", e);
            decoded
        }
    }
}
