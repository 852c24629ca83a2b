//! Signing and encryption key management
//!
//! Keys live in the option store. Generation is lazy: the first caller that
//! finds a key missing generates and persists it. The RSA pair is always
//! written in one `set_options` call so the halves never diverge.

use crate::auth::crypto::{EncryptionKey, RsaKeyPair, generate_rsa_key_pair};
use crate::constants::{
    OPTION_ENCRYPTION_KEY, OPTION_PRIVATE_KEY, OPTION_PUBLIC_KEY, RSA_KEY_BITS,
};
use crate::storage::Storage;
use crate::{PressGateError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Produces and persists the RSA signing pair and the envelope key
pub struct KeyManager {
    storage: Arc<dyn Storage>,
    // Serializes generation so concurrent first calls agree on one key
    generation: Mutex<()>,
}

impl KeyManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            generation: Mutex::new(()),
        }
    }

    /// Symmetric key for auth code and refresh token payloads
    pub async fn get_encryption_key(&self) -> Result<EncryptionKey> {
        if let Some(encoded) = self.storage.get_option(OPTION_ENCRYPTION_KEY).await? {
            return EncryptionKey::from_base64(&encoded);
        }

        let _guard = self.generation.lock().await;
        if let Some(encoded) = self.storage.get_option(OPTION_ENCRYPTION_KEY).await? {
            return EncryptionKey::from_base64(&encoded);
        }

        self.generate_encryption_key().await
    }

    /// RSA private key, PKCS#8 PEM
    pub async fn get_private_key(&self) -> Result<String> {
        Ok(self.key_pair().await?.private_pem)
    }

    /// RSA public key, SPKI PEM
    pub async fn get_public_key(&self) -> Result<String> {
        Ok(self.key_pair().await?.public_pem)
    }

    /// Delete all key material and generate a fresh set
    ///
    /// Every outstanding access token, refresh token and authorization code
    /// stops verifying once this returns.
    pub async fn regenerate_keys(&self) -> Result<()> {
        let _guard = self.generation.lock().await;

        for key in [OPTION_ENCRYPTION_KEY, OPTION_PRIVATE_KEY, OPTION_PUBLIC_KEY] {
            self.storage.delete_option(key).await?;
        }

        self.generate_encryption_key().await?;
        self.generate_key_pair().await?;

        tracing::warn!("OAuth keys regenerated; all outstanding tokens are now invalid");
        Ok(())
    }

    async fn key_pair(&self) -> Result<RsaKeyPair> {
        if let Some(pair) = self.stored_key_pair().await? {
            return Ok(pair);
        }

        let _guard = self.generation.lock().await;
        if let Some(pair) = self.stored_key_pair().await? {
            return Ok(pair);
        }

        self.generate_key_pair().await
    }

    /// Both halves, or `None` if either is missing
    async fn stored_key_pair(&self) -> Result<Option<RsaKeyPair>> {
        let private_pem = self.storage.get_option(OPTION_PRIVATE_KEY).await?;
        let public_pem = self.storage.get_option(OPTION_PUBLIC_KEY).await?;

        Ok(match (private_pem, public_pem) {
            (Some(private_pem), Some(public_pem))
                if !private_pem.is_empty() && !public_pem.is_empty() =>
            {
                Some(RsaKeyPair {
                    private_pem,
                    public_pem,
                })
            }
            _ => None,
        })
    }

    async fn generate_encryption_key(&self) -> Result<EncryptionKey> {
        let key = EncryptionKey::generate();
        self.storage
            .set_option(OPTION_ENCRYPTION_KEY, &key.to_base64())
            .await?;
        tracing::info!("Generated OAuth encryption key");
        Ok(key)
    }

    async fn generate_key_pair(&self) -> Result<RsaKeyPair> {
        let pair = tokio::task::spawn_blocking(|| generate_rsa_key_pair(RSA_KEY_BITS))
            .await
            .map_err(|e| PressGateError::crypto(format!("RSA key generation task failed: {}", e)))??;

        self.storage
            .set_options(&[
                (OPTION_PRIVATE_KEY, pair.private_pem.as_str()),
                (OPTION_PUBLIC_KEY, pair.public_pem.as_str()),
            ])
            .await?;

        tracing::info!(bits = RSA_KEY_BITS, "Generated OAuth RSA key pair");
        Ok(pair)
    }
}

#[cfg(test)]
mod keys_test {
    include!("keys_test.rs");
}
