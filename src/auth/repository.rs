//! OAuth repositories
//!
//! Thin adapters between the OAuth entities and the storage traits. The
//! authorization and resource servers only talk to storage through these.

use crate::auth::crypto::{generate_client_secret, hash_client_secret, verify_client_secret};
use crate::model::*;
use crate::storage::Storage;
use crate::{PressGateError, Result};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Registered clients
#[derive(Clone)]
pub struct ClientRepository {
    storage: Arc<dyn Storage>,
}

/// Registration input for a new client
#[derive(Debug, Clone)]
pub struct NewClient {
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub is_confidential: bool,
    pub owner_user_id: Option<UserId>,
}

impl ClientRepository {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn get_client_entity(&self, client_id: &str) -> Result<Option<Client>> {
        self.storage.get_client(client_id).await
    }

    /// Authenticate a client at the token endpoint
    ///
    /// Confidential clients must present a secret matching the stored hash.
    /// Public clients are accepted without one (PKCE protects them).
    pub async fn validate_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<Option<Client>> {
        let Some(client) = self.storage.get_client(client_id).await? else {
            return Ok(None);
        };

        if !client.is_confidential {
            return Ok(Some(client));
        }

        let valid = match (client_secret, client.hashed_secret.as_deref()) {
            (Some(secret), Some(hashed)) => verify_client_secret(secret, hashed),
            _ => false,
        };

        Ok(valid.then_some(client))
    }

    /// Create and persist a client; returns the plaintext secret once
    pub async fn register(&self, new_client: NewClient) -> Result<(Client, Option<String>)> {
        let secret = new_client.is_confidential.then(generate_client_secret);

        let client = Client {
            id: Uuid::new_v4().to_string(),
            name: new_client.name,
            redirect_uris: new_client.redirect_uris,
            is_confidential: new_client.is_confidential,
            hashed_secret: secret.as_deref().map(hash_client_secret),
            owner_user_id: new_client.owner_user_id,
            created_at: Utc::now(),
        };
        client.validate()?;

        self.storage.save_client(&client).await?;
        tracing::info!(client_id = %client.id, confidential = client.is_confidential, "Registered OAuth client");

        Ok((client, secret))
    }

    pub async fn list(&self) -> Result<Vec<Client>> {
        self.storage.list_clients().await
    }

    /// Remove a client and every code/token issued to it
    pub async fn delete(&self, client_id: &str) -> Result<()> {
        if self.storage.get_client(client_id).await?.is_none() {
            return Err(PressGateError::not_found("OAuth client", client_id));
        }
        self.storage.delete_client(client_id).await
    }
}

/// The scope vocabulary: exactly one scope, `default`
#[derive(Clone, Copy, Default)]
pub struct ScopeRepository;

impl ScopeRepository {
    pub fn get_scope_entity_by_identifier(&self, identifier: &str) -> Option<Scope> {
        (identifier == crate::constants::DEFAULT_SCOPE).then(Scope::default_scope)
    }

    /// Whatever was requested, the token carries `default`
    pub fn finalize_scopes(&self, _requested: &[Scope]) -> Vec<Scope> {
        vec![Scope::default_scope()]
    }
}

/// Authorization code records
#[derive(Clone)]
pub struct AuthCodeRepository {
    storage: Arc<dyn Storage>,
}

impl AuthCodeRepository {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn persist_new_auth_code(&self, code: &AuthCode) -> Result<()> {
        self.storage.save_auth_code(code).await
    }

    /// Atomically mark the code used; `false` means it was already used or unknown
    pub async fn consume_auth_code(&self, code_id: &str) -> Result<bool> {
        self.storage.revoke_auth_code(code_id).await
    }

    /// Unknown codes count as revoked
    pub async fn is_auth_code_revoked(&self, code_id: &str) -> Result<bool> {
        Ok(self
            .storage
            .get_auth_code(code_id)
            .await?
            .is_none_or(|code| code.is_revoked))
    }
}

/// Access token records
#[derive(Clone)]
pub struct AccessTokenRepository {
    storage: Arc<dyn Storage>,
}

impl AccessTokenRepository {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn persist_new_access_token(&self, token: &AccessToken) -> Result<()> {
        self.storage.save_access_token(token).await
    }

    pub async fn get(&self, jti: &str) -> Result<Option<AccessToken>> {
        self.storage.get_access_token(jti).await
    }

    pub async fn revoke_access_token(&self, jti: &str) -> Result<bool> {
        self.storage.revoke_access_token(jti).await
    }

    /// Unknown tokens count as revoked
    pub async fn is_access_token_revoked(&self, jti: &str) -> Result<bool> {
        Ok(self
            .storage
            .get_access_token(jti)
            .await?
            .is_none_or(|token| token.is_revoked))
    }
}

/// Refresh token records
#[derive(Clone)]
pub struct RefreshTokenRepository {
    storage: Arc<dyn Storage>,
}

impl RefreshTokenRepository {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn persist_new_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        self.storage.save_refresh_token(token).await
    }

    pub async fn get(&self, token_id: &str) -> Result<Option<RefreshToken>> {
        self.storage.get_refresh_token(token_id).await
    }

    /// Atomically revoke; `false` means another caller got there first
    pub async fn revoke_refresh_token(&self, token_id: &str) -> Result<bool> {
        self.storage.revoke_refresh_token(token_id).await
    }

    pub async fn is_refresh_token_revoked(&self, token_id: &str) -> Result<bool> {
        Ok(self
            .storage
            .get_refresh_token(token_id)
            .await?
            .is_none_or(|token| token.is_revoked))
    }
}

/// All repositories over one storage backend
#[derive(Clone)]
pub struct Repositories {
    pub clients: ClientRepository,
    pub scopes: ScopeRepository,
    pub auth_codes: AuthCodeRepository,
    pub access_tokens: AccessTokenRepository,
    pub refresh_tokens: RefreshTokenRepository,
}

impl Repositories {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            clients: ClientRepository::new(storage.clone()),
            scopes: ScopeRepository,
            auth_codes: AuthCodeRepository::new(storage.clone()),
            access_tokens: AccessTokenRepository::new(storage.clone()),
            refresh_tokens: RefreshTokenRepository::new(storage),
        }
    }
}
