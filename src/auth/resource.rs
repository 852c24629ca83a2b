//! OAuth 2.0 resource server
//!
//! Validates inbound Bearer tokens: RS256 signature against the current
//! public key, `exp`/`nbf`, then the revocation flag of the token record.
//! It never issues anything.

use crate::auth::crypto::{decoding_key, verify_access_token};
use crate::auth::error::OAuthServerError;
use crate::auth::keys::KeyManager;
use crate::auth::repository::AccessTokenRepository;
use crate::model::UserId;
use crate::storage::Storage;
use axum::http::{HeaderMap, header};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

static BEARER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*Bearer\s+(\S+)\s*$").expect("bearer pattern is a valid regex")
});

/// Extract the token from `Authorization: Bearer <token>` (scheme is case-insensitive)
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    BEARER_PATTERN
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Claims of a validated access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenClaims {
    pub access_token_id: String,
    pub client_id: String,
    /// `None` when the token carries no usable subject
    pub user_id: Option<UserId>,
    pub scopes: Vec<String>,
}

impl TokenClaims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Builds the resource server once at startup
pub struct ResourceServerFactory;

impl ResourceServerFactory {
    pub fn create(storage: Arc<dyn Storage>, keys: Arc<KeyManager>) -> Arc<ResourceServer> {
        Arc::new(ResourceServer {
            access_tokens: AccessTokenRepository::new(storage),
            keys,
        })
    }
}

/// Read-only validator of access tokens
pub struct ResourceServer {
    access_tokens: AccessTokenRepository,
    keys: Arc<KeyManager>,
}

impl ResourceServer {
    /// Validate the request's Bearer token and return its claims
    pub async fn validate_authenticated_request(
        &self,
        headers: &HeaderMap,
    ) -> Result<TokenClaims, OAuthServerError> {
        if !headers.contains_key(header::AUTHORIZATION) {
            return Err(OAuthServerError::access_denied(
                "Missing \"Authorization\" header",
            ));
        }

        let token = bearer_token(headers).ok_or_else(|| {
            OAuthServerError::access_denied("The Authorization header must use the Bearer scheme")
        })?;

        self.validate_token(&token).await
    }

    /// Validate a raw access token string
    pub async fn validate_token(&self, token: &str) -> Result<TokenClaims, OAuthServerError> {
        // Read the key on every call so regeneration takes effect immediately
        let public_pem = self.keys.get_public_key().await?;
        let key = decoding_key(&public_pem)?;

        let claims = verify_access_token(token, &key)
            .map_err(|rejection| OAuthServerError::invalid_token(rejection.describe()))?;

        if self.access_tokens.is_access_token_revoked(&claims.jti).await? {
            return Err(OAuthServerError::invalid_token("Access token has been revoked"));
        }

        Ok(TokenClaims {
            access_token_id: claims.jti,
            client_id: claims.aud,
            user_id: UserId::parse(&claims.sub),
            scopes: claims.scopes,
        })
    }
}
