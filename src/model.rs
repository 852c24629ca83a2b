//! Data model for PressGate
//!
//! OAuth entities (clients, codes, tokens) and the host-side user identity.
//! OAuth entities only ever store a [`UserId`]; user attributes stay in the
//! host user directory.

use crate::{PressGateError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque wrapper over the host's numeric user id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Parse the `sub` claim form (decimal string)
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse::<u64>().ok().filter(|id| *id > 0).map(UserId)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        UserId(id)
    }
}

/// Shared identifier/expiry/revocation surface of codes and tokens
pub trait TokenEntity {
    /// Primary identifier (code id, jti, refresh token id)
    fn identifier(&self) -> &str;

    /// Absolute expiry instant
    fn expires_at(&self) -> DateTime<Utc>;

    /// Revocation flag
    fn is_revoked(&self) -> bool;

    /// Whether the entity is expired at `now`
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Neither revoked nor expired
    fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }
}

/// OAuth scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub identifier: String,
}

impl Scope {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    /// The single scope issued by this server
    pub fn default_scope() -> Self {
        Self::new(crate::constants::DEFAULT_SCOPE)
    }
}

/// Registered OAuth client (RFC 7591)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    /// Opaque client id
    pub id: String,

    /// Human readable name shown on the consent page
    pub name: String,

    /// Registered redirect URIs (exact match)
    pub redirect_uris: Vec<String>,

    /// Confidential clients authenticate with a secret; public ones use PKCE
    pub is_confidential: bool,

    /// SHA-256 hex of the client secret (confidential clients only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashed_secret: Option<String>,

    /// Host user who registered the client, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<UserId>,

    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Check the confidentiality invariant
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(PressGateError::validation("client id cannot be empty"));
        }
        if self.redirect_uris.is_empty() {
            return Err(PressGateError::validation(
                "client must have at least one redirect URI",
            ));
        }
        if self.is_confidential && self.hashed_secret.as_deref().is_none_or(str::is_empty) {
            return Err(PressGateError::validation(
                "confidential client requires a hashed secret",
            ));
        }
        Ok(())
    }

    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }
}

/// Authorization code record (the code string handed out is encrypted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthCode {
    pub code_id: String,
    pub client_id: String,
    pub user_id: UserId,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
}

impl TokenEntity for AuthCode {
    fn identifier(&self) -> &str {
        &self.code_id
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn is_revoked(&self) -> bool {
        self.is_revoked
    }
}

/// Access token record; `jti` is the JWT id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub jti: String,
    pub client_id: String,
    pub user_id: UserId,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
}

impl TokenEntity for AccessToken {
    fn identifier(&self) -> &str {
        &self.jti
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn is_revoked(&self) -> bool {
        self.is_revoked
    }
}

/// Refresh token record, linked to the access token it was issued with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token_id: String,
    pub access_token_id: String,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
}

impl TokenEntity for RefreshToken {
    fn identifier(&self) -> &str {
        &self.token_id
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn is_revoked(&self) -> bool {
        self.is_revoked
    }
}

/// Host user as seen by PressGate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostUser {
    pub id: UserId,
    pub login: String,
    pub display_name: String,
    pub email: String,

    /// Argon2 PHC string; never serialized to clients
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    /// Capability names, e.g. `read`, `edit_posts`, `manage_options`
    pub capabilities: Vec<String>,

    pub created_at: DateTime<Utc>,
}

impl HostUser {
    pub fn has_cap(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}
