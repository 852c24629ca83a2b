//! Bearer token validation facade
//!
//! Bridges inbound requests to the resource server, resolves the token's
//! subject to a host user and converts protocol failures into structured
//! `oauth_*` API errors. Also builds the permission guards used by the REST
//! and MCP surfaces.

use crate::auth::context::RequestContext;
use crate::auth::error::OAuthServerError;
use crate::auth::resource::{ResourceServer, TokenClaims, bearer_token};
use crate::error::ApiError;
use crate::model::HostUser;
use crate::storage::Storage;
use crate::telemetry;
use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use std::sync::Arc;

/// Resource-server facing API used by request handlers
pub struct TokenValidator {
    resource_server: Arc<ResourceServer>,
    storage: Arc<dyn Storage>,
}

impl TokenValidator {
    pub fn new(resource_server: Arc<ResourceServer>, storage: Arc<dyn Storage>) -> Self {
        Self {
            resource_server,
            storage,
        }
    }

    /// Token from `Authorization: Bearer <token>`, if well formed
    pub fn get_bearer_token(headers: &HeaderMap) -> Option<String> {
        bearer_token(headers)
    }

    /// Validate the request and resolve its user into `ctx`
    pub async fn validate_request(
        &self,
        headers: &HeaderMap,
        ctx: &RequestContext,
    ) -> Result<HostUser, ApiError> {
        let claims = self.get_token_metadata(headers).await?;
        self.resolve_user(&claims, ctx).await
    }

    /// Validate the request and return the raw claims
    pub async fn get_token_metadata(&self, headers: &HeaderMap) -> Result<TokenClaims, ApiError> {
        if !headers.contains_key(header::AUTHORIZATION) {
            telemetry::record_token_validation("missing");
            return Err(missing_token());
        }

        match self
            .resource_server
            .validate_authenticated_request(headers)
            .await
        {
            Ok(claims) => Ok(claims),
            Err(err) => {
                telemetry::record_token_validation(err.error_type);
                tracing::info!(error = %err, "Bearer token rejected");
                Err(oauth_error(err))
            }
        }
    }

    pub async fn has_valid_token(&self, headers: &HeaderMap) -> bool {
        self.validate_request(headers, &RequestContext::new())
            .await
            .is_ok()
    }

    /// Guard for endpoints usable with a Bearer token or a logged-in session
    pub fn permission_callback(self: &Arc<Self>) -> BearerOrSessionGuard {
        BearerOrSessionGuard {
            validator: Arc::clone(self),
        }
    }

    /// Guard requiring every listed scope on the presented token
    pub fn require_scopes(self: &Arc<Self>, scopes: &[&str]) -> ScopeGuard {
        ScopeGuard {
            validator: Arc::clone(self),
            required: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn resolve_user(
        &self,
        claims: &TokenClaims,
        ctx: &RequestContext,
    ) -> Result<HostUser, ApiError> {
        let Some(user_id) = claims.user_id else {
            telemetry::record_token_validation("no_subject");
            return Err(ApiError::new(
                "oauth_invalid_token",
                "Token does not identify a user",
                401,
            ));
        };

        let user = self
            .storage
            .get_user(user_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "User lookup failed during token validation");
                unexpected_error()
            })?
            .ok_or_else(|| {
                telemetry::record_token_validation("user_not_found");
                ApiError::new("oauth_user_not_found", "User not found", 401)
            })?;

        if !ctx.set_current_user(user.clone()) {
            tracing::error!(user_id = %user_id, "Request context already bound to another user");
            return Err(unexpected_error());
        }

        telemetry::record_token_validation("valid");
        Ok(user)
    }
}

/// A permission check run before a protected handler
#[async_trait]
pub trait RequestGuard: Send + Sync {
    /// Authorize the request, binding the resolved user into `ctx`
    async fn authorize(&self, headers: &HeaderMap, ctx: &RequestContext)
    -> Result<HostUser, ApiError>;
}

/// OAuth first; falls back to the session user when no token is sent
#[derive(Clone)]
pub struct BearerOrSessionGuard {
    validator: Arc<TokenValidator>,
}

#[async_trait]
impl RequestGuard for BearerOrSessionGuard {
    async fn authorize(
        &self,
        headers: &HeaderMap,
        ctx: &RequestContext,
    ) -> Result<HostUser, ApiError> {
        if TokenValidator::get_bearer_token(headers).is_some() {
            return self.validator.validate_request(headers, ctx).await;
        }

        match ctx.session_user().cloned() {
            Some(user) => {
                if !ctx.set_current_user(user.clone()) {
                    tracing::error!(user_id = %user.id, "Request context already bound to another user");
                    return Err(unexpected_error());
                }
                Ok(user)
            }
            // A non-Bearer Authorization header reports its own OAuth error
            None if headers.contains_key(header::AUTHORIZATION) => {
                self.validator.validate_request(headers, ctx).await
            }
            None => Err(missing_token()),
        }
    }
}

/// Requires a Bearer token carrying every listed scope
#[derive(Clone)]
pub struct ScopeGuard {
    validator: Arc<TokenValidator>,
    required: Vec<String>,
}

#[async_trait]
impl RequestGuard for ScopeGuard {
    async fn authorize(
        &self,
        headers: &HeaderMap,
        ctx: &RequestContext,
    ) -> Result<HostUser, ApiError> {
        let claims = self.validator.get_token_metadata(headers).await?;

        if let Some(missing) = self.required.iter().find(|s| !claims.has_scope(s)) {
            telemetry::record_token_validation("insufficient_scope");
            return Err(ApiError::new(
                "oauth_insufficient_scope",
                format!("Missing required scope: {}", missing),
                403,
            ));
        }

        self.validator.resolve_user(&claims, ctx).await
    }
}

fn missing_token() -> ApiError {
    ApiError::new("oauth_missing_token", "Missing Bearer token", 401)
}

fn unexpected_error() -> ApiError {
    ApiError::new("oauth_error", "Authentication failed unexpectedly", 500)
}

/// `oauth_<type>` with 401, or the generic 500 for server-side failures
fn oauth_error(err: OAuthServerError) -> ApiError {
    if err.is_server_error() {
        return unexpected_error();
    }
    ApiError::new(format!("oauth_{}", err.error_type), err.description, 401)
}

#[cfg(test)]
mod validator_test {
    include!("validator_test.rs");
}
