//! OAuth 2.0 authorization server
//!
//! Authorization code grant (PKCE-capable, required for public clients) and
//! refresh token grant with rotation. The server owns no persistent state:
//! everything lives behind the repositories and the key manager.
//!
//! Codes and refresh tokens handed to clients are sealed payloads
//! (AES-256-GCM); access tokens are RS256 JWTs.

use crate::auth::crypto::{
    AccessTokenClaims, decoding_key, generate_identifier, is_supported_pkce_method,
    sign_access_token, verify_access_token, verify_pkce,
};
use crate::auth::error::OAuthServerError;
use crate::auth::keys::KeyManager;
use crate::auth::repository::Repositories;
use crate::config::OAuthConfig;
use crate::constants::{DEFAULT_SCOPE, GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN};
use crate::model::*;
use crate::storage::Storage;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type OAuthResult<T> = std::result::Result<T, OAuthServerError>;

/// Token lifetimes for each grant artifact
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub auth_code: Duration,
    pub access_token: Duration,
    pub refresh_token: Duration,
}

impl From<&OAuthConfig> for TokenLifetimes {
    fn from(config: &OAuthConfig) -> Self {
        Self {
            auth_code: Duration::seconds(config.auth_code_ttl_secs),
            access_token: Duration::seconds(config.access_token_ttl_secs),
            refresh_token: Duration::seconds(config.refresh_token_ttl_secs),
        }
    }
}

/// Builds the authorization server once at startup
pub struct AuthorizationServerFactory;

impl AuthorizationServerFactory {
    pub fn create(
        storage: Arc<dyn Storage>,
        keys: Arc<KeyManager>,
        config: &OAuthConfig,
    ) -> Arc<AuthorizationServer> {
        Arc::new(AuthorizationServer {
            repositories: Repositories::new(storage),
            keys,
            lifetimes: TokenLifetimes::from(config),
        })
    }
}

/// Query parameters of `GET /oauth/authorize`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeParams {
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

/// A validated authorization request awaiting the user's decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uri: String,
    pub scopes: Vec<Scope>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Form body of `POST /oauth/token`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Client credentials from the `Authorization: Basic` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    /// Parse `Basic base64(client_id:client_secret)`
    pub fn from_basic_header(value: &str) -> Option<Self> {
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (id, secret) = decoded.split_once(':')?;

        let client_id = urlencoding::decode(id).ok()?.into_owned();
        let client_secret = urlencoding::decode(secret).ok()?.into_owned();
        if client_id.is_empty() {
            return None;
        }

        Some(Self {
            client_id,
            client_secret: (!client_secret.is_empty()).then_some(client_secret),
        })
    }
}

/// Successful token endpoint response (RFC 6749 §5.1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub scope: String,
}

/// Sealed contents of the `code` handed to the client
#[derive(Debug, Serialize, Deserialize)]
struct AuthCodePayload {
    auth_code_id: String,
    client_id: String,
    user_id: UserId,
    scopes: Vec<String>,
    redirect_uri: String,
    expire_time: i64,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

/// Sealed contents of the refresh token string
#[derive(Debug, Serialize, Deserialize)]
struct RefreshTokenPayload {
    client_id: String,
    refresh_token_id: String,
    access_token_id: String,
    scopes: Vec<String>,
    user_id: UserId,
    expire_time: i64,
}

/// Authorization server for the code and refresh token grants
pub struct AuthorizationServer {
    repositories: Repositories,
    keys: Arc<KeyManager>,
    lifetimes: TokenLifetimes,
}

impl AuthorizationServer {
    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    /// Check an incoming authorization request before showing consent
    pub async fn validate_authorization_request(
        &self,
        params: &AuthorizeParams,
    ) -> OAuthResult<AuthorizationRequest> {
        let client_id = params
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| OAuthServerError::invalid_request("Missing client_id parameter"))?;

        let client = self
            .repositories
            .clients
            .get_client_entity(client_id)
            .await?
            .ok_or_else(|| OAuthServerError::invalid_client("Client authentication failed"))?;

        // An omitted redirect_uri is only unambiguous with one registration
        let redirect_uri = match params.redirect_uri.as_deref() {
            Some(uri) if client.has_redirect_uri(uri) => uri.to_string(),
            Some(_) => {
                return Err(OAuthServerError::invalid_request(
                    "The redirect_uri is not registered for this client",
                ));
            }
            None if client.redirect_uris.len() == 1 => client.redirect_uris[0].clone(),
            None => {
                return Err(OAuthServerError::invalid_request(
                    "Missing redirect_uri parameter",
                ));
            }
        };

        match params.response_type.as_deref() {
            Some("code") => {}
            Some(other) => return Err(OAuthServerError::unsupported_response_type(other)),
            None => {
                return Err(OAuthServerError::invalid_request(
                    "Missing response_type parameter",
                ));
            }
        }

        let scopes = self.validate_scopes(params.scope.as_deref())?;

        let code_challenge = params
            .code_challenge
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let code_challenge_method = match &code_challenge {
            Some(challenge) => {
                let method = params.code_challenge_method.as_deref().unwrap_or("plain");
                if !is_supported_pkce_method(method) {
                    return Err(OAuthServerError::invalid_request(
                        "Code challenge method must be one of `plain` or `S256`",
                    ));
                }
                // RFC 7636 §4.2: 43..128 characters
                if !(43..=128).contains(&challenge.len()) {
                    return Err(OAuthServerError::invalid_request(
                        "Code challenge must be between 43 and 128 characters",
                    ));
                }
                Some(method.to_string())
            }
            None if !client.is_confidential => {
                return Err(OAuthServerError::invalid_request(
                    "Public clients must use PKCE (code_challenge is required)",
                ));
            }
            None => None,
        };

        Ok(AuthorizationRequest {
            client_id: client.id,
            client_name: client.name,
            redirect_uri,
            scopes,
            state: params.state.clone(),
            code_challenge,
            code_challenge_method,
        })
    }

    /// Finish the consent step; returns the URL to redirect the user agent to
    pub async fn complete_authorization_request(
        &self,
        request: &AuthorizationRequest,
        user_id: UserId,
        approved: bool,
    ) -> OAuthResult<String> {
        if !approved {
            tracing::info!(client_id = %request.client_id, user_id = %user_id, "Authorization denied by user");
            return redirect_with(
                &request.redirect_uri,
                &[
                    ("error", "access_denied"),
                    (
                        "error_description",
                        "The resource owner denied the request",
                    ),
                ],
                request.state.as_deref(),
            );
        }

        let scopes = scope_identifiers(&self.repositories.scopes.finalize_scopes(&request.scopes));
        let expires_at = Utc::now() + self.lifetimes.auth_code;

        let code = AuthCode {
            code_id: generate_identifier(),
            client_id: request.client_id.clone(),
            user_id,
            redirect_uri: request.redirect_uri.clone(),
            scopes: scopes.clone(),
            code_challenge: request.code_challenge.clone(),
            code_challenge_method: request.code_challenge_method.clone(),
            expires_at,
            is_revoked: false,
        };
        self.repositories.auth_codes.persist_new_auth_code(&code).await?;

        let payload = AuthCodePayload {
            auth_code_id: code.code_id.clone(),
            client_id: code.client_id.clone(),
            user_id,
            scopes,
            redirect_uri: code.redirect_uri.clone(),
            expire_time: expires_at.timestamp(),
            code_challenge: code.code_challenge.clone(),
            code_challenge_method: code.code_challenge_method.clone(),
        };
        let sealed = self.keys.get_encryption_key().await?.seal(&payload)?;

        tracing::info!(client_id = %request.client_id, user_id = %user_id, "Authorization code issued");
        redirect_with(
            &request.redirect_uri,
            &[("code", sealed.as_str())],
            request.state.as_deref(),
        )
    }

    /// Token endpoint: exchange a code or refresh token for a new token pair
    pub async fn respond_to_access_token_request(
        &self,
        request: &TokenRequest,
        basic_auth: Option<ClientCredentials>,
    ) -> OAuthResult<TokenResponse> {
        let grant_type = request
            .grant_type
            .as_deref()
            .ok_or_else(|| OAuthServerError::invalid_request("Missing grant_type parameter"))?;

        let response = match grant_type {
            GRANT_AUTHORIZATION_CODE => {
                let client = self.authenticate_client(request, basic_auth).await?;
                self.exchange_authorization_code(request, &client).await
            }
            GRANT_REFRESH_TOKEN => {
                let client = self.authenticate_client(request, basic_auth).await?;
                self.rotate_refresh_token(request, &client).await
            }
            other => Err(OAuthServerError::unsupported_grant_type(other)),
        };

        match &response {
            Ok(_) => crate::telemetry::record_token_issued(grant_type),
            Err(err) => {
                tracing::warn!(grant_type, error = %err, "Token request rejected");
            }
        }
        response
    }

    /// Revoke an access or refresh token belonging to `client` (RFC 7009)
    ///
    /// Unknown, malformed or foreign tokens are ignored.
    pub async fn revoke(&self, token: &str, client: &Client) -> crate::Result<()> {
        let public_pem = self.keys.get_public_key().await?;
        let key = decoding_key(&public_pem)?;

        if let Ok(claims) = verify_access_token(token, &key) {
            if claims.aud == client.id {
                self.repositories
                    .access_tokens
                    .revoke_access_token(&claims.jti)
                    .await?;
                tracing::info!(client_id = %client.id, jti = %claims.jti, "Access token revoked");
            }
            return Ok(());
        }

        let encryption_key = self.keys.get_encryption_key().await?;
        if let Ok(payload) = encryption_key.open::<RefreshTokenPayload>(token)
            && payload.client_id == client.id
        {
            self.repositories
                .refresh_tokens
                .revoke_refresh_token(&payload.refresh_token_id)
                .await?;
            self.repositories
                .access_tokens
                .revoke_access_token(&payload.access_token_id)
                .await?;
            tracing::info!(client_id = %client.id, "Refresh token revoked");
        }

        Ok(())
    }

    /// client_secret_basic, client_secret_post, or none for public clients
    pub async fn authenticate_client(
        &self,
        request: &TokenRequest,
        basic_auth: Option<ClientCredentials>,
    ) -> OAuthResult<Client> {
        let (client_id, client_secret) = match basic_auth {
            Some(basic) => {
                if request
                    .client_id
                    .as_deref()
                    .is_some_and(|id| id != basic.client_id)
                {
                    return Err(OAuthServerError::invalid_request(
                        "client_id does not match the Authorization header",
                    ));
                }
                (basic.client_id, basic.client_secret)
            }
            None => {
                let client_id = request
                    .client_id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| OAuthServerError::invalid_request("Missing client_id parameter"))?;
                (client_id, request.client_secret.clone())
            }
        };

        self.repositories
            .clients
            .validate_client(&client_id, client_secret.as_deref())
            .await?
            .ok_or_else(|| OAuthServerError::invalid_client("Client authentication failed"))
    }

    async fn exchange_authorization_code(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> OAuthResult<TokenResponse> {
        let encrypted = request
            .code
            .as_deref()
            .ok_or_else(|| OAuthServerError::invalid_request("Missing code parameter"))?;

        let payload: AuthCodePayload = self
            .keys
            .get_encryption_key()
            .await?
            .open(encrypted)
            .map_err(|_| OAuthServerError::invalid_grant("Cannot decrypt the authorization code"))?;

        if payload.client_id != client.id {
            return Err(OAuthServerError::invalid_grant(
                "Authorization code was not issued to this client",
            ));
        }
        if payload.expire_time <= Utc::now().timestamp() {
            return Err(OAuthServerError::invalid_grant("Authorization code has expired"));
        }

        match request.redirect_uri.as_deref() {
            None => {
                return Err(OAuthServerError::invalid_request(
                    "Missing redirect_uri parameter",
                ));
            }
            Some(uri) if uri != payload.redirect_uri => {
                return Err(OAuthServerError::invalid_grant(
                    "redirect_uri does not match the authorization request",
                ));
            }
            Some(_) => {}
        }

        match (&payload.code_challenge, request.code_verifier.as_deref()) {
            (Some(challenge), Some(verifier)) => {
                let method = payload.code_challenge_method.as_deref().unwrap_or("plain");
                if !verify_pkce(verifier, challenge, method) {
                    return Err(OAuthServerError::invalid_grant(
                        "Failed to verify code_verifier",
                    ));
                }
            }
            (Some(_), None) => {
                return Err(OAuthServerError::invalid_request(
                    "Missing code_verifier parameter",
                ));
            }
            (None, Some(_)) => {
                return Err(OAuthServerError::invalid_request(
                    "code_verifier sent but no code_challenge was used",
                ));
            }
            (None, None) => {}
        }

        // Losing racers see `false` here
        if !self
            .repositories
            .auth_codes
            .consume_auth_code(&payload.auth_code_id)
            .await?
        {
            tracing::warn!(client_id = %client.id, "Authorization code replay rejected");
            return Err(OAuthServerError::invalid_grant(
                "Authorization code has been revoked",
            ));
        }

        let scopes = self.finalize(&payload.scopes);
        self.issue_token_pair(&client.id, payload.user_id, scopes).await
    }

    async fn rotate_refresh_token(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> OAuthResult<TokenResponse> {
        let encrypted = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| OAuthServerError::invalid_request("Missing refresh_token parameter"))?;

        let payload: RefreshTokenPayload = self
            .keys
            .get_encryption_key()
            .await?
            .open(encrypted)
            .map_err(|_| OAuthServerError::invalid_grant("Cannot decrypt the refresh token"))?;

        if payload.client_id != client.id {
            return Err(OAuthServerError::invalid_grant(
                "Refresh token is not linked to this client",
            ));
        }
        if payload.expire_time <= Utc::now().timestamp() {
            return Err(OAuthServerError::invalid_grant("Refresh token has expired"));
        }

        // A refresh may narrow but never widen the original grant
        if let Some(requested) = request.scope.as_deref() {
            for scope in requested.split_whitespace() {
                if !payload.scopes.iter().any(|s| s == scope) {
                    return Err(OAuthServerError::invalid_scope(scope));
                }
            }
        }

        if !self
            .repositories
            .refresh_tokens
            .revoke_refresh_token(&payload.refresh_token_id)
            .await?
        {
            tracing::warn!(client_id = %client.id, "Revoked refresh token presented");
            return Err(OAuthServerError::invalid_grant("Refresh token has been revoked"));
        }

        self.repositories
            .access_tokens
            .revoke_access_token(&payload.access_token_id)
            .await?;

        let scopes = self.finalize(&payload.scopes);
        self.issue_token_pair(&client.id, payload.user_id, scopes).await
    }

    async fn issue_token_pair(
        &self,
        client_id: &str,
        user_id: UserId,
        scopes: Vec<String>,
    ) -> OAuthResult<TokenResponse> {
        let now = Utc::now();
        let access_expires_at = now + self.lifetimes.access_token;
        let refresh_expires_at = now + self.lifetimes.refresh_token;

        let access_token = AccessToken {
            jti: generate_identifier(),
            client_id: client_id.to_string(),
            user_id,
            scopes: scopes.clone(),
            expires_at: access_expires_at,
            is_revoked: false,
        };
        self.repositories
            .access_tokens
            .persist_new_access_token(&access_token)
            .await?;

        let claims = AccessTokenClaims {
            aud: client_id.to_string(),
            jti: access_token.jti.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: access_expires_at.timestamp(),
            sub: user_id.to_string(),
            scopes: scopes.clone(),
        };
        let private_pem = self.keys.get_private_key().await?;
        let jwt = sign_access_token(&claims, &private_pem)?;

        let refresh_token = RefreshToken {
            token_id: generate_identifier(),
            access_token_id: access_token.jti.clone(),
            expires_at: refresh_expires_at,
            is_revoked: false,
        };
        self.repositories
            .refresh_tokens
            .persist_new_refresh_token(&refresh_token)
            .await?;

        let sealed_refresh = self
            .keys
            .get_encryption_key()
            .await?
            .seal(&RefreshTokenPayload {
                client_id: client_id.to_string(),
                refresh_token_id: refresh_token.token_id.clone(),
                access_token_id: access_token.jti.clone(),
                scopes: scopes.clone(),
                user_id,
                expire_time: refresh_expires_at.timestamp(),
            })?;

        tracing::info!(client_id, user_id = %user_id, jti = %access_token.jti, "Access token issued");

        Ok(TokenResponse {
            access_token: jwt,
            token_type: "Bearer".to_string(),
            expires_in: self.lifetimes.access_token.num_seconds(),
            refresh_token: sealed_refresh,
            scope: scopes.join(" "),
        })
    }

    fn validate_scopes(&self, requested: Option<&str>) -> OAuthResult<Vec<Scope>> {
        let requested = requested.unwrap_or(DEFAULT_SCOPE);
        let mut scopes = Vec::new();

        for identifier in requested.split_whitespace() {
            let scope = self
                .repositories
                .scopes
                .get_scope_entity_by_identifier(identifier)
                .ok_or_else(|| OAuthServerError::invalid_scope(identifier))?;
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        if scopes.is_empty() {
            scopes.push(Scope::default_scope());
        }
        Ok(scopes)
    }

    fn finalize(&self, scopes: &[String]) -> Vec<String> {
        let requested: Vec<Scope> = scopes.iter().map(Scope::new).collect();
        scope_identifiers(&self.repositories.scopes.finalize_scopes(&requested))
    }
}

fn scope_identifiers(scopes: &[Scope]) -> Vec<String> {
    scopes.iter().map(|s| s.identifier.clone()).collect()
}

/// Append query parameters (and `state`) to a registered redirect URI
fn redirect_with(redirect_uri: &str, params: &[(&str, &str)], state: Option<&str>) -> OAuthResult<String> {
    let mut url = url::Url::parse(redirect_uri)
        .map_err(|_| OAuthServerError::server_error("Registered redirect URI is not a valid URL"))?;

    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }

    Ok(url.to_string())
}

/// Validate a redirect URI offered at registration
pub fn is_valid_redirect_uri(uri: &str, allow_localhost: bool) -> bool {
    if uri.is_empty() || uri.len() > 2048 {
        return false;
    }

    let Ok(parsed) = url::Url::parse(uri) else {
        return false;
    };

    let is_localhost = matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    if parsed.scheme() != "https" && !(allow_localhost && is_localhost) {
        return false;
    }

    // No fragments allowed (RFC 6749 §3.1.2)
    parsed.fragment().is_none()
}
