//! OAuth HTTP endpoints
//!
//! Discovery (RFC 8414, RFC 9728), dynamic client registration (RFC 7591),
//! the authorize/login/consent pages, the token endpoint and revocation
//! (RFC 7009). Protocol decisions are made by [`AuthorizationServer`]; this
//! module only translates HTTP in and out.

use crate::auth::context::RequestContext;
use crate::auth::crypto::verify_password;
use crate::auth::error::OAuthServerError;
use crate::auth::repository::NewClient;
use crate::auth::server::{
    AuthorizationRequest, AuthorizationServer, AuthorizeParams, ClientCredentials, TokenRequest,
    is_valid_redirect_uri,
};
use crate::constants::{DEFAULT_SCOPE, GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN};
use crate::http::session::{BrowserSession, session_cookie};
use crate::model::HostUser;
use crate::storage::Storage;
use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::Duration;
use minijinja::{AutoEscape, Environment, context};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Browser session lifetime for the login/consent flow
const SESSION_TTL_HOURS: i64 = 12;

/// Login and consent pages, embedded in the binary
static PAGES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    for (name, source) in [
        ("layout.html", include_str!("../../static/oauth/layout.html")),
        ("login.html", include_str!("../../static/oauth/login.html")),
        ("consent.html", include_str!("../../static/oauth/consent.html")),
    ] {
        env.add_template(name, source)
            .expect("embedded OAuth templates must parse");
    }
    env
});

/// Shared state of the OAuth endpoints
pub struct OAuthRouteState {
    pub authorization_server: Arc<AuthorizationServer>,
    pub storage: Arc<dyn Storage>,
    pub issuer: String,
    pub site_name: String,
    pub allow_localhost_redirects: bool,
    pub secure_cookies: bool,
}

/// Create OAuth routes
pub fn create_oauth_routes(state: Arc<OAuthRouteState>) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(handle_metadata_discovery),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(handle_protected_resource_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource/mcp",
            get(handle_protected_resource_metadata),
        )
        .route("/oauth/register", post(handle_client_registration))
        .route(
            "/oauth/authorize",
            get(handle_authorize).post(handle_consent_decision),
        )
        .route("/oauth/consent", get(handle_consent_screen))
        .route("/oauth/login", post(handle_login))
        .route("/oauth/token", post(handle_token))
        .route("/oauth/revoke", post(handle_token_revocation))
        .with_state(state)
}

/// RFC 8414 authorization server metadata
pub fn authorization_server_metadata(issuer: &str) -> Value {
    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/oauth/authorize", issuer),
        "token_endpoint": format!("{}/oauth/token", issuer),
        "registration_endpoint": format!("{}/oauth/register", issuer),
        "revocation_endpoint": format!("{}/oauth/revoke", issuer),
        "response_types_supported": ["code"],
        "grant_types_supported": [GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
        "revocation_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
        "scopes_supported": [DEFAULT_SCOPE],
        "code_challenge_methods_supported": ["S256", "plain"],
    })
}

/// RFC 9728 protected resource metadata for the MCP endpoint
pub fn protected_resource_metadata(issuer: &str, site_name: &str) -> Value {
    json!({
        "resource": format!("{}/mcp", issuer),
        "resource_name": site_name,
        "authorization_servers": [issuer],
        "scopes_supported": [DEFAULT_SCOPE],
        "bearer_methods_supported": ["header"],
    })
}

/// URL advertised in `WWW-Authenticate` for resource discovery
pub fn protected_resource_metadata_url(issuer: &str) -> String {
    format!("{}/.well-known/oauth-protected-resource", issuer)
}

async fn handle_metadata_discovery(State(state): State<Arc<OAuthRouteState>>) -> impl IntoResponse {
    Json(authorization_server_metadata(&state.issuer))
}

async fn handle_protected_resource_metadata(
    State(state): State<Arc<OAuthRouteState>>,
) -> impl IntoResponse {
    Json(protected_resource_metadata(&state.issuer, &state.site_name))
}

/// Dynamic client registration request
#[derive(Debug, Deserialize)]
struct ClientRegistrationRequest {
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
    #[serde(default)]
    token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    grant_types: Vec<String>,
    #[serde(default)]
    response_types: Vec<String>,
}

fn registration_error(error: &str, description: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": error, "error_description": description.into()})),
    )
        .into_response()
}

/// Handle dynamic client registration
async fn handle_client_registration(
    State(state): State<Arc<OAuthRouteState>>,
    ctx: RequestContext,
    Json(req): Json<ClientRegistrationRequest>,
) -> Response {
    let client_name = req
        .client_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "MCP Client".to_string());
    if client_name.len() > 100 {
        return registration_error(
            "invalid_client_metadata",
            "client_name must be at most 100 characters",
        );
    }

    if req.redirect_uris.is_empty() {
        return registration_error("invalid_redirect_uri", "redirect_uris is required");
    }
    if let Some(uri) = req
        .redirect_uris
        .iter()
        .find(|uri| !is_valid_redirect_uri(uri, state.allow_localhost_redirects))
    {
        return registration_error(
            "invalid_redirect_uri",
            format!("Invalid redirect URI: {}", uri),
        );
    }

    let auth_method = req
        .token_endpoint_auth_method
        .unwrap_or_else(|| "client_secret_basic".to_string());
    let is_confidential = match auth_method.as_str() {
        "none" => false,
        "client_secret_basic" | "client_secret_post" => true,
        other => {
            return registration_error(
                "invalid_client_metadata",
                format!("Unsupported token_endpoint_auth_method: {}", other),
            );
        }
    };

    if let Some(grant) = req
        .grant_types
        .iter()
        .find(|g| !matches!(g.as_str(), GRANT_AUTHORIZATION_CODE | GRANT_REFRESH_TOKEN))
    {
        return registration_error(
            "invalid_client_metadata",
            format!("Unsupported grant type: {}", grant),
        );
    }
    if req.response_types.iter().any(|r| r != "code") {
        return registration_error(
            "invalid_client_metadata",
            "Only the `code` response type is supported",
        );
    }

    let registered = state
        .authorization_server
        .repositories()
        .clients
        .register(NewClient {
            name: client_name,
            redirect_uris: req.redirect_uris,
            is_confidential,
            owner_user_id: ctx.session_user().map(|u| u.id),
        })
        .await;

    let (client, secret) = match registered {
        Ok(registered) => registered,
        Err(e) => {
            tracing::error!("Failed to save OAuth client: {}", e);
            return OAuthServerError::server_error("failed to save client").into_response();
        }
    };

    let mut body = json!({
        "client_id": client.id,
        "client_name": client.name,
        "redirect_uris": client.redirect_uris,
        "grant_types": [GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN],
        "response_types": ["code"],
        "token_endpoint_auth_method": auth_method,
        "scope": DEFAULT_SCOPE,
        "client_id_issued_at": client.created_at.timestamp(),
    });
    if let Some(secret) = secret {
        body["client_secret"] = json!(secret);
        body["client_secret_expires_at"] = json!(0);
    }

    (StatusCode::CREATED, Json(body)).into_response()
}

/// Handle authorization request: validate, park it in the session, show login or consent
async fn handle_authorize(
    State(state): State<Arc<OAuthRouteState>>,
    BrowserSession { session, store }: BrowserSession,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let request = match state
        .authorization_server
        .validate_authorization_request(&params)
        .await
    {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let (session, new_cookie) = match session {
        Some(session) => (session, None),
        None => {
            let session = store.create_session(None, Duration::hours(SESSION_TTL_HOURS));
            let cookie = session_cookie(&session.id, session.expires_at, state.secure_cookies);
            (session, Some(cookie))
        }
    };

    if !store.set_pending(&session.id, request.clone()) {
        tracing::error!("Failed to store pending authorization in session");
        return OAuthServerError::server_error("server_error").into_response();
    }

    let Some(csrf_token) = store.issue_csrf_token(&session.id) else {
        tracing::error!("Failed to generate CSRF token for consent flow");
        return OAuthServerError::server_error("server_error").into_response();
    };

    let user = match session.user_id {
        Some(user_id) => state.storage.get_user(user_id).await.ok().flatten(),
        None => None,
    };

    let page = render_flow_page(&state, &request, user.as_ref(), &csrf_token, None);
    with_cookie(page, new_cookie)
}

/// Re-render the pending request (after login)
async fn handle_consent_screen(
    State(state): State<Arc<OAuthRouteState>>,
    BrowserSession { session, store }: BrowserSession,
) -> Response {
    let Some(session) = session else {
        return (
            StatusCode::BAD_REQUEST,
            "No session found. Please restart the authorization flow.",
        )
            .into_response();
    };

    let Some(request) = session.pending.clone() else {
        return (
            StatusCode::BAD_REQUEST,
            "No pending authorization. Please restart the authorization flow.",
        )
            .into_response();
    };

    let Some(csrf_token) = store.issue_csrf_token(&session.id) else {
        return OAuthServerError::server_error("server_error").into_response();
    };

    let user = match session.user_id {
        Some(user_id) => state.storage.get_user(user_id).await.ok().flatten(),
        None => None,
    };

    render_flow_page(&state, &request, user.as_ref(), &csrf_token, None)
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    login: String,
    password: String,
    csrf_token: String,
}

/// Host login for the consent flow
async fn handle_login(
    State(state): State<Arc<OAuthRouteState>>,
    BrowserSession { session, store }: BrowserSession,
    Form(form): Form<LoginForm>,
) -> Response {
    let Some(session) = session else {
        return (StatusCode::BAD_REQUEST, "No session found").into_response();
    };

    if !store.check_csrf_token(&session.id, &form.csrf_token) {
        return (StatusCode::FORBIDDEN, "CSRF validation failed").into_response();
    }

    let user = match state.storage.get_user_by_login(form.login.trim()).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!("Failed to look up user: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "server_error").into_response();
        }
    };

    let authenticated = match user {
        Some(user) => {
            let hash = user.password_hash.clone();
            let password = form.password;
            let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
                .await
                .unwrap_or(false);
            valid.then_some(user)
        }
        None => None,
    };

    let Some(user) = authenticated else {
        tracing::warn!(login = %form.login, "Consent login failed");
        let Some(request) = session.pending.clone() else {
            return (StatusCode::UNAUTHORIZED, "Invalid username or password").into_response();
        };
        let csrf_token = store.issue_csrf_token(&session.id).unwrap_or_default();
        let page = render_flow_page(
            &state,
            &request,
            None,
            &csrf_token,
            Some("Invalid username or password."),
        );
        return (StatusCode::UNAUTHORIZED, page).into_response();
    };

    // The pre-login session id is retired; the pending request moves over
    let fresh = store.create_session(Some(user.id), Duration::hours(SESSION_TTL_HOURS));
    if let Some(request) = store.take_pending(&session.id) {
        store.set_pending(&fresh.id, request);
    }
    store.remove_session(&session.id);
    tracing::info!(user_id = %user.id, "User logged in for OAuth consent");

    let cookie = session_cookie(&fresh.id, fresh.expires_at, state.secure_cookies);
    with_cookie(Redirect::to("/oauth/consent").into_response(), Some(cookie))
}

/// Consent form data
#[derive(Debug, Deserialize)]
struct ConsentForm {
    csrf_token: String,
    action: String,
}

/// Handle consent approval or denial
async fn handle_consent_decision(
    State(state): State<Arc<OAuthRouteState>>,
    BrowserSession { session, store }: BrowserSession,
    Form(form): Form<ConsentForm>,
) -> Response {
    let Some(session) = session else {
        return (StatusCode::BAD_REQUEST, "No session found").into_response();
    };

    if !store.check_csrf_token(&session.id, &form.csrf_token) {
        return (StatusCode::FORBIDDEN, "CSRF validation failed").into_response();
    }

    let Some(user_id) = session.user_id else {
        return (StatusCode::UNAUTHORIZED, "Login required").into_response();
    };

    let Some(request) = store.take_pending(&session.id) else {
        return (StatusCode::BAD_REQUEST, "No pending authorization").into_response();
    };

    let approved = form.action == "approve";
    match state
        .authorization_server
        .complete_authorization_request(&request, user_id, approved)
        .await
    {
        Ok(redirect_url) => Redirect::to(&redirect_url).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Handle token request
async fn handle_token(
    State(state): State<Arc<OAuthRouteState>>,
    headers: HeaderMap,
    Form(req): Form<TokenRequest>,
) -> Response {
    let basic_auth = basic_credentials(&headers);

    match state
        .authorization_server
        .respond_to_access_token_request(&req, basic_auth)
        .await
    {
        Ok(tokens) => (
            [
                (header::CACHE_CONTROL, "no-store"),
                (header::PRAGMA, "no-cache"),
            ],
            Json(tokens),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RevocationRequest {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
}

/// Handle token revocation (RFC 7009)
async fn handle_token_revocation(
    State(state): State<Arc<OAuthRouteState>>,
    headers: HeaderMap,
    Form(req): Form<RevocationRequest>,
) -> Response {
    let credentials = TokenRequest {
        client_id: req.client_id,
        client_secret: req.client_secret,
        ..Default::default()
    };
    let client = match state
        .authorization_server
        .authenticate_client(&credentials, basic_credentials(&headers))
        .await
    {
        Ok(client) => client,
        Err(e) => return e.into_response(),
    };

    let Some(token) = req.token.filter(|t| !t.is_empty()) else {
        return OAuthServerError::invalid_request("Missing token parameter").into_response();
    };

    if let Err(e) = state.authorization_server.revoke(&token, &client).await {
        tracing::error!("Token revocation failed: {}", e);
    }

    // Always 200, even for unknown tokens
    StatusCode::OK.into_response()
}

fn basic_credentials(headers: &HeaderMap) -> Option<ClientCredentials> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(ClientCredentials::from_basic_header)
}

fn with_cookie(response: Response, cookie: Option<String>) -> Response {
    let mut response = response;
    if let Some(cookie) = cookie
        && let Ok(value) = HeaderValue::from_str(&cookie)
    {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

/// Login form when no one is logged in, consent form otherwise
fn render_flow_page(
    state: &OAuthRouteState,
    request: &AuthorizationRequest,
    user: Option<&HostUser>,
    csrf_token: &str,
    error: Option<&str>,
) -> Response {
    let name = if user.is_some() {
        "consent.html"
    } else {
        "login.html"
    };

    let rendered = PAGES.get_template(name).and_then(|template| {
        template.render(context! {
            site_name => &state.site_name,
            client_name => &request.client_name,
            display_name => user.map(|u| u.display_name.as_str()),
            csrf_token => csrf_token,
            error => error,
        })
    });

    match rendered {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(template = name, error = %e, "Failed to render OAuth page");
            OAuthServerError::server_error("server_error").into_response()
        }
    }
}

#[cfg(test)]
mod routes_test {
    include!("routes_test.rs");
}
