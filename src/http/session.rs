//! Browser sessions for the OAuth login and consent pages
//!
//! A session lives from `GET /oauth/authorize` until it expires. It carries
//! the logged-in host user, the authorization request waiting for a
//! decision and the CSRF token of the last rendered form.
//!
//! The session middleware also creates the per-request [`RequestContext`],
//! seeding it with the session's user when there is one.

use crate::auth::RequestContext;
use crate::auth::server::AuthorizationRequest;
use crate::constants::SESSION_COOKIE;
use crate::model::UserId;
use crate::storage::Storage;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Weak};

/// How often expired sessions are swept
const SWEEP_INTERVAL_SECS: u64 = 300;

/// One browser's login/consent state
#[derive(Debug, Clone)]
pub struct ConsentSession {
    pub id: String,
    /// Logged-in host user, once authenticated
    pub user_id: Option<UserId>,
    pub expires_at: DateTime<Utc>,
    /// Validated authorization request awaiting approve/deny
    pub pending: Option<AuthorizationRequest>,
    csrf_token: Option<String>,
}

impl ConsentSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-process session store
///
/// Sessions are not persisted; a restart sends users back to the login form.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, ConsentSession>>,
}

impl SessionStore {
    /// Create a store; inside a tokio runtime a sweeper drops expired sessions
    pub fn new() -> Self {
        let store = Self {
            sessions: Arc::new(DashMap::new()),
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(sweep_loop(Arc::downgrade(&store.sessions)));
        }

        store
    }

    /// Start a session, optionally already logged in
    pub fn create_session(&self, user_id: Option<UserId>, ttl: Duration) -> ConsentSession {
        let session = ConsentSession {
            id: generate_secure_token(),
            user_id,
            expires_at: Utc::now() + ttl,
            pending: None,
            csrf_token: None,
        };
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Live session by id; an expired one is dropped on sight
    pub fn get_session(&self, session_id: &str) -> Option<ConsentSession> {
        let session = self.sessions.get(session_id)?.clone();
        if session.is_expired_at(Utc::now()) {
            self.sessions.remove(session_id);
            return None;
        }
        Some(session)
    }

    /// Park an authorization request until the user decides
    pub fn set_pending(&self, session_id: &str, request: AuthorizationRequest) -> bool {
        self.update(session_id, |session| session.pending = Some(request))
            .is_some()
    }

    /// Remove the parked request so a decision can only be made once
    pub fn take_pending(&self, session_id: &str) -> Option<AuthorizationRequest> {
        self.update(session_id, |session| session.pending.take())
            .flatten()
    }

    /// Bind a logged-in user to the session
    pub fn set_user(&self, session_id: &str, user_id: UserId) -> bool {
        self.update(session_id, |session| session.user_id = Some(user_id))
            .is_some()
    }

    /// End a session; returns whether it existed
    pub fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Issue a fresh CSRF token, replacing the previous one
    pub fn issue_csrf_token(&self, session_id: &str) -> Option<String> {
        let token = generate_secure_token();
        self.update(session_id, |session| session.csrf_token = Some(token.clone()))
            .map(|_| token)
    }

    /// Constant-time comparison against the session's current CSRF token
    pub fn check_csrf_token(&self, session_id: &str, token: &str) -> bool {
        use subtle::ConstantTimeEq;

        self.get_session(session_id)
            .and_then(|session| session.csrf_token)
            .is_some_and(|stored| bool::from(stored.as_bytes().ct_eq(token.as_bytes())))
    }

    /// Drop sessions expired at `now`; returns how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        sweep(&self.sessions, now)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn update<T>(
        &self,
        session_id: &str,
        apply: impl FnOnce(&mut ConsentSession) -> T,
    ) -> Option<T> {
        let mut entry = self.sessions.get_mut(session_id)?;
        if entry.is_expired_at(Utc::now()) {
            return None;
        }
        Some(apply(&mut *entry))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sweep(sessions: &DashMap<String, ConsentSession>, now: DateTime<Utc>) -> usize {
    let before = sessions.len();
    sessions.retain(|_, session| !session.is_expired_at(now));
    before.saturating_sub(sessions.len())
}

/// Runs until the store is dropped
async fn sweep_loop(sessions: Weak<DashMap<String, ConsentSession>>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
    // The first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(sessions) = sessions.upgrade() else {
            break;
        };
        let swept = sweep(&sessions, Utc::now());
        if swept > 0 {
            tracing::debug!(swept, "Swept expired browser sessions");
        }
    }
}

/// Session id from the `pressgate_session` cookie
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    let prefix = format!("{}=", SESSION_COOKIE);
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .map(str::trim)
        .find_map(|cookie| cookie.strip_prefix(prefix.as_str()))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// State of [`session_middleware`]
#[derive(Clone)]
pub struct SessionLayerState {
    pub store: Arc<SessionStore>,
    pub storage: Arc<dyn Storage>,
}

/// Session id from the cookie, as a request extension
#[derive(Clone, Debug)]
struct SessionId(String);

/// Resolve the cookie session and seed the request's [`RequestContext`]
///
/// Inserts the session id, the store and the context into the request
/// extensions.
pub async fn session_middleware(
    State(state): State<SessionLayerState>,
    mut req: Request,
    next: Next,
) -> Response {
    let session_id = session_id_from_headers(req.headers());

    let session_user_id = session_id
        .as_deref()
        .and_then(|id| state.store.get_session(id))
        .and_then(|session| session.user_id);

    let ctx = match session_user_id {
        Some(user_id) => match state.storage.get_user(user_id).await {
            Ok(Some(user)) => RequestContext::with_session_user(user),
            Ok(None) => RequestContext::new(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load session user");
                RequestContext::new()
            }
        },
        None => RequestContext::new(),
    };

    if let Some(session_id) = session_id {
        req.extensions_mut().insert(SessionId(session_id));
    }
    req.extensions_mut().insert(state.store);
    req.extensions_mut().insert(ctx);

    next.run(req).await
}

/// Extractor for the caller's browser session
pub struct BrowserSession {
    /// Live session named by the cookie, if any
    pub session: Option<ConsentSession>,
    pub store: Arc<SessionStore>,
}

impl<S> FromRequestParts<S> for BrowserSession
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(store) = parts.extensions.get::<Arc<SessionStore>>().cloned() else {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Session middleware is not installed",
            ));
        };

        let session = parts
            .extensions
            .get::<SessionId>()
            .and_then(|id| store.get_session(&id.0));

        Ok(Self { session, store })
    }
}

/// `Set-Cookie` value for a session (HttpOnly, SameSite=Lax)
pub fn session_cookie(session_id: &str, expires_at: DateTime<Utc>, secure: bool) -> String {
    let secure_flag = if secure { " Secure;" } else { "" };
    format!(
        "{}={}; Path=/; Expires={}; HttpOnly;{} SameSite=Lax",
        SESSION_COOKIE,
        session_id,
        expires_at.format("%a, %d %b %Y %H:%M:%S GMT"),
        secure_flag
    )
}

/// 32 random bytes, URL-safe base64 (session ids, CSRF tokens)
fn generate_secure_token() -> String {
    use base64::Engine as _;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
