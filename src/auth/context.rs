//! Per-request identity context
//!
//! One `RequestContext` is created for every inbound request (HTTP request
//! or MCP tool call). The token validator sets the current user once; every
//! downstream permission check reads it from the same value. Nothing here is
//! process-global, so identities cannot leak between requests.

use crate::model::{HostUser, UserId};
use axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    current_user: Arc<OnceLock<HostUser>>,
    session_user: Option<HostUser>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a browser request already carrying a logged-in session
    pub fn with_session_user(user: HostUser) -> Self {
        Self {
            current_user: Arc::default(),
            session_user: Some(user),
        }
    }

    /// Context with the current user already resolved (stdio MCP, CLI)
    pub fn for_user(user: HostUser) -> Self {
        let ctx = Self::new();
        ctx.set_current_user(user);
        ctx
    }

    /// Set the resolved user; only the first call takes effect
    ///
    /// Returns `false` if a different user was already set.
    pub fn set_current_user(&self, user: HostUser) -> bool {
        let id = user.id;
        match self.current_user.set(user) {
            Ok(()) => true,
            Err(_) => self.current_user_id() == Some(id),
        }
    }

    pub fn current_user(&self) -> Option<&HostUser> {
        self.current_user.get()
    }

    pub fn current_user_id(&self) -> Option<UserId> {
        self.current_user.get().map(|u| u.id)
    }

    pub fn session_user(&self) -> Option<&HostUser> {
        self.session_user.as_ref()
    }
}

/// Pull the context installed by the session middleware, or start a fresh one
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}
