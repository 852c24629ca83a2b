//! OAuth 2.0 authorization and resource server
//!
//! - **Server**: authorization code (with PKCE) and refresh token grants
//! - **Resource**: RS256 access token validation
//! - **Validator**: maps token failures to `oauth_*` API errors and guards
//!   REST/MCP handlers
//! - **Routes**: discovery, registration, consent and token endpoints

pub mod context;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod repository;
pub mod resource;
pub mod routes;
pub mod server;
pub mod validator;

pub use context::RequestContext;
pub use error::OAuthServerError;
pub use keys::KeyManager;
pub use resource::{ResourceServer, ResourceServerFactory, TokenClaims};
pub use routes::{OAuthRouteState, create_oauth_routes, protected_resource_metadata_url};
pub use server::{AuthorizationServer, AuthorizationServerFactory, TokenResponse};
pub use validator::{BearerOrSessionGuard, RequestGuard, ScopeGuard, TokenValidator};
