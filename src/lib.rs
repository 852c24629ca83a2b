//! PressGate - OAuth 2.0 gated MCP ability server
//!
//! This library lets AI clients run CMS operations ("abilities") on behalf of
//! a logged-in host user:
//! - An OAuth 2.0 authorization server (authorization code + PKCE, refresh
//!   rotation, dynamic client registration)
//! - A resource server validating RS256 JWT access tokens
//! - An ability registry with enable/disable switches and before/after hooks
//! - An MCP server (stdio and Streamable HTTP) exposing enabled abilities
//!
//! # Example
//!
//! ```rust,no_run
//! use pressgate::config::Config;
//! use pressgate::core::create_dependencies;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let deps = create_dependencies(&config).await?;
//!
//!     for ability in deps.abilities.describe_abilities().await? {
//!         println!("{} enabled={}", ability.id, ability.enabled);
//!     }
//!
//!     Ok(())
//! }
//! ```

// Core modules
pub mod constants;
pub mod error;
pub mod model;

// Wiring shared by the CLI, HTTP and MCP surfaces
pub mod core;

// Infrastructure
pub mod config;
pub mod storage;
pub mod telemetry;

// OAuth and ability execution
pub mod abilities;
pub mod auth;

// Interface layers
pub mod cli;
pub mod http;
pub mod mcp;

// Utilities
pub mod utils;

// Re-exports for convenience
pub use abilities::{AbilitiesManager, Ability};
pub use error::{PressGateError, Result};
pub use model::{HostUser, UserId};

/// Initialize logging for the application
///
/// `RUST_LOG` wins over `level` (the config's `log.level`), which wins over
/// `pressgate=info`. Logs go to stderr so the stdio MCP transport keeps
/// stdout for JSON-RPC.
pub fn init_logging(level: Option<&str>) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| match level {
            Some(level) => EnvFilter::try_new(format!("pressgate={}", level)),
            None => EnvFilter::try_new("pressgate=info"),
        })
        .unwrap_or_else(|_| "pressgate=info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
