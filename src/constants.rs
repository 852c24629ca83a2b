//! Constants used throughout PressGate
//!
//! Token lifetimes, option-store keys, hook names and interface defaults.

use once_cell::sync::Lazy;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Get the home directory with fallback to current directory
pub fn get_home_dir() -> &'static str {
    static HOME_DIR: Lazy<String> = Lazy::new(|| {
        dirs::home_dir()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string())
    });
    &HOME_DIR
}

/// Default config directory (~/.pressgate)
pub fn default_config_dir() -> &'static str {
    static CONFIG_DIR: Lazy<String> = Lazy::new(|| format!("{}/.pressgate", get_home_dir()));
    &CONFIG_DIR
}

/// Default SQLite DSN (~/.pressgate/pressgate.db)
pub fn default_sqlite_dsn() -> &'static str {
    static SQLITE_DSN: Lazy<String> =
        Lazy::new(|| format!("{}/pressgate.db", default_config_dir()));
    &SQLITE_DSN
}

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "pressgate.config.json";

/// Storage driver: SQLite
pub const STORAGE_DRIVER_SQLITE: &str = "sqlite";

/// Storage driver: in-memory
pub const STORAGE_DRIVER_MEMORY: &str = "memory";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 3340;

/// Default HTTP host
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";

// ============================================================================
// OAUTH
// ============================================================================

/// Authorization code lifetime (10 minutes)
pub const AUTH_CODE_TTL_SECS: i64 = 600;

/// Access token lifetime (1 hour)
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

/// Refresh token lifetime (30 days)
pub const REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 3600;

/// The only scope ever issued
pub const DEFAULT_SCOPE: &str = "default";

/// Grant type: authorization code
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";

/// Grant type: refresh token
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// RSA modulus size for token signing keys
pub const RSA_KEY_BITS: usize = 2048;

/// Realm advertised in `WWW-Authenticate`
pub const BEARER_REALM: &str = "MCP";

/// Session cookie name for the consent flow
pub const SESSION_COOKIE: &str = "pressgate_session";

// ============================================================================
// OPTION STORE KEYS
// ============================================================================

/// Persisted RSA private key (PKCS#8 PEM)
pub const OPTION_PRIVATE_KEY: &str = "oauth_private_key";

/// Persisted RSA public key (SPKI PEM)
pub const OPTION_PUBLIC_KEY: &str = "oauth_public_key";

/// Persisted AES-256-GCM key (base64)
pub const OPTION_ENCRYPTION_KEY: &str = "oauth_encryption_key";

/// JSON array of disabled ability ids
pub const OPTION_DISABLED_ABILITIES: &str = "disabled_abilities";

// ============================================================================
// ABILITY HOOKS
// ============================================================================

/// Generic hook fired before every ability execution
pub const HOOK_BEFORE_EXECUTE: &str = "before_execute";

/// Generic hook fired after every ability execution
pub const HOOK_AFTER_EXECUTE: &str = "after_execute";

/// Error code returned for disabled abilities
pub const ERROR_ABILITY_DISABLED: &str = "ability_disabled";

/// Error code returned for unknown abilities
pub const ERROR_ABILITY_NOT_FOUND: &str = "ability_not_found";

/// Prefix for MCP tool names derived from ability ids
pub const MCP_TOOL_SEPARATOR: &str = "-";
