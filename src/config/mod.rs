//! Configuration management for PressGate
//!
//! Loads and manages PressGate configuration from pressgate.config.json
//! (or a `.yaml`/`.yml` file). A missing file yields the defaults.

use crate::constants::{
    ACCESS_TOKEN_TTL_SECS, AUTH_CODE_TTL_SECS, DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT,
    REFRESH_TOKEN_TTL_SECS, STORAGE_DRIVER_MEMORY, STORAGE_DRIVER_SQLITE,
};
use crate::{PressGateError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete PressGate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Storage configuration (required)
    pub storage: StorageConfig,

    /// HTTP server configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpConfig>,

    /// OAuth token lifetimes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthConfig>,

    /// Site identity reported by the built-in abilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<SiteConfig>,

    /// Logging configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Driver name (sqlite, memory)
    pub driver: String,

    /// Data source name / database path
    pub dsn: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Mark the session cookie `Secure` (requires HTTPS)
    #[serde(default)]
    pub secure: bool,

    /// Allowed CORS origins; localhost origins when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,

    /// Public issuer URL (e.g., https://example.com). Defaults to http://host:port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Accept plain-http redirect URIs pointing at localhost during registration
    #[serde(default = "default_true")]
    pub allow_localhost_redirects: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure: false,
            allowed_origins: None,
            issuer: None,
            allow_localhost_redirects: true,
        }
    }
}

impl HttpConfig {
    /// Issuer URL without a trailing slash
    pub fn issuer_url(&self) -> String {
        match &self.issuer {
            Some(issuer) => issuer.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// OAuth token lifetimes in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: i64,

    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: i64,

    #[serde(default = "default_code_ttl")]
    pub auth_code_ttl_secs: i64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_secs: REFRESH_TOKEN_TTL_SECS,
            auth_code_ttl_secs: AUTH_CODE_TTL_SECS,
        }
    }
}

/// Site identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_name")]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: default_site_name(),
            url: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    DEFAULT_HTTP_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_access_ttl() -> i64 {
    ACCESS_TOKEN_TTL_SECS
}

fn default_refresh_ttl() -> i64 {
    REFRESH_TOKEN_TTL_SECS
}

fn default_code_ttl() -> i64 {
    AUTH_CODE_TTL_SECS
}

fn default_site_name() -> String {
    "PressGate".to_string()
}

impl Config {
    /// Load configuration from the default file name in the working directory
    pub fn load() -> Result<Self> {
        Self::load_from_path(crate::constants::CONFIG_FILE_NAME)
    }

    /// Load configuration from specific path
    ///
    /// Supports both JSON and YAML formats based on file extension:
    /// - `.json` files are parsed as JSON
    /// - `.yaml` or `.yml` files are parsed as YAML
    /// - Files without extension default to JSON parsing
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;

        let mut config: Config = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
                PressGateError::config(format!("Failed to parse YAML config: {}", e))
            })?,
            _ => serde_json::from_str(&content).map_err(|e| {
                PressGateError::config(format!("Failed to parse JSON config: {}", e))
            })?,
        };

        config.expand_env();
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to specific path (JSON or YAML by extension)
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = match path_ref.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(self).map_err(|e| {
                PressGateError::config(format!("Failed to serialize to YAML: {}", e))
            })?,
            _ => serde_json::to_string_pretty(self)?,
        };

        std::fs::write(path_ref, content)?;
        Ok(())
    }

    /// Resolve `$env:VAR` references in string settings
    fn expand_env(&mut self) {
        self.storage.dsn = crate::utils::expand_env_value(&self.storage.dsn);
        if let Some(http) = self.http.as_mut()
            && let Some(issuer) = http.issuer.as_mut()
        {
            *issuer = crate::utils::expand_env_value(issuer);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.driver.is_empty() {
            return Err(PressGateError::config("storage.driver is required"));
        }

        match self.storage.driver.as_str() {
            STORAGE_DRIVER_SQLITE => {
                if self.storage.dsn.is_empty() {
                    return Err(PressGateError::config("storage.dsn is required"));
                }
            }
            STORAGE_DRIVER_MEMORY => {}
            other => {
                return Err(PressGateError::config(format!(
                    "Unsupported storage driver: '{}'. Supported: sqlite, memory",
                    other
                )));
            }
        }

        if let Some(ref http) = self.http {
            if http.port == 0 {
                return Err(PressGateError::config("http.port must be nonzero (1-65535)"));
            }

            if http.host.is_empty() {
                return Err(PressGateError::config("http.host cannot be empty"));
            }

            if let Some(ref issuer) = http.issuer
                && !issuer.starts_with("http://")
                && !issuer.starts_with("https://")
            {
                return Err(PressGateError::config(format!(
                    "Invalid issuer '{}': must start with http:// or https://",
                    issuer
                )));
            }

            if let Some(ref origins) = http.allowed_origins {
                for origin in origins {
                    if !origin.starts_with("http://") && !origin.starts_with("https://") {
                        return Err(PressGateError::config(format!(
                            "Invalid CORS origin '{}': must start with http:// or https://",
                            origin
                        )));
                    }
                }
            }
        }

        if let Some(ref oauth) = self.oauth {
            for (name, ttl) in [
                ("oauth.accessTokenTtlSecs", oauth.access_token_ttl_secs),
                ("oauth.refreshTokenTtlSecs", oauth.refresh_token_ttl_secs),
                ("oauth.authCodeTtlSecs", oauth.auth_code_ttl_secs),
            ] {
                if ttl <= 0 {
                    return Err(PressGateError::config(format!(
                        "{} must be greater than 0",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// HTTP settings, defaulted when absent
    pub fn http_config(&self) -> HttpConfig {
        self.http.clone().unwrap_or_default()
    }

    /// OAuth lifetimes, defaulted when absent
    pub fn oauth_config(&self) -> OAuthConfig {
        self.oauth.unwrap_or_default()
    }

    /// Site identity, defaulted when absent
    pub fn site_config(&self) -> SiteConfig {
        self.site.clone().unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                driver: STORAGE_DRIVER_SQLITE.to_string(),
                dsn: crate::constants::default_sqlite_dsn().to_string(),
            },
            http: Some(HttpConfig::default()),
            oauth: Some(OAuthConfig::default()),
            site: Some(SiteConfig::default()),
            log: Some(LogConfig {
                level: Some("info".to_string()),
            }),
        }
    }
}
