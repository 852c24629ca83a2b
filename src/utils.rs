//! Utility functions and helpers

use crate::config::{Config, HttpConfig, StorageConfig};
use crate::constants::STORAGE_DRIVER_SQLITE;
use crate::storage::SqliteStorage;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::sync::Arc;
use tempfile::TempDir;

/// Expand `$env:VARNAME` references from the process environment
///
/// Unset variables are left as written.
///
/// ```
/// # use pressgate::utils::expand_env_value;
/// assert_eq!(expand_env_value("plain"), "plain");
/// ```
pub fn expand_env_value(value: &str) -> String {
    // VARNAME starts with a letter or underscore
    static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\$env:([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid environment variable regex")
    });

    // Fast path
    if !value.contains("$env:") {
        return value.to_string();
    }

    ENV_VAR_PATTERN
        .replace_all(value, |caps: &Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Test environment with an isolated SQLite database (test builds only)
///
/// The temporary directory and database are removed when the value drops.
///
/// ```no_run
/// use pressgate::utils::TestEnvironment;
///
/// #[tokio::test]
/// async fn my_test() {
///     let env = TestEnvironment::new().await;
///     let abilities = env.deps.abilities.clone();
/// }
/// ```
pub struct TestEnvironment {
    /// Kept alive for the test's duration
    _temp_dir: TempDir,

    /// Complete dependencies object ready to use in tests
    pub deps: crate::core::Dependencies,
}

impl TestEnvironment {
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Test environment on top of `config`; storage is always a fresh SQLite file
    pub async fn with_config(mut config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join(".pressgate").join("pressgate.db");
        let dsn = db_path.to_str().expect("Invalid temp path").to_string();

        config.storage = StorageConfig {
            driver: STORAGE_DRIVER_SQLITE.to_string(),
            dsn: dsn.clone(),
        };
        if config.http.is_none() {
            config.http = Some(HttpConfig {
                issuer: Some("https://cms.example.com".to_string()),
                ..Default::default()
            });
        }

        let storage = Arc::new(
            SqliteStorage::new(&dsn)
                .await
                .expect("Failed to create SQLite storage"),
        );

        let deps = crate::core::create_dependencies_with_storage(&config, storage)
            .expect("Failed to create dependencies");

        Self {
            _temp_dir: temp_dir,
            deps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_value() {
        // SAFETY: test-only env mutation with a name unique to this test
        unsafe { std::env::set_var("PRESSGATE_TEST_EXPAND", "secret") };

        assert_eq!(expand_env_value("$env:PRESSGATE_TEST_EXPAND"), "secret");
        assert_eq!(
            expand_env_value("Bearer $env:PRESSGATE_TEST_EXPAND!"),
            "Bearer secret!"
        );
        assert_eq!(
            expand_env_value("$env:PRESSGATE_TEST_MISSING_VAR"),
            "$env:PRESSGATE_TEST_MISSING_VAR"
        );
        assert_eq!(expand_env_value("no refs"), "no refs");
    }

    #[tokio::test]
    async fn test_environment_creates_structure() {
        let env = TestEnvironment::new().await;
        assert_eq!(env.deps.abilities.list_abilities().len(), 2);
        assert!(env.deps.storage.list_clients().await.unwrap().is_empty());
    }
}
