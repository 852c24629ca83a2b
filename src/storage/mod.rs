//! Storage backends for PressGate
//!
//! Provides the relational store behind the OAuth repositories, the
//! key-value option store (keys, disabled-ability registry) and the host
//! user directory, with a unified trait interface.

pub mod memory;
pub mod sql_common;
pub mod sqlite;

use crate::{Result, model::*};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// OAuth client persistence
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Insert or replace a client
    async fn save_client(&self, client: &Client) -> Result<()>;

    /// Get a client by id
    async fn get_client(&self, id: &str) -> Result<Option<Client>>;

    /// List all clients, newest first
    async fn list_clients(&self) -> Result<Vec<Client>>;

    /// Delete a client together with its codes and tokens
    async fn delete_client(&self, id: &str) -> Result<()>;
}

/// Authorization code, access token and refresh token persistence
///
/// The `revoke_*` methods are atomic check-and-set operations: they return
/// `true` only for the single caller that flipped the flag from active to
/// revoked. Single-use code redemption and refresh rotation rely on this.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn save_auth_code(&self, code: &AuthCode) -> Result<()>;

    async fn get_auth_code(&self, code_id: &str) -> Result<Option<AuthCode>>;

    async fn revoke_auth_code(&self, code_id: &str) -> Result<bool>;

    async fn save_access_token(&self, token: &AccessToken) -> Result<()>;

    async fn get_access_token(&self, jti: &str) -> Result<Option<AccessToken>>;

    async fn revoke_access_token(&self, jti: &str) -> Result<bool>;

    async fn save_refresh_token(&self, token: &RefreshToken) -> Result<()>;

    async fn get_refresh_token(&self, token_id: &str) -> Result<Option<RefreshToken>>;

    async fn revoke_refresh_token(&self, token_id: &str) -> Result<bool>;

    /// Revoke every access and refresh token issued to a client
    async fn revoke_tokens_for_client(&self, client_id: &str) -> Result<u64>;

    /// Delete codes and tokens that expired before `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Persistent key-value configuration (the host's option table)
#[async_trait]
pub trait OptionStorage: Send + Sync {
    async fn get_option(&self, key: &str) -> Result<Option<String>>;

    async fn set_option(&self, key: &str, value: &str) -> Result<()>;

    /// Write several options in one atomic step
    async fn set_options(&self, entries: &[(&str, &str)]) -> Result<()>;

    async fn delete_option(&self, key: &str) -> Result<()>;
}

/// Host user directory
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Insert a new user; the `id` field is ignored and the assigned id returned
    async fn insert_user(&self, user: &HostUser) -> Result<UserId>;

    async fn get_user(&self, id: UserId) -> Result<Option<HostUser>>;

    async fn get_user_by_login(&self, login: &str) -> Result<Option<HostUser>>;

    async fn list_users(&self) -> Result<Vec<HostUser>>;

    async fn delete_user(&self, id: UserId) -> Result<()>;
}

/// Complete storage backend
pub trait Storage: ClientStorage + TokenStorage + OptionStorage + UserStorage {}

impl<T> Storage for T where T: ClientStorage + TokenStorage + OptionStorage + UserStorage {}

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Create a storage backend from configuration
pub async fn create_storage_from_config(
    config: &crate::config::StorageConfig,
) -> crate::Result<Arc<dyn Storage>> {
    match config.driver.as_str() {
        crate::constants::STORAGE_DRIVER_MEMORY => Ok(Arc::new(MemoryStorage::new())),
        crate::constants::STORAGE_DRIVER_SQLITE => {
            Ok(Arc::new(SqliteStorage::new(&config.dsn).await?))
        }
        _ => Err(crate::PressGateError::config(format!(
            "Unknown storage driver: {}. Supported: memory, sqlite",
            config.driver
        ))),
    }
}

#[cfg(test)]
mod sqlite_test;
#[cfg(test)]
mod storage_test;
