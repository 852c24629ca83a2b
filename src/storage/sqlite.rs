//! SQLite storage implementation
//!
//! Provides persistent storage for OAuth clients, codes, tokens, options and
//! host users using SQLite.

use crate::model::*;
use crate::storage::{ClientStorage, OptionStorage, TokenStorage, UserStorage, sql_common::*};
use crate::{PressGateError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite storage backend
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage
    ///
    /// # Arguments
    /// * `dsn` - Database path (e.g., "~/.pressgate/pressgate.db" or ":memory:" for in-memory)
    pub async fn new(dsn: &str) -> Result<Self> {
        let file_path = dsn.strip_prefix("sqlite:").unwrap_or(dsn);
        let in_memory = file_path == ":memory:";

        // Validate path to prevent directory traversal attacks
        if file_path.contains("..") {
            return Err(PressGateError::config(
                "Database path cannot contain '..' (path traversal not allowed)",
            ));
        }

        if !in_memory
            && let Some(parent) = Path::new(file_path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let connection_string = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}", file_path)
        };

        let mut options = SqliteConnectOptions::from_str(&connection_string)
            .map_err(|e| PressGateError::config(format!("Invalid SQLite DSN: {}", e)))?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every pooled connection to :memory: would open its own database
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| PressGateError::storage(format!("Failed to connect to SQLite: {}", e)))?;

        sqlx::migrate!("./migrations/sqlite")
            .run(&pool)
            .await
            .map_err(|e| PressGateError::storage(format!("Failed to run migrations: {}", e)))?;

        Ok(Self { pool })
    }

    fn parse_client(row: &SqliteRow) -> Result<Client> {
        Ok(Client {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            redirect_uris: string_list_from_text(&row.try_get::<String, _>("redirect_uris")?)?,
            is_confidential: bool_from_int(row.try_get("is_confidential")?),
            hashed_secret: row.try_get("hashed_secret")?,
            owner_user_id: row
                .try_get::<Option<i64>, _>("owner_user_id")?
                .map(|id| UserId(id as u64)),
            created_at: datetime_from_unix(row.try_get("created_at")?),
        })
    }

    fn parse_auth_code(row: &SqliteRow) -> Result<AuthCode> {
        Ok(AuthCode {
            code_id: row.try_get("code_id")?,
            client_id: row.try_get("client_id")?,
            user_id: UserId(row.try_get::<i64, _>("user_id")? as u64),
            redirect_uri: row.try_get("redirect_uri")?,
            scopes: string_list_from_text(&row.try_get::<String, _>("scopes")?)?,
            code_challenge: row.try_get("code_challenge")?,
            code_challenge_method: row.try_get("code_challenge_method")?,
            expires_at: datetime_from_unix(row.try_get("expires_at")?),
            is_revoked: bool_from_int(row.try_get("is_revoked")?),
        })
    }

    fn parse_access_token(row: &SqliteRow) -> Result<AccessToken> {
        Ok(AccessToken {
            jti: row.try_get("jti")?,
            client_id: row.try_get("client_id")?,
            user_id: UserId(row.try_get::<i64, _>("user_id")? as u64),
            scopes: string_list_from_text(&row.try_get::<String, _>("scopes")?)?,
            expires_at: datetime_from_unix(row.try_get("expires_at")?),
            is_revoked: bool_from_int(row.try_get("is_revoked")?),
        })
    }

    fn parse_refresh_token(row: &SqliteRow) -> Result<RefreshToken> {
        Ok(RefreshToken {
            token_id: row.try_get("token_id")?,
            access_token_id: row.try_get("access_token_id")?,
            expires_at: datetime_from_unix(row.try_get("expires_at")?),
            is_revoked: bool_from_int(row.try_get("is_revoked")?),
        })
    }

    fn parse_user(row: &SqliteRow) -> Result<HostUser> {
        Ok(HostUser {
            id: UserId(row.try_get::<i64, _>("id")? as u64),
            login: row.try_get("login")?,
            display_name: row.try_get("display_name")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            capabilities: string_list_from_text(&row.try_get::<String, _>("capabilities")?)?,
            created_at: datetime_from_unix(row.try_get("created_at")?),
        })
    }
}

#[async_trait]
impl ClientStorage for SqliteStorage {
    async fn save_client(&self, client: &Client) -> Result<()> {
        sqlx::query(
            "INSERT INTO oauth_clients
             (id, name, redirect_uris, is_confidential, hashed_secret, owner_user_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                redirect_uris = excluded.redirect_uris,
                is_confidential = excluded.is_confidential,
                hashed_secret = excluded.hashed_secret,
                owner_user_id = excluded.owner_user_id",
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(string_list_to_text(&client.redirect_uris)?)
        .bind(bool_to_int(client.is_confidential))
        .bind(&client.hashed_secret)
        .bind(client.owner_user_id.map(|id| id.as_u64() as i64))
        .bind(datetime_to_unix(client.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>> {
        let row = sqlx::query(
            "SELECT id, name, redirect_uris, is_confidential, hashed_secret, owner_user_id, created_at
             FROM oauth_clients WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_client).transpose()
    }

    async fn list_clients(&self) -> Result<Vec<Client>> {
        let rows = sqlx::query(
            "SELECT id, name, redirect_uris, is_confidential, hashed_secret, owner_user_id, created_at
             FROM oauth_clients ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_client).collect()
    }

    async fn delete_client(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Refresh tokens reference access tokens without a cascade
        sqlx::query(
            "DELETE FROM oauth_refresh_tokens WHERE access_token_id IN
             (SELECT jti FROM oauth_access_tokens WHERE client_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        // Codes and access tokens cascade
        sqlx::query("DELETE FROM oauth_clients WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStorage for SqliteStorage {
    async fn save_auth_code(&self, code: &AuthCode) -> Result<()> {
        sqlx::query(
            "INSERT INTO oauth_auth_codes
             (code_id, client_id, user_id, redirect_uri, scopes, code_challenge,
              code_challenge_method, expires_at, is_revoked)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code.code_id)
        .bind(&code.client_id)
        .bind(code.user_id.as_u64() as i64)
        .bind(&code.redirect_uri)
        .bind(string_list_to_text(&code.scopes)?)
        .bind(&code.code_challenge)
        .bind(&code.code_challenge_method)
        .bind(datetime_to_unix(code.expires_at))
        .bind(bool_to_int(code.is_revoked))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_auth_code(&self, code_id: &str) -> Result<Option<AuthCode>> {
        let row = sqlx::query(
            "SELECT code_id, client_id, user_id, redirect_uri, scopes, code_challenge,
                    code_challenge_method, expires_at, is_revoked
             FROM oauth_auth_codes WHERE code_id = ?",
        )
        .bind(code_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_auth_code).transpose()
    }

    async fn revoke_auth_code(&self, code_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE oauth_auth_codes SET is_revoked = 1 WHERE code_id = ? AND is_revoked = 0",
        )
        .bind(code_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_access_token(&self, token: &AccessToken) -> Result<()> {
        sqlx::query(
            "INSERT INTO oauth_access_tokens
             (jti, client_id, user_id, scopes, expires_at, is_revoked)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&token.jti)
        .bind(&token.client_id)
        .bind(token.user_id.as_u64() as i64)
        .bind(string_list_to_text(&token.scopes)?)
        .bind(datetime_to_unix(token.expires_at))
        .bind(bool_to_int(token.is_revoked))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_access_token(&self, jti: &str) -> Result<Option<AccessToken>> {
        let row = sqlx::query(
            "SELECT jti, client_id, user_id, scopes, expires_at, is_revoked
             FROM oauth_access_tokens WHERE jti = ?",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_access_token).transpose()
    }

    async fn revoke_access_token(&self, jti: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE oauth_access_tokens SET is_revoked = 1 WHERE jti = ? AND is_revoked = 0",
        )
        .bind(jti)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        sqlx::query(
            "INSERT INTO oauth_refresh_tokens (token_id, access_token_id, expires_at, is_revoked)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&token.token_id)
        .bind(&token.access_token_id)
        .bind(datetime_to_unix(token.expires_at))
        .bind(bool_to_int(token.is_revoked))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_refresh_token(&self, token_id: &str) -> Result<Option<RefreshToken>> {
        let row = sqlx::query(
            "SELECT token_id, access_token_id, expires_at, is_revoked
             FROM oauth_refresh_tokens WHERE token_id = ?",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_refresh_token).transpose()
    }

    async fn revoke_refresh_token(&self, token_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE oauth_refresh_tokens SET is_revoked = 1 WHERE token_id = ? AND is_revoked = 0",
        )
        .bind(token_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_tokens_for_client(&self, client_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let refresh = sqlx::query(
            "UPDATE oauth_refresh_tokens SET is_revoked = 1
             WHERE is_revoked = 0 AND access_token_id IN
             (SELECT jti FROM oauth_access_tokens WHERE client_id = ?)",
        )
        .bind(client_id)
        .execute(&mut *tx)
        .await?;

        let access = sqlx::query(
            "UPDATE oauth_access_tokens SET is_revoked = 1 WHERE client_id = ? AND is_revoked = 0",
        )
        .bind(client_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(refresh.rows_affected() + access.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = datetime_to_unix(now);
        let mut tx = self.pool.begin().await?;
        let mut purged = 0u64;

        for table in [
            "oauth_auth_codes",
            "oauth_access_tokens",
            "oauth_refresh_tokens",
        ] {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE expires_at <= ?", table))
                .bind(cutoff)
                .execute(&mut *tx)
                .await?;
            purged += result.rows_affected();
        }

        tx.commit().await?;
        Ok(purged)
    }
}

#[async_trait]
impl OptionStorage for SqliteStorage {
    async fn get_option(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM options WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.try_get::<String, _>("value")).transpose()?)
    }

    async fn set_option(&self, key: &str, value: &str) -> Result<()> {
        self.set_options(&[(key, value)]).await
    }

    async fn set_options(&self, entries: &[(&str, &str)]) -> Result<()> {
        let now = datetime_to_unix(Utc::now());
        let mut tx = self.pool.begin().await?;

        for (key, value) in entries {
            sqlx::query(
                "INSERT INTO options (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
            )
            .bind(*key)
            .bind(*value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_option(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM options WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStorage for SqliteStorage {
    async fn insert_user(&self, user: &HostUser) -> Result<UserId> {
        let result = sqlx::query(
            "INSERT INTO users (login, display_name, email, password_hash, capabilities, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.login)
        .bind(&user.display_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(string_list_to_text(&user.capabilities)?)
        .bind(datetime_to_unix(user.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => PressGateError::validation(
                format!("user login already exists: {}", user.login),
            ),
            other => other.into(),
        })?;

        Ok(UserId(result.last_insert_rowid() as u64))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<HostUser>> {
        let row = sqlx::query(
            "SELECT id, login, display_name, email, password_hash, capabilities, created_at
             FROM users WHERE id = ?",
        )
        .bind(id.as_u64() as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_user).transpose()
    }

    async fn get_user_by_login(&self, login: &str) -> Result<Option<HostUser>> {
        let row = sqlx::query(
            "SELECT id, login, display_name, email, password_hash, capabilities, created_at
             FROM users WHERE login = ?",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_user).transpose()
    }

    async fn list_users(&self) -> Result<Vec<HostUser>> {
        let rows = sqlx::query(
            "SELECT id, login, display_name, email, password_hash, capabilities, created_at
             FROM users ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_user).collect()
    }

    async fn delete_user(&self, id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.as_u64() as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
