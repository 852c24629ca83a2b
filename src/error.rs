//! Error types for PressGate
//!
//! This module provides the error hierarchy using thiserror.
//! Infrastructure errors convert into `PressGateError`; the structured,
//! client-facing errors (`ApiError`, `AbilityError`) carry a stable `code`
//! string the way the host's REST layer reports failures.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Main error type for PressGate operations
#[derive(Error, Debug)]
pub enum PressGateError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<sqlx::Error> for PressGateError {
    fn from(err: sqlx::Error) -> Self {
        PressGateError::Storage(StorageError::from(err))
    }
}

impl From<sqlx::migrate::MigrateError> for PressGateError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        PressGateError::Storage(StorageError::Migration(err.to_string()))
    }
}

/// Convenient result type for PressGate operations
pub type Result<T> = std::result::Result<T, PressGateError>;

impl PressGateError {
    /// Create a validation error
    #[inline]
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        PressGateError::Validation(msg.into())
    }

    /// Create a config error
    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PressGateError::Config(msg.into())
    }

    /// Create a storage error
    #[inline]
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        PressGateError::Storage(StorageError::Database(msg.into()))
    }

    /// Create a crypto error
    #[inline]
    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        PressGateError::Crypto(msg.into())
    }

    /// Create an MCP transport error
    #[inline]
    pub fn mcp<S: Into<String>>(msg: S) -> Self {
        PressGateError::Mcp(msg.into())
    }

    /// Create an internal error
    #[inline]
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        PressGateError::Internal(msg.into())
    }

    /// Create a not found error
    #[inline]
    pub fn not_found(entity: &str, id: &str) -> Self {
        PressGateError::Storage(StorageError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }
}

/// Structured error with a machine-readable code and an HTTP status.
///
/// Used at the resource-server boundary (`oauth_missing_token`,
/// `oauth_insufficient_scope`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip)]
    pub status: u16,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "code": self.code,
            "message": self.message,
            "data": { "status": status.as_u16() },
        });
        (status, Json(body)).into_response()
    }
}

/// Error returned by an ability (domain error) or by the execution guard.
///
/// The guard never inspects or rewrites domain errors; it only adds its own
/// `ability_disabled` / `ability_not_found` codes.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{code}: {message}")]
pub struct AbilityError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AbilityError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
