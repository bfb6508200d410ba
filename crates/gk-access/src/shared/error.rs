//! Access Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Validation error [{code}]: {message}")]
    Validation { code: String, message: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Conflict [{code}]: {message}")]
    Conflict { code: String, message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    /// A rotated or revoked refresh token was presented again.
    #[error("Refresh token reuse detected")]
    TokenReused,

    #[error("Invalid token: {message}")]
    InvalidToken { message: String },

    #[error("Concurrent modification of {table} {id}")]
    Concurrency { table: String, id: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AccessError {
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken { message: message.into() }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache { message: message.into() }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &str {
        match self {
            AccessError::Validation { code, .. } => code,
            AccessError::NotFound { .. } => "NOT_FOUND",
            AccessError::Conflict { code, .. } => code,
            AccessError::Unauthorized { .. } => "UNAUTHORIZED",
            AccessError::InvalidCredentials => "INVALID_CREDENTIALS",
            AccessError::Forbidden { .. } => "FORBIDDEN",
            AccessError::AccountDeactivated => "ACCOUNT_DEACTIVATED",
            AccessError::TokenExpired => "TOKEN_EXPIRED",
            AccessError::TokenRevoked => "TOKEN_REVOKED",
            AccessError::TokenReused => "TOKEN_REUSED",
            AccessError::InvalidToken { .. } => "INVALID_TOKEN",
            AccessError::Concurrency { .. } => "CONCURRENCY_ERROR",
            AccessError::Cache { .. } => "CACHE_ERROR",
            AccessError::Persistence { .. } => "PERSISTENCE_ERROR",
            AccessError::Json(_) => "SERIALIZATION_ERROR",
            AccessError::Configuration { .. } => "CONFIGURATION_ERROR",
            AccessError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Caller-facing category, independent of the specific variant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccessError::Validation { .. } => ErrorKind::Validation,
            AccessError::NotFound { .. } => ErrorKind::NotFound,
            AccessError::Conflict { .. } | AccessError::Concurrency { .. } => ErrorKind::Conflict,
            AccessError::Unauthorized { .. }
            | AccessError::InvalidCredentials
            | AccessError::TokenExpired
            | AccessError::TokenRevoked
            | AccessError::InvalidToken { .. } => ErrorKind::Unauthorized,
            AccessError::Forbidden { .. } | AccessError::AccountDeactivated => ErrorKind::Forbidden,
            AccessError::TokenReused => ErrorKind::TokenReused,
            _ => ErrorKind::Failure,
        }
    }
}

/// Coarse error taxonomy exposed to outer layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    Forbidden,
    TokenReused,
    Failure,
}

pub type Result<T> = std::result::Result<T, AccessError>;
