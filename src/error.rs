//! Error types for cacheguard
//!
//! All modules use `CacheResult<T>` as their return type. Callers of the query
//! strategies bring their own error type and implement `From<CacheError>` so
//! that loader errors pass through untouched.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cacheguard operations
pub type CacheResult<T> = Result<T, CacheError>;

/// All errors that can occur in cacheguard
#[derive(Error, Debug)]
pub enum CacheError {
    // Store errors
    #[error("Cache store {op} failed for key {key}: {reason}")]
    Store {
        op: &'static str,
        key: String,
        reason: String,
    },

    #[error("Cache store unavailable: {0}")]
    StoreUnavailable(String),

    // Lock errors
    #[error("Lock manager error on {name}: {reason}")]
    Lock { name: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported store backend: {0}")]
    UnsupportedBackend(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Create a store error for an operation on a key
    pub fn store(op: &'static str, key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Store {
            op,
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a lock manager error
    pub fn lock(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Lock {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store { .. } | Self::StoreUnavailable(_) | Self::Lock { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::StoreUnavailable(_) => {
                Some("Check that the store is reachable (store.redis_url)")
            }
            Self::UnsupportedBackend(_) => {
                Some("Use store.backend = \"memory\", or build with --features redis")
            }
            Self::ConfigInvalid { .. } => Some("Run: cacheguard config init --force"),
            _ => None,
        }
    }
}
