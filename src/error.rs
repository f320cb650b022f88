//! Error types for watching, loading and reading configuration.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Startup errors (fatal to construction)
    PathNotFound,
    WatchRegistration,
    AlreadyStarted,
    ThreadSpawn,
    InitialLoadTimeout,

    // Reload errors (logged, previous snapshot kept)
    ReadError,
    ParseError,

    // Lookup errors
    NotFound,
    UnmarshalMismatch,
}

/// Errors produced by the watcher, the state managers and the client.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The watched file did not exist when the watcher was started.
    #[error("path does not exist: {}", path.display())]
    PathNotFound { path: PathBuf },

    /// The OS-level watch could not be created or registered.
    #[error("failed to register watch on {}: {source}", path.display())]
    WatchRegistration {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// `start` was called on a watcher whose loop already ran.
    #[error("watcher for {} was already started", path.display())]
    AlreadyStarted { path: PathBuf },

    /// The event loop thread could not be spawned.
    #[error("failed to spawn watcher thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// No load succeeded within the configured initial load timeout.
    #[error("no configuration loaded from {} within {timeout_ms}ms", path.display())]
    InitialLoadTimeout { path: PathBuf, timeout_ms: u128 },

    /// The config file could not be read during a reload.
    #[error("error reading the config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not a JSON array of `{key, value}` records.
    #[error("error parsing the config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The key is absent from the current snapshot.
    #[error("config not found: {key}")]
    NotFound { key: String },

    /// The raw value does not fit the requested shape.
    #[error("error unmarshalling key {key}: {source}")]
    UnmarshalMismatch {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn unmarshal(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::UnmarshalMismatch {
            key: key.into(),
            source,
        }
    }

    /// Absence is an expected condition and is not logged by accessors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::NotFound { .. })
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::PathNotFound { .. } => ErrorCode::PathNotFound,
            ConfigError::WatchRegistration { .. } => ErrorCode::WatchRegistration,
            ConfigError::AlreadyStarted { .. } => ErrorCode::AlreadyStarted,
            ConfigError::ThreadSpawn(_) => ErrorCode::ThreadSpawn,
            ConfigError::InitialLoadTimeout { .. } => ErrorCode::InitialLoadTimeout,
            ConfigError::Read { .. } => ErrorCode::ReadError,
            ConfigError::Parse { .. } => ErrorCode::ParseError,
            ConfigError::NotFound { .. } => ErrorCode::NotFound,
            ConfigError::UnmarshalMismatch { .. } => ErrorCode::UnmarshalMismatch,
        }
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
