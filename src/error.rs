//! Error types for Storyweave
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Storyweave operations
///
/// This enum encompasses all possible errors that can occur while serving
/// story requests: configuration loading, generation-backend calls,
/// session lookups, and persistence.
#[derive(Error, Debug)]
pub enum StoryweaveError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generation backend is unreachable (readiness probe or call failed)
    ///
    /// Surfaced to clients as a retryable 503.
    #[error("Generation backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Generation backend reachable but the call itself failed
    #[error("Generation backend error: {0}")]
    Backend(String),

    /// Turn requested against a session that does not exist anywhere
    ///
    /// Precondition violation: the caller must create the story first.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Storyweave operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
