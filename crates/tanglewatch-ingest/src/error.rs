//! Error types for the ingestion subsystem.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
///
/// Transport errors are recovered by the supervisor (the endpoint goes back
/// to `Idle` and is retried); they are never returned synchronously to a
/// caller once a worker is running. Configuration errors are fatal only at
/// startup, before any worker is launched.
#[derive(Error, Debug)]
pub enum Error {
    /// Dial or receive failure on an upstream connection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A received frame was empty or otherwise unusable.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid endpoint URI or dedup window configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}
