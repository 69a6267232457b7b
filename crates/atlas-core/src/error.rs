//! Error types for atlas-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using atlas-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in atlas-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote record store error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
