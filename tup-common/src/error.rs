//! Common error types for TUP

use thiserror::Error;

/// Common result type for TUP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the upload crates
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
