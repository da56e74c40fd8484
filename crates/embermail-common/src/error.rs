//! Error types for embermail

use thiserror::Error;

/// Main error type for embermail
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for embermail
pub type Result<T> = std::result::Result<T, Error>;
