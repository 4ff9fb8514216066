use thiserror::Error;

/// Common error type for airwatch components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown sensor kind: {0}")]
    UnknownKind(String),

    #[error("Invalid bus address: {0}")]
    InvalidAddress(String),
}

/// Result type alias using airwatch's Error.
pub type Result<T> = std::result::Result<T, Error>;
