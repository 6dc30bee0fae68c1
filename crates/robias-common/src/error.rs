use thiserror::Error;

#[derive(Debug, Error)]
pub enum RobiasError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Security policy violation: {0}")]
    SecurityError(String),
}

pub type Result<T> = std::result::Result<T, RobiasError>;
