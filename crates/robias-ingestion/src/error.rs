use std::path::PathBuf;

use robias_llm::LlmError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF parse error for {path}: {source}")]
    Pdf {
        path: PathBuf,
        #[source]
        source: lopdf::Error,
    },

    #[error("PDF {0} has no extractable text")]
    EmptyPdf(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IngestionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestionError::Io { path: path.into(), source }
    }
}
