use std::path::PathBuf;

use robias_ingestion::IngestionError;
use robias_llm::{LlmError, RetryFailure};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssessError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Prompt script is not valid YAML: {0}")]
    PromptYaml(#[from] serde_yaml::Error),

    #[error("Prompt script is missing key `{0}`")]
    PromptMissingKey(&'static str),

    #[error("Prompt script value for `{0}` must be a string")]
    PromptNotAString(String),

    #[error("Prompt script has no criteria")]
    NoCriteria,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Retry(#[from] RetryFailure),

    #[error("Model {model} cannot read stored files; assess local PDFs or plain text instead")]
    FileInputUnsupported { model: String },
}

impl AssessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AssessError::Io { path: path.into(), source }
    }
}
