//! Data models for document intake.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A document queued for assessment. Content is loaded lazily so that a
/// read failure only affects this one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub file_name: String,
    pub kind: DocumentKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentKind {
    /// Markdown or plain text already converted from the paper.
    PlainText { path: PathBuf },
    /// A PDF on disk whose text is extracted locally.
    LocalPdf { path: PathBuf },
    /// A PDF previously uploaded to the provider's file store.
    Stored { file_id: String },
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::PlainText { .. } => "plain_text",
            DocumentKind::LocalPdf { .. }  => "local_pdf",
            DocumentKind::Stored { .. }    => "stored",
        }
    }
}

impl DocumentRef {
    pub fn plain_text(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { file_name: file_name_of(&path), kind: DocumentKind::PlainText { path } }
    }

    pub fn local_pdf(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { file_name: file_name_of(&path), kind: DocumentKind::LocalPdf { path } }
    }

    pub fn stored(file_name: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self { file_name: file_name.into(), kind: DocumentKind::Stored { file_id: file_id.into() } }
    }
}

fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// What is actually sent to the model for one document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentPayload {
    Text(String),
    File { file_id: String },
}
