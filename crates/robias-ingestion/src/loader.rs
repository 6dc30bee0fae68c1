//! Resolve a [`DocumentRef`] into what is sent to the model.

use tracing::{debug, instrument};

use crate::error::IngestionError;
use crate::models::{DocumentKind, DocumentPayload, DocumentRef};
use crate::pdf_parser::parse_pdf_text;

#[instrument(skip(doc), fields(file = %doc.file_name, kind = doc.kind.as_str()))]
pub async fn load_payload(doc: &DocumentRef) -> Result<DocumentPayload, IngestionError> {
    match &doc.kind {
        DocumentKind::PlainText { path } => {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| IngestionError::io(path, e))?;
            Ok(DocumentPayload::Text(text))
        }
        DocumentKind::LocalPdf { path } => {
            let path = path.clone();
            let parsed = tokio::task::spawn_blocking(move || parse_pdf_text(&path)).await??;
            debug!(
                title = ?parsed.title,
                page_count = parsed.page_count,
                "PDF text extracted"
            );
            Ok(DocumentPayload::Text(parsed.full_text))
        }
        DocumentKind::Stored { file_id } => Ok(DocumentPayload::File { file_id: file_id.clone() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.md");
        std::fs::write(&path, "# Methods\nBlinded outcome assessors.").unwrap();

        let payload = load_payload(&DocumentRef::plain_text(&path)).await.unwrap();
        assert_eq!(payload, DocumentPayload::Text("# Methods\nBlinded outcome assessors.".into()));
    }

    #[tokio::test]
    async fn test_non_utf8_text_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.md");
        std::fs::write(&path, [0xff, 0xfe, 0xfd]).unwrap();

        let err = load_payload(&DocumentRef::plain_text(&path)).await.unwrap_err();
        assert!(matches!(err, IngestionError::Io { .. }));
    }

    #[tokio::test]
    async fn test_stored_payload_is_a_reference() {
        let payload = load_payload(&DocumentRef::stored("a.pdf", "file-9")).await.unwrap();
        assert_eq!(payload, DocumentPayload::File { file_id: "file-9".into() });
    }
}
