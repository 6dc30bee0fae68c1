//! Document discovery: which papers a batch will assess, in which order.
//!
//! All listings are sorted by file name so paper numbering is stable
//! across runs and matches the resume journal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use robias_llm::FileStore;
use tracing::{debug, info, warn};

use crate::error::IngestionError;
use crate::models::DocumentRef;

/// Regular, non-hidden files in `dir`, sorted by file name.
pub(crate) fn list_files(dir: &Path) -> Result<Vec<PathBuf>, IngestionError> {
    if !dir.is_dir() {
        return Err(IngestionError::NotADirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| IngestionError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| IngestionError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(true);
        if hidden {
            debug!(path = %path.display(), "Skipping hidden file");
            continue;
        }
        files.push(path);
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

pub(crate) fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Every file in the plain-text input folder.
pub fn discover_plain_text(dir: &Path) -> Result<Vec<DocumentRef>, IngestionError> {
    let docs: Vec<DocumentRef> = list_files(dir)?
        .into_iter()
        .map(DocumentRef::plain_text)
        .collect();
    info!(dir = %dir.display(), n = docs.len(), "Plain-text documents discovered");
    Ok(docs)
}

/// Every `.pdf` file in the PDF input folder; other files are skipped with a warning.
pub fn discover_pdfs(dir: &Path) -> Result<Vec<DocumentRef>, IngestionError> {
    let mut docs = Vec::new();
    for path in list_files(dir)? {
        if is_pdf(&path) {
            docs.push(DocumentRef::local_pdf(path));
        } else {
            warn!(path = %path.display(), "This file is not a pdf, skipping");
        }
    }
    info!(dir = %dir.display(), n = docs.len(), "PDF documents discovered");
    Ok(docs)
}

/// Every file in the provider store, as a name → id map sorted by name.
/// When several stored files share a name, the one listed last wins.
pub async fn discover_stored(store: &dyn FileStore) -> Result<Vec<DocumentRef>, IngestionError> {
    let files = store.list().await?;
    let by_name: BTreeMap<String, String> = files
        .into_iter()
        .map(|f| (f.filename, f.id))
        .collect();

    info!(n = by_name.len(), "Stored documents discovered");
    Ok(by_name
        .into_iter()
        .map(|(name, id)| DocumentRef::stored(name, id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKind;
    use async_trait::async_trait;
    use robias_llm::{LlmError, StoredFile};

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_plain_text_sorted_and_hidden_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b_paper.md");
        touch(dir.path(), "a_paper.md");
        touch(dir.path(), ".DS_Store");
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let docs = discover_plain_text(dir.path()).unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(names, vec!["a_paper.md", "b_paper.md"]);
    }

    #[test]
    fn test_pdf_filter_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "one.PDF");
        touch(dir.path(), "two.pdf");
        touch(dir.path(), "notes.txt");

        let docs = discover_pdfs(dir.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| matches!(d.kind, DocumentKind::LocalPdf { .. })));
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        let err = discover_plain_text(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, IngestionError::NotADirectory(_)));
    }

    struct ListOnly(Vec<StoredFile>);

    #[async_trait]
    impl FileStore for ListOnly {
        async fn upload(&self, _path: &Path) -> Result<StoredFile, LlmError> {
            Err(LlmError::Unsupported("list only".into()))
        }
        async fn list(&self) -> Result<Vec<StoredFile>, LlmError> {
            Ok(self.0.clone())
        }
        async fn delete(&self, _file_id: &str) -> Result<(), LlmError> {
            Ok(())
        }
    }

    fn stored(id: &str, name: &str) -> StoredFile {
        StoredFile { id: id.into(), filename: name.into(), bytes: 0, created_at: 0, purpose: String::new() }
    }

    #[tokio::test]
    async fn test_stored_sorted_last_duplicate_wins() {
        let store = ListOnly(vec![
            stored("file-3", "zeta.pdf"),
            stored("file-1", "alpha.pdf"),
            stored("file-2", "alpha.pdf"),
        ]);
        let docs = discover_stored(&store).await.unwrap();
        assert_eq!(docs, vec![
            DocumentRef::stored("alpha.pdf", "file-2"),
            DocumentRef::stored("zeta.pdf", "file-3"),
        ]);
    }
}
