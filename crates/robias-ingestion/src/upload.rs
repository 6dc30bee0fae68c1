//! Bulk upload of a PDF folder to the provider file store.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use robias_llm::FileStore;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::discovery::{is_pdf, list_files};
use crate::error::IngestionError;

/// Outcome of [`upload_pdf_folder`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    /// file name → provider file id
    pub uploaded: BTreeMap<String, String>,
    /// Non-PDF files left alone.
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

/// Upload every `.pdf` in `dir`, pausing `delay` between uploads.
/// A failed upload is recorded and the rest of the folder continues.
#[instrument(skip(store), fields(dir = %dir.display()))]
pub async fn upload_pdf_folder(
    store: &dyn FileStore,
    dir: &Path,
    delay: Duration,
) -> Result<UploadReport, IngestionError> {
    let mut report = UploadReport::default();
    let mut attempted = 0usize;

    for path in list_files(dir)? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !is_pdf(&path) {
            warn!(file = %name, "This file is not a pdf, skipping");
            report.skipped.push(name);
            continue;
        }

        if attempted > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        attempted += 1;

        match store.upload(&path).await {
            Ok(stored) => {
                info!(file = %name, file_id = %stored.id, "Uploaded");
                report.uploaded.insert(name, stored.id);
            }
            Err(e) => {
                let msg = format!("failed to upload {name}: {e}");
                warn!("{}", &msg);
                report.errors.push(msg);
            }
        }
    }

    info!(
        uploaded = report.uploaded.len(),
        skipped = report.skipped.len(),
        errors = report.errors.len(),
        "Upload finished"
    );
    Ok(report)
}
