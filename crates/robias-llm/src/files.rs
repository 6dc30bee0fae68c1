//! Provider-side file storage for documents sent by reference.
//!
//! Endpoints used (OpenAI Files API):
//!   upload: POST   /v1/files          (multipart, purpose=assistants)
//!   list:   GET    /v1/files          (cursor-paginated)
//!   delete: DELETE /v1/files/{id}

use std::path::Path;

use async_trait::async_trait;
use robias_common::SandboxClient;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::backend::{check_response_status, LlmError, OPENAI_BASE_URL};

const LIST_PAGE_SIZE: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub purpose: String,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<StoredFile, LlmError>;
    async fn list(&self) -> Result<Vec<StoredFile>, LlmError>;
    async fn delete(&self, file_id: &str) -> Result<(), LlmError>;

    async fn count(&self) -> Result<usize, LlmError> {
        Ok(self.list().await?.len())
    }
}

/// Result of deleting every stored file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}

/// Delete every stored file. One failed deletion does not stop the rest.
pub async fn delete_all(store: &dyn FileStore) -> Result<DeleteReport, LlmError> {
    let files = store.list().await?;
    let mut report = DeleteReport::default();

    for file in files {
        match store.delete(&file.id).await {
            Ok(()) => {
                info!(file_id = %file.id, filename = %file.filename, "Deleted stored file");
                report.deleted.push(file.filename);
            }
            Err(e) => {
                let msg = format!("failed to delete {} ({}): {e}", file.filename, file.id);
                warn!("{}", &msg);
                report.errors.push(msg);
            }
        }
    }

    info!(deleted = report.deleted.len(), errors = report.errors.len(), "Stored files deleted");
    Ok(report)
}

// ── OpenAI Files API ─────────────────────────────────────────────────────────

pub struct OpenAiFileStore {
    pub base_url: String,
    api_key: SecretString,
    client: SandboxClient,
}

impl OpenAiFileStore {
    pub fn new(api_key: SecretString, client: SandboxClient) -> Self {
        Self {
            base_url: OPENAI_BASE_URL.to_string(),
            api_key,
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Parse one page of `GET /v1/files`; returns the files and whether more pages follow.
pub(crate) fn parse_file_page(json: &serde_json::Value) -> Result<(Vec<StoredFile>, bool), LlmError> {
    let files: Vec<StoredFile> = serde_json::from_value(json["data"].clone())?;
    let has_more = json["has_more"].as_bool().unwrap_or(false);
    Ok((files, has_more))
}

#[async_trait]
impl FileStore for OpenAiFileStore {
    #[instrument(skip(self))]
    async fn upload(&self, path: &Path) -> Result<StoredFile, LlmError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf")
            .to_string();
        let bytes = tokio::fs::read(path).await?;

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str("application/pdf")?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);

        let resp = self.client
            .post(&self.url("files"))?
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;
        let json = check_response_status(resp).await?;
        Ok(serde_json::from_value(json)?)
    }

    async fn list(&self) -> Result<Vec<StoredFile>, LlmError> {
        let mut all = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut params = vec![("limit", LIST_PAGE_SIZE.to_string())];
            if let Some(ref cursor) = after {
                params.push(("after", cursor.clone()));
            }
            let resp = self.client
                .get(&self.url("files"))?
                .bearer_auth(self.api_key.expose_secret())
                .query(&params)
                .send()
                .await?;
            let json = check_response_status(resp).await?;
            let (files, has_more) = parse_file_page(&json)?;

            after = files.last().map(|f| f.id.clone());
            all.extend(files);
            if !has_more || after.is_none() {
                break;
            }
        }

        Ok(all)
    }

    async fn delete(&self, file_id: &str) -> Result<(), LlmError> {
        let resp = self.client
            .delete(&self.url(&format!("files/{file_id}")))?
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;
        let json = check_response_status(resp).await?;
        if json["deleted"].as_bool() == Some(false) {
            return Err(LlmError::ApiError {
                status: 200,
                message: format!("file {file_id} was not deleted"),
            });
        }
        Ok(())
    }
}
