//! robias-ingestion — Document intake for the assessment engine.
//! - Discovery of plain-text papers, local PDFs and provider-stored files
//! - PDF text extraction (lopdf)
//! - Payload loading, one document at a time
//! - Bulk PDF upload to the provider file store
//! - Token estimation for pre-call logging

pub mod discovery;
pub mod error;
pub mod loader;
pub mod models;
pub mod pdf_parser;
pub mod tokens;
pub mod upload;

pub use discovery::{discover_pdfs, discover_plain_text, discover_stored};
pub use error::IngestionError;
pub use loader::load_payload;
pub use models::{DocumentKind, DocumentPayload, DocumentRef};
pub use tokens::estimate_tokens;
pub use upload::{upload_pdf_folder, UploadReport};
