//! robias-llm — LLM backend abstraction layer.
//! Structured-output completions, the provider file store, retry with
//! backoff around completions, and the per-call audit trail.

pub mod audit;
pub mod backend;
pub mod files;
pub mod retry;
pub mod schema;

pub use audit::LlmAuditEntry;
pub use backend::{
    InputPart, LlmBackend, LlmError, OpenAiBackend, OpenAiCompatibleBackend, StructuredRequest,
    StructuredResponse,
};
pub use files::{delete_all, DeleteReport, FileStore, OpenAiFileStore, StoredFile};
pub use retry::{with_retry, Retried, RetryConfig, RetryFailure, RetryPolicy};
pub use schema::{OutputSchema, StructuredOutput};
