//! Audit trail for LLM calls.
//! One entry per logical call (retries included), written alongside the
//! assessment outputs.

use chrono::Utc;
use robias_common::TokenUsage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAuditEntry {
    pub id: Uuid,
    pub document: String,
    pub criterion: Option<String>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub attempts: u32,
    pub output_hash: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub called_at: chrono::DateTime<Utc>,
}

impl LlmAuditEntry {
    pub fn success(
        document: &str,
        criterion: Option<&str>,
        model: &str,
        usage: TokenUsage,
        output: &str,
        attempts: u32,
        latency_ms: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(output.as_bytes());
        let output_hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4(),
            document: document.to_string(),
            criterion: criterion.map(str::to_string),
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            attempts,
            output_hash: Some(output_hash),
            error: None,
            latency_ms,
            called_at: Utc::now(),
        }
    }

    pub fn failure(
        document: &str,
        criterion: Option<&str>,
        model: &str,
        error: &str,
        attempts: u32,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document: document.to_string(),
            criterion: criterion.map(str::to_string),
            model: model.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            attempts,
            output_hash: None,
            error: Some(error.to_string()),
            latency_ms,
            called_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_hashes_output() {
        let e = LlmAuditEntry::success("a.txt", Some("D1"), "gpt-4o", TokenUsage::new(10, 2), "{}", 1, 120);
        assert_eq!(
            e.output_hash.as_deref(),
            Some("44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a")
        );
        assert_eq!((e.input_tokens, e.output_tokens), (10, 2));
        assert!(e.error.is_none());
    }

    #[test]
    fn test_failure_has_no_usage() {
        let e = LlmAuditEntry::failure("a.txt", None, "gpt-4o", "API error [400]: bad", 1, 80);
        assert_eq!((e.input_tokens, e.output_tokens), (0, 0));
        assert!(e.output_hash.is_none());
        assert_eq!(e.error.as_deref(), Some("API error [400]: bad"));
    }
}
