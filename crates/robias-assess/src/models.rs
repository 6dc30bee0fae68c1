//! Data models for an assessment run.

use robias_common::TokenUsage;
use robias_llm::LlmAuditEntry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How criteria are put to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStrategy {
    /// One call per paper covering every criterion.
    AllCriteria,
    /// One call per criterion per paper.
    PerCriterion,
}

impl AssessmentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentStrategy::AllCriteria  => "all_criteria",
            AssessmentStrategy::PerCriterion => "per_criterion",
        }
    }
}

/// Where the batch's documents come from. Only affects labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    PlainText,
    LocalPdf,
    Stored,
}

impl InputSource {
    /// Line written under the notes banner.
    pub fn mode_label(&self) -> &'static str {
        match self {
            InputSource::PlainText => "Assessing Plain Files Locally.",
            InputSource::LocalPdf  => "Assessing PDFs Locally.",
            InputSource::Stored    => "Assessing PDFs Stored in Cloud.",
        }
    }

    /// Used in progress messages.
    pub fn item_label(&self) -> &'static str {
        match self {
            InputSource::PlainText => "plain text",
            InputSource::LocalPdf | InputSource::Stored => "pdf file",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    /// Every call succeeded.
    Assessed,
    /// Some criteria failed; their cells read `ERROR`.
    Partial,
    Failed,
}

/// The result for one paper.
///
/// The paper number is not part of the stored note body or cells so that an
/// outcome reused from a journal renders correctly under a new numbering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperOutcome {
    pub index: usize,
    pub file_name: String,
    pub strategy: AssessmentStrategy,
    pub status: PaperStatus,
    /// Note text following the paper heading.
    pub note_body: String,
    /// Summary cells following the number and file name columns.
    pub cells: Vec<String>,
    pub usage: TokenUsage,
    pub error: Option<String>,
}

impl PaperOutcome {
    pub fn note_entry(&self) -> String {
        format!("\n=== Paper {}: {} ===\n{}", self.index, self.file_name, self.note_body)
    }

    pub fn row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(self.cells.len() + 2);
        row.push(self.index.to_string());
        row.push(self.file_name.clone());
        row.extend(self.cells.iter().cloned());
        row
    }
}

/// Progress event emitted during a run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentProgress {
    pub run_id: Uuid,
    pub stage: String,
    pub message: String,
    /// 1-based paper number, 0 before the first paper.
    pub index: usize,
    pub total: usize,
    pub file_name: Option<String>,
    pub error: Option<String>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentReport {
    pub run_id: Uuid,
    pub strategy: AssessmentStrategy,
    pub model: String,
    /// Banner, mode label, then one entry per paper.
    pub notes: Vec<String>,
    /// Header row first, then one row per paper.
    pub rows: Vec<Vec<String>>,
    pub outcomes: Vec<PaperOutcome>,
    pub usage: TokenUsage,
    pub audit: Vec<LlmAuditEntry>,
    pub duration_ms: u64,
}

impl AssessmentReport {
    fn count(&self, status: PaperStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn assessed(&self) -> usize {
        self.count(PaperStatus::Assessed)
    }

    pub fn partial(&self) -> usize {
        self.count(PaperStatus::Partial)
    }

    pub fn failed(&self) -> usize {
        self.count(PaperStatus::Failed)
    }
}
