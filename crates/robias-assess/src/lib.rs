//! robias-assess — Risk-of-bias assessment engine.
//! - Prompt script loading (intro, output format, ordered criteria)
//! - Structured result schemas for both strategies
//! - Batch engine with per-call retry and per-paper failure isolation
//! - Resume journal
//! - Notes, summary CSV and audit writers

pub mod error;
pub mod journal;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod prompt;
pub mod schema;
pub mod summary;

pub use error::AssessError;
pub use journal::Journal;
pub use models::{
    AssessmentProgress, AssessmentReport, AssessmentStrategy, InputSource, PaperOutcome,
    PaperStatus,
};
pub use output::{run_timestamp, save_outputs, summary_header, SavedOutputs};
pub use pipeline::{run_assessment, AssessmentJob};
pub use prompt::{Criterion, PromptScript};
pub use schema::{AllCriteriaResult, CriterionResult};
pub use summary::split_summary;
