//! Structured results the model is asked to return.

use robias_llm::{OutputSchema, StructuredOutput};
use serde::{Deserialize, Serialize};

/// One call covering every criterion of a paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllCriteriaResult {
    pub title: String,
    pub authors: String,
    pub overall_risk: String,
    /// Explanation per criterion alongside the risk level.
    pub explanation: String,
    /// Comma-separated judgement per criterion, in criterion order.
    pub summary: String,
}

impl StructuredOutput for AllCriteriaResult {
    fn output_schema() -> OutputSchema {
        OutputSchema::strict_object("all_criteria_result", &[
            ("title",        "Title of the paper"),
            ("authors",      "Authors of the paper"),
            ("overall_risk", "Overall risk-of-bias level for the study"),
            ("explanation",  "Explanation for each criterion alongside its risk level"),
            ("summary",      "Comma-separated judgement for each criterion, in the order asked"),
        ])
    }
}

/// One call covering a single criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criteria: String,
    /// Usually `Yes` or `No`.
    pub result: String,
    pub explanation: String,
}

impl StructuredOutput for CriterionResult {
    fn output_schema() -> OutputSchema {
        OutputSchema::strict_object("criterion_result", &[
            ("criteria",    "Name of the criterion assessed"),
            ("result",      "Yes or No"),
            ("explanation", "Evidence from the paper supporting the result"),
        ])
    }
}
