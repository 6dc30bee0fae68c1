//! Output artifacts: notes text, summary CSV and the call audit trail.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::info;

use crate::error::AssessError;
use crate::models::{AssessmentReport, AssessmentStrategy};
use crate::prompt::PromptScript;

/// Used in output and log file names. Avoids `:` so names are valid everywhere.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y_%H-%M-%S";

pub fn run_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// The summary header row: the configured comma-separated header when set,
/// otherwise one derived from the criterion keys.
pub fn summary_header(
    strategy: AssessmentStrategy,
    script: &PromptScript,
    configured: Option<&str>,
) -> Vec<String> {
    if let Some(header) = configured.filter(|h| !h.trim().is_empty()) {
        return header.split(',').map(|h| h.trim().to_string()).collect();
    }

    let mut header = vec!["No".to_string(), "File".to_string()];
    if strategy == AssessmentStrategy::AllCriteria {
        header.push("Title".to_string());
    }
    header.extend(script.criterion_keys().into_iter().map(str::to_string));
    header
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedOutputs {
    pub notes: PathBuf,
    pub summary: PathBuf,
    pub audit: PathBuf,
}

/// Write the three artifacts of `report` into `dir`, creating it if needed.
pub fn save_outputs(dir: &Path, report: &AssessmentReport, timestamp: &str) -> Result<SavedOutputs, AssessError> {
    std::fs::create_dir_all(dir).map_err(|e| AssessError::io(dir, e))?;

    let saved = SavedOutputs {
        notes:   dir.join(format!("assessment_notes_{timestamp}.txt")),
        summary: dir.join(format!("assessment_summary_{timestamp}.csv")),
        audit:   dir.join(format!("assessment_audit_{timestamp}.jsonl")),
    };

    std::fs::write(&saved.notes, report.notes.join("\n")).map_err(|e| AssessError::io(&saved.notes, e))?;
    info!(path = %saved.notes.display(), "Saved assessment notes");

    let file = File::create(&saved.summary).map_err(|e| AssessError::io(&saved.summary, e))?;
    write_summary_csv(file, &report.rows)?;
    info!(path = %saved.summary.display(), rows = report.rows.len(), "Saved assessment summary");

    let file = File::create(&saved.audit).map_err(|e| AssessError::io(&saved.audit, e))?;
    let mut w = BufWriter::new(file);
    for entry in &report.audit {
        serde_json::to_writer(&mut w, entry)?;
        w.write_all(b"\n").map_err(|e| AssessError::io(&saved.audit, e))?;
    }
    w.flush().map_err(|e| AssessError::io(&saved.audit, e))?;
    info!(path = %saved.audit.display(), calls = report.audit.len(), "Saved call audit");

    Ok(saved)
}

/// Rows may differ in length (a model can return more or fewer summary cells).
pub fn write_summary_csv<W: Write>(writer: W, rows: &[Vec<String>]) -> Result<(), AssessError> {
    let mut w = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    for row in rows {
        w.write_record(row)?;
    }
    w.flush().map_err(|e| AssessError::Csv(e.into()))?;
    Ok(())
}
