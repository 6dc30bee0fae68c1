//! Resume journal.
//!
//! A JSON-lines file with one [`PaperOutcome`] per line, appended as each
//! paper finishes. Re-running a batch with the same journal skips papers
//! already assessed under the same strategy. Partial and failed papers are
//! run again.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::AssessError;
use crate::models::{AssessmentStrategy, PaperOutcome, PaperStatus};

pub struct Journal {
    path: PathBuf,
    strategy: AssessmentStrategy,
    completed: HashMap<String, PaperOutcome>,
    file: File,
}

impl Journal {
    /// Open (or create) the journal at `path` and load the papers already
    /// assessed with `strategy`.
    pub fn open(path: &Path, strategy: AssessmentStrategy) -> Result<Self, AssessError> {
        let mut completed = HashMap::new();

        let mut needs_newline = false;

        if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| AssessError::io(path, e))?;
            needs_newline = !text.is_empty() && !text.ends_with('\n');
            for (n, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<PaperOutcome>(line) {
                    Ok(outcome) if outcome.strategy == strategy && outcome.status == PaperStatus::Assessed => {
                        completed.insert(outcome.file_name.clone(), outcome);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(path = %path.display(), line = n + 1, error = %e, "Skipping unreadable journal line"),
                }
            }
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AssessError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| AssessError::io(path, e))?;

        // Keep the next record off a truncated line.
        if needs_newline {
            file.write_all(b"\n").map_err(|e| AssessError::io(path, e))?;
        }

        info!(
            path = %path.display(),
            strategy = strategy.as_str(),
            reusable = completed.len(),
            "Journal opened"
        );
        Ok(Self { path: path.to_path_buf(), strategy, completed, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reusable(&self) -> usize {
        self.completed.len()
    }

    /// A previously assessed outcome for `file_name`, if any.
    pub fn lookup(&self, file_name: &str) -> Option<&PaperOutcome> {
        self.completed.get(file_name)
    }

    pub fn record(&mut self, outcome: &PaperOutcome) -> Result<(), AssessError> {
        let mut line = serde_json::to_string(outcome)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|e| AssessError::io(&self.path, e))?;

        if outcome.strategy == self.strategy && outcome.status == PaperStatus::Assessed {
            self.completed.insert(outcome.file_name.clone(), outcome.clone());
        }
        Ok(())
    }
}
