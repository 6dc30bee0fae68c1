//! Batch assessment engine.
//!
//! Orchestrates one run over an ordered list of papers:
//!   1. Emit progress for the paper
//!   2. Reuse a journaled outcome if the paper was already assessed
//!   3. Load the paper (text or stored-file reference)
//!   4. Call the model, once for all criteria or once per criterion,
//!      each call wrapped in retry with backoff
//!   5. Render the note entry and summary row
//!   6. Journal the outcome and sum token usage
//!
//! A failure never aborts the batch: it is recorded against the paper (or
//! the criterion) and the run continues.

use std::time::{Duration, Instant};

use robias_common::TokenUsage;
use robias_ingestion::{estimate_tokens, load_payload, DocumentPayload, DocumentRef};
use robias_llm::{
    with_retry, InputPart, LlmAuditEntry, LlmBackend, RetryConfig, StructuredOutput,
    StructuredRequest,
};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::AssessError;
use crate::journal::Journal;
use crate::models::{
    AssessmentProgress, AssessmentReport, AssessmentStrategy, InputSource, PaperOutcome,
    PaperStatus,
};
use crate::output::summary_header;
use crate::prompt::PromptScript;
use crate::schema::{AllCriteriaResult, CriterionResult};
use crate::summary::split_summary;

pub const NOTES_BANNER: &str = "\nRisk-of-Bias Assessment Results\n";

/// Summary cell written where a result could not be obtained.
pub const ERROR_CELL: &str = "ERROR";

// ── Job config ────────────────────────────────────────────────────────────────

/// Parameters for a single assessment run.
#[derive(Debug, Clone)]
pub struct AssessmentJob {
    pub strategy: AssessmentStrategy,
    pub input: InputSource,
    pub temperature: Option<f32>,
    /// Slept after every model call to stay under provider rate limits.
    pub call_delay: Duration,
    pub retry: RetryConfig,
    /// Comma-separated header row; derived from the criteria when `None`.
    pub csv_header: Option<String>,
}

impl Default for AssessmentJob {
    fn default() -> Self {
        Self {
            strategy: AssessmentStrategy::AllCriteria,
            input: InputSource::PlainText,
            temperature: None,
            call_delay: Duration::from_millis(500),
            retry: RetryConfig::default(),
            csv_header: None,
        }
    }
}

// ── Run context ───────────────────────────────────────────────────────────────

struct RunContext<'a> {
    job: &'a AssessmentJob,
    script: &'a PromptScript,
    backend: &'a dyn LlmBackend,
    instructions: String,
    audit: Vec<LlmAuditEntry>,
}

impl RunContext<'_> {
    /// One structured call with retry. Every call, successful or not, leaves
    /// an audit entry and is followed by the configured delay.
    async fn call<T: StructuredOutput>(
        &mut self,
        file_name: &str,
        criterion: Option<&str>,
        prompt: &str,
        payload: &DocumentPayload,
    ) -> Result<(T, TokenUsage), AssessError> {
        let request = StructuredRequest {
            instructions: self.instructions.clone(),
            input: user_parts(prompt, payload),
            schema: T::output_schema(),
            model: None,
            temperature: self.job.temperature,
        };

        let estimate = match payload {
            DocumentPayload::Text(text) => estimate_tokens(&self.instructions) + estimate_tokens(prompt) + estimate_tokens(text),
            DocumentPayload::File { .. } => estimate_tokens(&self.instructions) + estimate_tokens(prompt),
        };
        debug!(paper = file_name, criterion, estimated_input_tokens = estimate, "Calling model");

        let backend = self.backend;
        let label = criterion.unwrap_or(file_name);
        let t0 = Instant::now();
        let result = with_retry(&self.job.retry, label, || {
            let req = request.clone();
            async move {
                let resp = backend.complete_structured(req).await?;
                let parsed = T::from_response(&resp)?;
                Ok((parsed, resp))
            }
        })
        .await;
        let latency_ms = t0.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(done) => {
                let (parsed, resp) = done.value;
                debug!(paper = file_name, criterion, attempts = done.attempts, tokens = %resp.usage, "Model call succeeded");
                self.audit.push(LlmAuditEntry::success(
                    file_name,
                    criterion,
                    &resp.model,
                    resp.usage,
                    &resp.raw_text,
                    done.attempts,
                    latency_ms,
                ));
                Ok((parsed, resp.usage))
            }
            Err(failure) => {
                self.audit.push(LlmAuditEntry::failure(
                    file_name,
                    criterion,
                    backend.model_id(),
                    &failure.to_string(),
                    failure.attempts,
                    latency_ms,
                ));
                Err(AssessError::from(failure))
            }
        };

        if !self.job.call_delay.is_zero() {
            tokio::time::sleep(self.job.call_delay).await;
        }
        outcome
    }

    async fn assess_paper(&mut self, index: usize, doc: &DocumentRef) -> PaperOutcome {
        let mut outcome = PaperOutcome {
            index,
            file_name: doc.file_name.clone(),
            strategy: self.job.strategy,
            status: PaperStatus::Assessed,
            note_body: String::new(),
            cells: Vec::new(),
            usage: TokenUsage::default(),
            error: None,
        };

        let result = match self.load(doc).await {
            Ok(payload) => match self.job.strategy {
                AssessmentStrategy::AllCriteria  => self.all_criteria(doc, &payload, &mut outcome).await,
                AssessmentStrategy::PerCriterion => {
                    self.per_criterion(doc, &payload, &mut outcome).await;
                    Ok(())
                }
            },
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(paper = %doc.file_name, error = %e, "Paper failed");
            outcome.status = PaperStatus::Failed;
            outcome.note_body = format!("\nError: {e}. Error processing {}\n", doc.file_name);
            outcome.cells = vec![ERROR_CELL.to_string()];
            outcome.error = Some(e.to_string());
        }
        outcome
    }

    async fn load(&self, doc: &DocumentRef) -> Result<DocumentPayload, AssessError> {
        let payload = load_payload(doc).await?;
        if matches!(payload, DocumentPayload::File { .. }) && !self.backend.supports_file_input() {
            return Err(AssessError::FileInputUnsupported { model: self.backend.model_id().to_string() });
        }
        Ok(payload)
    }

    async fn all_criteria(
        &mut self,
        doc: &DocumentRef,
        payload: &DocumentPayload,
        outcome: &mut PaperOutcome,
    ) -> Result<(), AssessError> {
        let body = self.script.combined_body();
        let (r, usage): (AllCriteriaResult, _) = self.call(&doc.file_name, None, &body, payload).await?;

        outcome.usage += usage;
        outcome.note_body = format!("\n{}\n{}\n{}\n{}", r.title, r.authors, r.overall_risk, r.explanation);
        outcome.cells.push(r.title);
        outcome.cells.extend(split_summary(&r.summary));
        Ok(())
    }

    async fn per_criterion(&mut self, doc: &DocumentRef, payload: &DocumentPayload, outcome: &mut PaperOutcome) {
        let script = self.script;
        let mut failed = 0;

        for criterion in &script.criteria {
            let res: Result<(CriterionResult, _), _> =
                self.call(&doc.file_name, Some(&criterion.key), &criterion.prompt, payload).await;
            match res {
                Ok((r, usage)) => {
                    outcome.usage += usage;
                    outcome.note_body.push_str(&format!("\n{} = {}\n\n{}\n", r.criteria, r.result, r.explanation));
                    outcome.cells.push(r.result.trim().to_string());
                }
                Err(e) => {
                    warn!(paper = %doc.file_name, criterion = %criterion.key, error = %e, "Criterion failed");
                    failed += 1;
                    outcome.note_body.push_str(&format!(
                        "\nError: {e}. Error processing {} ({})\n",
                        doc.file_name, criterion.key
                    ));
                    outcome.cells.push(ERROR_CELL.to_string());
                    outcome.error = Some(e.to_string());
                }
            }
        }

        outcome.status = match failed {
            0 => PaperStatus::Assessed,
            n if n == script.criteria.len() => PaperStatus::Failed,
            _ => PaperStatus::Partial,
        };
    }
}

/// User turn for one call: the prompt followed by the paper text, or the
/// prompt followed by a stored-file reference.
fn user_parts(prompt: &str, payload: &DocumentPayload) -> Vec<InputPart> {
    match payload {
        DocumentPayload::Text(text) => vec![
            InputPart::text(format!("{prompt}\n")),
            InputPart::text(format!("\nHere is the paper:\n{text}")),
        ],
        DocumentPayload::File { file_id } => vec![InputPart::text(prompt), InputPart::file(file_id.clone())],
    }
}

// ── Pipeline orchestrator ─────────────────────────────────────────────────────

/// Runs one assessment batch over `docs`, in order.
///
/// Progress events are sent via `progress_tx` if provided. When a journal is
/// given, papers it already holds are reused and every new outcome is
/// appended to it.
#[instrument(skip_all, fields(strategy = job.strategy.as_str(), papers = docs.len(), model = backend.model_id()))]
pub async fn run_assessment(
    job: &AssessmentJob,
    script: &PromptScript,
    docs: &[DocumentRef],
    backend: &dyn LlmBackend,
    mut journal: Option<&mut Journal>,
    progress_tx: Option<broadcast::Sender<AssessmentProgress>>,
) -> AssessmentReport {
    let run_id = Uuid::new_v4();
    let t0 = Instant::now();
    let total = docs.len();
    info!(run_id = %run_id, "Starting assessment run");

    let emit = |stage: &str, message: String, index: usize, file_name: Option<&str>, error: Option<String>| {
        if let Some(ref tx) = progress_tx {
            let _ = tx.send(AssessmentProgress {
                run_id,
                stage: stage.to_string(),
                message,
                index,
                total,
                file_name: file_name.map(str::to_string),
                error,
            });
        }
    };

    let mut ctx = RunContext {
        job,
        script,
        backend,
        instructions: script.instructions(),
        audit: Vec::new(),
    };

    let mut notes = vec![NOTES_BANNER.to_string(), job.input.mode_label().to_string()];
    let mut rows = vec![summary_header(job.strategy, script, job.csv_header.as_deref())];
    let mut outcomes = Vec::with_capacity(total);
    let mut usage = TokenUsage::default();

    for (i, doc) in docs.iter().enumerate() {
        let index = i + 1;
        let message = format!(
            "Processing {}: File {index}/{total}. Filename: {}",
            job.input.item_label(),
            doc.file_name
        );
        info!("{}", &message);
        emit("processing", message, index, Some(&doc.file_name), None);

        if let Some(prev) = journal.as_deref().and_then(|j| j.lookup(&doc.file_name)) {
            info!(paper = %doc.file_name, "Reusing journaled outcome");
            let mut reused = prev.clone();
            reused.index = index;
            emit("reused", format!("Reused {}", doc.file_name), index, Some(&doc.file_name), None);
            notes.push(reused.note_entry());
            rows.push(reused.row());
            outcomes.push(reused);
            continue;
        }

        let outcome = ctx.assess_paper(index, doc).await;
        info!(paper = %doc.file_name, status = ?outcome.status, tokens = %outcome.usage, "Paper finished");

        if let Some(j) = journal.as_deref_mut() {
            if let Err(e) = j.record(&outcome) {
                warn!(path = %j.path().display(), error = %e, "Could not write journal entry");
            }
        }

        let stage = match outcome.status {
            PaperStatus::Assessed => "assessed",
            PaperStatus::Partial  => "partial",
            PaperStatus::Failed   => "failed",
        };
        emit(stage, format!("{} {stage}", doc.file_name), index, Some(&doc.file_name), outcome.error.clone());

        usage += outcome.usage;
        notes.push(outcome.note_entry());
        rows.push(outcome.row());
        outcomes.push(outcome);
    }

    let report = AssessmentReport {
        run_id,
        strategy: job.strategy,
        model: backend.model_id().to_string(),
        notes,
        rows,
        outcomes,
        usage,
        audit: ctx.audit,
        duration_ms: t0.elapsed().as_millis() as u64,
    };

    info!(
        run_id = %run_id,
        assessed = report.assessed(),
        partial = report.partial(),
        failed = report.failed(),
        tokens = %report.usage,
        duration_ms = report.duration_ms,
        "Processed {total} papers"
    );
    emit("done", format!("Processed {total} papers. Consumed {}", report.usage), total, None, None);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use robias_llm::{LlmError, StructuredResponse};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    /// Replies from a fixed script, in order, and records every request.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<serde_json::Value, LlmError>>>,
        requests: Mutex<Vec<StructuredRequest>>,
        files: bool,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<serde_json::Value, LlmError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), requests: Mutex::new(Vec::new()), files: true }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn complete_structured(&self, req: StructuredRequest) -> Result<StructuredResponse, LlmError> {
            self.requests.lock().unwrap().push(req);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".into())));
            reply.map(|value| StructuredResponse {
                raw_text: value.to_string(),
                value,
                model: "scripted".into(),
                usage: TokenUsage::new(100, 20),
            })
        }
        fn model_id(&self) -> &str { "scripted" }
        fn is_local(&self) -> bool { true }
        fn supports_file_input(&self) -> bool { self.files }
    }

    fn script() -> PromptScript {
        PromptScript::from_yaml_str(
            "Intro: You are a reviewer.\nOutputFormat: Use JSON.\nCriteria:\n  Sequence: Random sequence?\n  Blinding: Assessors blinded?\n",
        )
        .unwrap()
    }

    fn job(strategy: AssessmentStrategy) -> AssessmentJob {
        AssessmentJob {
            strategy,
            call_delay: Duration::ZERO,
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                multiplier: 2.0,
            },
            ..AssessmentJob::default()
        }
    }

    fn paper(dir: &Path, name: &str, text: &str) -> DocumentRef {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        DocumentRef::plain_text(path)
    }

    fn all_result(title: &str, summary: &str) -> Result<serde_json::Value, LlmError> {
        Ok(serde_json::json!({
            "title": title,
            "authors": "Smith J",
            "overall_risk": "Low",
            "explanation": "Adequate.",
            "summary": summary,
        }))
    }

    fn criterion(name: &str, result: &str) -> Result<serde_json::Value, LlmError> {
        Ok(serde_json::json!({"criteria": name, "result": result, "explanation": "Stated in methods."}))
    }

    #[tokio::test]
    async fn test_all_criteria_text_batch() {
        let dir = tempfile::tempdir().unwrap();
        let docs = vec![paper(dir.path(), "a.md", "Paper A"), paper(dir.path(), "b.md", "Paper B")];
        let backend = ScriptedBackend::new(vec![
            all_result("Trial A", "Low, High,"),
            all_result("Trial B", "Low,Low"),
        ]);

        let report = run_assessment(&job(AssessmentStrategy::AllCriteria), &script(), &docs, &backend, None, None).await;

        assert_eq!(report.rows, vec![
            vec!["No", "File", "Title", "Sequence", "Blinding"],
            vec!["1", "a.md", "Trial A", "Low", "High"],
            vec!["2", "b.md", "Trial B", "Low", "Low"],
        ]);
        assert_eq!(report.notes[0], NOTES_BANNER);
        assert_eq!(report.notes[1], "Assessing Plain Files Locally.");
        assert_eq!(report.notes[2], "\n=== Paper 1: a.md ===\n\nTrial A\nSmith J\nLow\nAdequate.");
        assert_eq!(report.assessed(), 2);
        assert_eq!(report.usage, TokenUsage::new(200, 40));
        assert_eq!(report.audit.len(), 2);

        let reqs = backend.requests.lock().unwrap();
        assert_eq!(reqs[0].instructions, "You are a reviewer.\nUse JSON.");
        assert_eq!(reqs[0].input, vec![
            InputPart::text("Random sequence?\nAssessors blinded?\n"),
            InputPart::text("\nHere is the paper:\nPaper A"),
        ]);
        assert_eq!(reqs[0].schema.name, "all_criteria_result");
    }

    #[tokio::test]
    async fn test_per_criterion_failure_keeps_columns_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let docs = vec![paper(dir.path(), "a.md", "Paper A")];
        let backend = ScriptedBackend::new(vec![
            criterion("Sequence", "Yes"),
            Err(LlmError::ApiError { status: 400, message: "bad request".into() }),
        ]);

        let report = run_assessment(&job(AssessmentStrategy::PerCriterion), &script(), &docs, &backend, None, None).await;

        assert_eq!(report.rows[1], vec!["1", "a.md", "Yes", ERROR_CELL]);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, PaperStatus::Partial);
        assert!(outcome.note_body.starts_with("\nSequence = Yes\n\nStated in methods.\n"));
        assert!(outcome.note_body.contains("Error processing a.md (Blinding)"));
        // Non-retryable: one call per criterion.
        assert_eq!(backend.calls(), 2);
        assert!(report.audit[1].error.is_some());
    }

    #[tokio::test]
    async fn test_per_criterion_all_failed_marks_paper_failed() {
        let dir = tempfile::tempdir().unwrap();
        let docs = vec![paper(dir.path(), "a.md", "Paper A"), paper(dir.path(), "b.md", "Paper B")];
        let backend = ScriptedBackend::new(vec![
            Err(LlmError::Refused("no".into())),
            Err(LlmError::Refused("no".into())),
            criterion("Sequence", "No"),
            criterion("Blinding", "Yes"),
        ]);

        let report = run_assessment(&job(AssessmentStrategy::PerCriterion), &script(), &docs, &backend, None, None).await;

        assert_eq!(report.outcomes[0].status, PaperStatus::Failed);
        assert_eq!(report.rows[1], vec!["1", "a.md", ERROR_CELL, ERROR_CELL]);
        assert_eq!(report.rows[2], vec!["2", "b.md", "No", "Yes"]);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.assessed(), 1);
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test]
    async fn test_unreadable_paper_does_not_stop_batch() {
        let dir = tempfile::tempdir().unwrap();
        let missing = DocumentRef::plain_text(dir.path().join("gone.md"));
        let docs = vec![missing, paper(dir.path(), "b.md", "Paper B")];
        let backend = ScriptedBackend::new(vec![all_result("Trial B", "Low,Low")]);

        let report = run_assessment(&job(AssessmentStrategy::AllCriteria), &script(), &docs, &backend, None, None).await;

        assert_eq!(report.rows[1], vec!["1", "gone.md", ERROR_CELL]);
        assert_eq!(report.rows[2][2], "Trial B");
        assert_eq!(report.failed(), 1);
        assert_eq!(report.assessed(), 1);
        assert!(report.notes[2].contains("Error processing gone.md"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let docs = vec![paper(dir.path(), "a.md", "Paper A")];
        let backend = ScriptedBackend::new(vec![
            Err(LlmError::RateLimitExceeded { retry_after: Some(Duration::from_millis(1)) }),
            Ok(serde_json::json!({"title": "missing fields"})),
            all_result("Trial A", "Low,Low"),
        ]);

        let report = run_assessment(&job(AssessmentStrategy::AllCriteria), &script(), &docs, &backend, None, None).await;

        assert_eq!(report.assessed(), 1);
        assert_eq!(report.audit[0].attempts, 3);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_stored_file_needs_file_capable_backend() {
        let mut backend = ScriptedBackend::new(vec![]);
        backend.files = false;
        let docs = vec![DocumentRef::stored("a.pdf", "file-1")];
        let mut j = job(AssessmentStrategy::AllCriteria);
        j.input = InputSource::Stored;

        let report = run_assessment(&j, &script(), &docs, &backend, None, None).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(backend.calls(), 0);
        assert_eq!(report.notes[1], "Assessing PDFs Stored in Cloud.");
    }

    #[tokio::test]
    async fn test_stored_file_parts() {
        let backend = ScriptedBackend::new(vec![criterion("Sequence", "No"), criterion("Blinding", "Yes")]);
        let docs = vec![DocumentRef::stored("a.pdf", "file-1")];

        let report = run_assessment(&job(AssessmentStrategy::PerCriterion), &script(), &docs, &backend, None, None).await;

        assert_eq!(report.rows, vec![
            vec!["No", "File", "Sequence", "Blinding"],
            vec!["1", "a.pdf", "No", "Yes"],
        ]);
        let reqs = backend.requests.lock().unwrap();
        assert_eq!(reqs[1].input, vec![InputPart::text("Assessors blinded?"), InputPart::file("file-1")]);
    }

    #[tokio::test]
    async fn test_journal_resume_skips_assessed_papers() {
        let dir = tempfile::tempdir().unwrap();
        let journal_path = dir.path().join("journal.jsonl");
        let docs = vec![paper(dir.path(), "a.md", "Paper A"), paper(dir.path(), "b.md", "Paper B")];

        {
            let backend = ScriptedBackend::new(vec![
                all_result("Trial A", "Low,Low"),
                Err(LlmError::Refused("no".into())),
            ]);
            let mut journal = Journal::open(&journal_path, AssessmentStrategy::AllCriteria).unwrap();
            let first = run_assessment(&job(AssessmentStrategy::AllCriteria), &script(), &docs, &backend, Some(&mut journal), None).await;
            assert_eq!(first.failed(), 1);
        }

        let backend = ScriptedBackend::new(vec![all_result("Trial B", "High,Low")]);
        let mut journal = Journal::open(&journal_path, AssessmentStrategy::AllCriteria).unwrap();
        let second = run_assessment(&job(AssessmentStrategy::AllCriteria), &script(), &docs, &backend, Some(&mut journal), None).await;

        assert_eq!(backend.calls(), 1);
        assert_eq!(second.assessed(), 2);
        assert_eq!(second.rows[1], vec!["1", "a.md", "Trial A", "Low", "Low"]);
        assert_eq!(second.rows[2], vec!["2", "b.md", "Trial B", "High", "Low"]);
        // Reused papers carry no new usage.
        assert_eq!(second.usage, TokenUsage::new(100, 20));
    }

    #[tokio::test]
    async fn test_progress_events() {
        let dir = tempfile::tempdir().unwrap();
        let docs = vec![paper(dir.path(), "a.md", "Paper A")];
        let backend = ScriptedBackend::new(vec![all_result("Trial A", "Low,Low")]);
        let (tx, mut rx) = broadcast::channel(16);

        run_assessment(&job(AssessmentStrategy::AllCriteria), &script(), &docs, &backend, None, Some(tx)).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message, "Processing plain text: File 1/1. Filename: a.md");
        assert_eq!(rx.recv().await.unwrap().stage, "assessed");
        assert_eq!(rx.recv().await.unwrap().stage, "done");
    }
}
