//! End-to-end assessment runs: prompt script from disk, papers from disk,
//! outputs written to a temp folder.
//!
//! The scripted-backend tests run offline. The live test needs an API key:
//! ```bash
//! ROBIAS_OPENAI_API_KEY=sk-... cargo test --package robias-assess --test test_assessment_e2e -- --ignored --nocapture
//! ```

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use robias_assess::{
    run_assessment, save_outputs, AssessmentJob, AssessmentStrategy, InputSource, PromptScript,
};
use robias_common::{SandboxClient, TokenUsage};
use robias_ingestion::discover_plain_text;
use robias_llm::{LlmBackend, LlmError, OpenAiBackend, RetryConfig, StructuredRequest, StructuredResponse};
use secrecy::SecretString;

fn example_prompt() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../prompt.example.yaml")
}

/// Answers "Yes" to every criterion it is asked about.
struct AlwaysYes {
    calls: Mutex<u32>,
}

#[async_trait]
impl LlmBackend for AlwaysYes {
    async fn complete_structured(&self, req: StructuredRequest) -> Result<StructuredResponse, LlmError> {
        *self.calls.lock().unwrap() += 1;
        let value = serde_json::json!({
            "criteria": req.schema.name,
            "result": "Yes",
            "explanation": "Reported in the methods section.",
        });
        Ok(StructuredResponse {
            raw_text: value.to_string(),
            value,
            model: "always-yes".into(),
            usage: TokenUsage::new(50, 10),
        })
    }
    fn model_id(&self) -> &str { "always-yes" }
    fn is_local(&self) -> bool { true }
    fn supports_file_input(&self) -> bool { false }
}

#[tokio::test]
async fn test_per_criterion_run_writes_outputs() {
    let script = PromptScript::load(&example_prompt()).unwrap();
    let criteria = script.criteria.len();

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("text");
    std::fs::create_dir(&input).unwrap();
    std::fs::write(input.join("jones2019.md"), "Participants were randomised by computer.").unwrap();
    std::fs::write(input.join("adams2018.md"), "Allocation used sealed envelopes.").unwrap();

    let docs = discover_plain_text(&input).unwrap();
    let backend = AlwaysYes { calls: Mutex::new(0) };
    let job = AssessmentJob {
        strategy: AssessmentStrategy::PerCriterion,
        input: InputSource::PlainText,
        call_delay: Duration::ZERO,
        retry: RetryConfig::none(),
        ..AssessmentJob::default()
    };

    let report = run_assessment(&job, &script, &docs, &backend, None, None).await;
    assert_eq!(*backend.calls.lock().unwrap() as usize, 2 * criteria);
    assert_eq!(report.assessed(), 2);
    assert_eq!(report.usage, TokenUsage::new(100 * criteria as u64, 20 * criteria as u64));

    let out = dir.path().join("output");
    let saved = save_outputs(&out, &report, "02-03-2026_09-30-00").unwrap();

    let csv = std::fs::read_to_string(&saved.summary).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("No,File,RandomSequence,"));
    assert!(lines[1].starts_with("1,adams2018.md,Yes,"));
    assert_eq!(lines[2].split(',').count(), 2 + criteria);

    let notes = std::fs::read_to_string(&saved.notes).unwrap();
    assert!(notes.contains("Assessing Plain Files Locally."));
    assert!(notes.contains("=== Paper 2: jones2019.md ==="));

    let audit = std::fs::read_to_string(&saved.audit).unwrap();
    assert_eq!(audit.lines().count(), 2 * criteria);
}

#[tokio::test]
async fn test_empty_folder_still_writes_notes_and_summary() {
    let script = PromptScript::load(&example_prompt()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("text");
    std::fs::create_dir(&input).unwrap();

    let docs = discover_plain_text(&input).unwrap();
    assert!(docs.is_empty());
    let backend = AlwaysYes { calls: Mutex::new(0) };
    let job = AssessmentJob { call_delay: Duration::ZERO, ..AssessmentJob::default() };

    let report = run_assessment(&job, &script, &docs, &backend, None, None).await;
    assert_eq!(*backend.calls.lock().unwrap(), 0);
    assert!(report.usage.is_zero());

    let saved = save_outputs(&dir.path().join("output"), &report, "02-03-2026_09-30-00").unwrap();
    let csv = std::fs::read_to_string(&saved.summary).unwrap();
    assert_eq!(csv.lines().count(), 1);
    assert!(csv.starts_with("No,File,Title,RandomSequence,"));
    let notes = std::fs::read_to_string(&saved.notes).unwrap();
    assert!(notes.contains("Assessing Plain Files Locally."));
    assert!(!notes.contains("=== Paper"));
}

#[tokio::test]
#[ignore] // Requires network access and an API key
async fn test_live_all_criteria_single_paper() {
    let key = std::env::var("ROBIAS_OPENAI_API_KEY").expect("ROBIAS_OPENAI_API_KEY not set");
    let client = SandboxClient::new(Duration::from_secs(120)).unwrap();
    let backend = OpenAiBackend::new(SecretString::from(key), "gpt-4o-mini", client);
    let script = PromptScript::load(&example_prompt()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("trial.md"),
        "# Effect of daily aspirin on headache frequency\n\
         Smith J, Lee K\n\
         Methods: 200 adults were randomised using a computer-generated sequence held by an \
         independent pharmacist. Participants and assessors were blinded. Two participants \
         withdrew; analysis was by intention to treat. All prespecified outcomes are reported.",
    )
    .unwrap();
    let docs = discover_plain_text(dir.path()).unwrap();

    let job = AssessmentJob { temperature: Some(0.0), ..AssessmentJob::default() };
    let report = run_assessment(&job, &script, &docs, &backend, None, None).await;

    for note in &report.notes {
        println!("{note}");
    }
    println!("{:?}", report.rows);
    assert_eq!(report.assessed(), 1);
    assert!(!report.usage.is_zero());
}
