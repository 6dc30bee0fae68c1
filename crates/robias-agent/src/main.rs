//! robias — batch risk-of-bias assessment of papers with an LLM.
//! Entry point for the command-line binary.

mod config;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use robias_assess::{
    run_assessment, run_timestamp, save_outputs, AssessmentJob, AssessmentProgress,
    AssessmentStrategy, InputSource, Journal, PromptScript,
};
use robias_common::SandboxClient;
use robias_ingestion::{
    discover_pdfs, discover_plain_text, discover_stored, estimate_tokens, upload_pdf_folder,
};
use robias_llm::{delete_all, FileStore, LlmBackend, OpenAiBackend, OpenAiCompatibleBackend, OpenAiFileStore};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, API_KEY_ENV};

// ── Command line ──────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "robias")]
#[command(about = "Risk-of-bias assessment of papers with a large language model")]
#[command(version)]
struct Cli {
    /// Path to robias.toml
    #[arg(long, env = "ROBIAS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assess every paper from one input source
    Assess {
        #[arg(long, value_enum, default_value_t = StrategyArg::All)]
        strategy: StrategyArg,

        #[arg(long, value_enum, default_value_t = InputArg::Text)]
        input: InputArg,

        /// Journal file; papers already assessed in it are reused
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Log progress instead of drawing a progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Manage PDFs in the provider file store
    Files {
        #[command(subcommand)]
        action: FilesCommand,
    },
    /// Validate the prompt script and show its criteria
    Prompt,
}

#[derive(Subcommand)]
enum FilesCommand {
    /// Upload every PDF in the PDF input folder
    Upload,
    /// Print how many files are stored
    Count,
    /// List stored files
    List,
    /// Delete every stored file
    Delete {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// One call per paper covering every criterion
    All,
    /// One call per criterion
    Per,
}

#[derive(Clone, Copy, ValueEnum)]
enum InputArg {
    /// Markdown or plain-text papers, read locally
    Text,
    /// PDFs on disk, text extracted locally
    Pdf,
    /// PDFs already uploaded to the provider file store
    Stored,
}

impl From<StrategyArg> for AssessmentStrategy {
    fn from(s: StrategyArg) -> Self {
        match s {
            StrategyArg::All => AssessmentStrategy::AllCriteria,
            StrategyArg::Per => AssessmentStrategy::PerCriterion,
        }
    }
}

impl From<InputArg> for InputSource {
    fn from(i: InputArg) -> Self {
        match i {
            InputArg::Text   => InputSource::PlainText,
            InputArg::Pdf    => InputSource::LocalPdf,
            InputArg::Stored => InputSource::Stored,
        }
    }
}

// ── Setup ─────────────────────────────────────────────────────────────────────

/// Structured logging to stderr plus a plain-text file in `log_dir`.
/// Returns the log file path.
fn init_logging(log_dir: &Path, timestamp: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(log_dir).with_context(|| format!("creating {}", log_dir.display()))?;
    let log_path = log_dir.join(format!("robias_{timestamp}.log"));
    let log_file = File::create(&log_path).with_context(|| format!("creating {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("robias=info,info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();

    Ok(log_path)
}

fn build_client(config: &Config) -> anyhow::Result<SandboxClient> {
    let mut client = SandboxClient::new(config.llm.timeout())?;
    if let Some(ref url) = config.llm.base_url {
        client.allow_url(url)?;
    }
    Ok(client)
}

fn build_backend(config: &Config) -> anyhow::Result<Box<dyn LlmBackend>> {
    let client = build_client(config)?;
    let llm = &config.llm;

    match llm.provider.as_str() {
        "openai" => {
            let key = llm
                .resolve_api_key()
                .with_context(|| format!("No API key found (set llm.api_key or {API_KEY_ENV})"))?;
            let mut backend = OpenAiBackend::new(key, &llm.model, client);
            if let Some(ref url) = llm.base_url {
                backend = backend.with_base_url(url);
            }
            Ok(Box::new(backend))
        }
        "openai_compatible" => {
            let url = llm
                .base_url
                .as_deref()
                .context("llm.base_url is required for the openai_compatible provider")?;
            Ok(Box::new(OpenAiCompatibleBackend::new(url, &llm.model, llm.resolve_api_key(), client)))
        }
        other => anyhow::bail!("Unknown llm.provider {other:?} (expected openai or openai_compatible)"),
    }
}

fn build_file_store(config: &Config) -> anyhow::Result<OpenAiFileStore> {
    let key = config
        .llm
        .resolve_api_key()
        .with_context(|| format!("The file store needs an API key (set llm.api_key or {API_KEY_ENV})"))?;
    let mut store = OpenAiFileStore::new(key, build_client(config)?);
    if config.llm.provider == "openai" {
        if let Some(ref url) = config.llm.base_url {
            store = store.with_base_url(url);
        }
    }
    Ok(store)
}

fn load_prompt(config: &Config) -> anyhow::Result<PromptScript> {
    let path = &config.paths.prompt_file;
    PromptScript::load(path).with_context(|| format!("loading prompt script {}", path.display()))
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn assess(
    config: &Config,
    strategy: AssessmentStrategy,
    input: InputSource,
    resume: Option<PathBuf>,
    show_progress: bool,
    timestamp: &str,
) -> anyhow::Result<()> {
    let script = load_prompt(config)?;
    let backend = build_backend(config)?;

    let docs = match input {
        InputSource::PlainText => discover_plain_text(&config.paths.plain_text_input_dir)?,
        InputSource::LocalPdf  => discover_pdfs(&config.paths.pdf_input_dir)?,
        InputSource::Stored    => discover_stored(&build_file_store(config)?).await?,
    };
    if docs.is_empty() {
        warn!("No papers found for {:?} input, writing empty outputs", input);
    }

    let mut journal = match resume {
        Some(ref path) => Some(Journal::open(path, strategy)?),
        None => None,
    };

    let job = AssessmentJob {
        strategy,
        input,
        temperature: config.llm.temperature,
        call_delay: Duration::from_millis(config.assessment.call_delay_ms),
        retry: config.retry.to_retry_config(),
        csv_header: config.assessment.csv_header.clone(),
    };

    info!(
        strategy = strategy.as_str(),
        model = backend.model_id(),
        papers = docs.len(),
        criteria = script.criteria.len(),
        "Starting assessment"
    );

    let (tx, rx) = broadcast::channel::<AssessmentProgress>(64);
    let progress = tokio::spawn(render_progress(rx, docs.len() as u64, show_progress));

    let report = run_assessment(&job, &script, &docs, backend.as_ref(), journal.as_mut(), Some(tx)).await;
    if let Err(e) = progress.await {
        warn!(error = %e, "Progress display stopped");
    }

    let saved = save_outputs(&config.paths.output_dir, &report, timestamp)?;

    println!(
        "Processed {} papers: {} assessed, {} partial, {} failed.",
        report.outcomes.len(),
        report.assessed(),
        report.partial(),
        report.failed()
    );
    println!("Consumed {} for {} papers.", report.usage, report.outcomes.len());
    println!("Notes:   {}", saved.notes.display());
    println!("Summary: {}", saved.summary.display());
    println!("Audit:   {}", saved.audit.display());
    Ok(())
}

/// Draw the progress bar until the run drops its sender.
async fn render_progress(mut rx: broadcast::Receiver<AssessmentProgress>, total: u64, show: bool) {
    let bar = if show {
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar
    } else {
        ProgressBar::hidden()
    };

    loop {
        match rx.recv().await {
            Ok(event) => match event.stage.as_str() {
                "processing" => bar.set_message(event.file_name.unwrap_or_default()),
                "done"       => bar.finish_with_message(event.message),
                _            => bar.set_position(event.index as u64),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Progress display fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn files(config: &Config, action: FilesCommand) -> anyhow::Result<()> {
    let store = build_file_store(config)?;

    match action {
        FilesCommand::Upload => {
            let delay = Duration::from_millis(config.assessment.upload_delay_ms);
            let report = upload_pdf_folder(&store, &config.paths.pdf_input_dir, delay).await?;
            println!(
                "Uploaded {} files ({} skipped, {} failed).",
                report.uploaded.len(),
                report.skipped.len(),
                report.errors.len()
            );
            for err in &report.errors {
                println!("  {err}");
            }
        }
        FilesCommand::Count => {
            println!("{} files stored.", store.count().await?);
        }
        FilesCommand::List => {
            let mut files = store.list().await?;
            files.sort_by(|a, b| a.filename.cmp(&b.filename));
            for f in &files {
                println!("{}\t{}\t{} bytes", f.id, f.filename, f.bytes);
            }
            println!("{} files stored.", files.len());
        }
        FilesCommand::Delete { yes } => {
            if !yes {
                let n = store.count().await?;
                println!("This would delete {n} stored files. Re-run with --yes to confirm.");
                return Ok(());
            }
            let report = delete_all(&store).await?;
            println!("Deleted {} files ({} failed).", report.deleted.len(), report.errors.len());
        }
    }
    Ok(())
}

fn prompt(config: &Config) -> anyhow::Result<()> {
    let script = load_prompt(config)?;
    println!("Prompt script {} is valid.", config.paths.prompt_file.display());
    println!("{} criteria:", script.criteria.len());
    for c in &script.criteria {
        println!("  {:<24} ~{} tokens", c.key, estimate_tokens(&c.prompt));
    }
    let instructions = estimate_tokens(&script.instructions());
    let body = estimate_tokens(&script.combined_body());
    println!("Instructions: ~{instructions} tokens");
    println!("All-criteria prompt: ~{} tokens before the paper", instructions + body);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let timestamp = run_timestamp();
    let log_path = init_logging(&config.paths.log_dir, &timestamp)?;

    info!("robias {} starting up", env!("CARGO_PKG_VERSION"));
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        log = %log_path.display(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Assess { strategy, input, resume, no_progress } => {
            assess(&config, strategy.into(), input.into(), resume, !no_progress, &timestamp).await
        }
        Command::Files { action } => files(&config, action).await,
        Command::Prompt => prompt(&config),
    }
}
