//! Configuration loading for robias.
//! Reads robias.toml from the current directory, the `--config` path, or the
//! path in the ROBIAS_CONFIG env var.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use robias_llm::RetryConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub const API_KEY_ENV: &str = "ROBIAS_OPENAI_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub assessment: AssessmentConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `openai` or `openai_compatible`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Omitted from requests when unset.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Server root without `/v1`. Required for `openai_compatible`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider()     -> String { "openai".to_string() }
fn default_model()        -> String { "gpt-4o".to_string() }
fn default_timeout_secs() -> u64    { 120 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: None,
            base_url: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl LlmConfig {
    /// `llm.api_key` if set and non-empty, otherwise ROBIAS_OPENAI_API_KEY.
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
            .map(SecretString::from)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts()       -> u32 { 5 }
fn default_initial_backoff_ms() -> u64 { 1_000 }
fn default_max_backoff_ms()     -> u64 { 60_000 }
fn default_multiplier()         -> f64 { 2.0 }

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentConfig {
    /// Pause after every model call.
    #[serde(default = "default_call_delay_ms")]
    pub call_delay_ms: u64,
    /// Pause between file uploads.
    #[serde(default = "default_upload_delay_ms")]
    pub upload_delay_ms: u64,
    /// Comma-separated summary header; derived from the criteria when unset.
    #[serde(default)]
    pub csv_header: Option<String>,
}

fn default_call_delay_ms()   -> u64 { 500 }
fn default_upload_delay_ms() -> u64 { 1_000 }

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            call_delay_ms: default_call_delay_ms(),
            upload_delay_ms: default_upload_delay_ms(),
            csv_header: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_pdf_input_dir")]
    pub pdf_input_dir: PathBuf,
    #[serde(default = "default_plain_text_input_dir")]
    pub plain_text_input_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_prompt_file")]
    pub prompt_file: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_pdf_input_dir()        -> PathBuf { PathBuf::from("input/pdf") }
fn default_plain_text_input_dir() -> PathBuf { PathBuf::from("input/text") }
fn default_output_dir()           -> PathBuf { PathBuf::from("output") }
fn default_prompt_file()          -> PathBuf { PathBuf::from("prompt.yaml") }
fn default_log_dir()              -> PathBuf { PathBuf::from("logs") }

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pdf_input_dir: default_pdf_input_dir(),
            plain_text_input_dir: default_plain_text_input_dir(),
            output_dir: default_output_dir(),
            prompt_file: default_prompt_file(),
            log_dir: default_log_dir(),
        }
    }
}


impl Config {
    /// Load configuration from `path`, or from ROBIAS_CONFIG, or robias.toml.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(std::env::var("ROBIAS_CONFIG").unwrap_or_else(|_| "robias.toml".to_string())),
        };

        if !path.exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy robias.example.toml to robias.toml and edit it.",
                path.display()
            );
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
