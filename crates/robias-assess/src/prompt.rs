//! Prompt scripts.
//!
//! A script is a YAML document:
//!
//! ```yaml
//! Intro: You are assessing risk of bias in a randomised trial.
//! OutputFormat: Answer each criterion with Yes or No.
//! Criteria:
//!   RandomSequence: Was the allocation sequence randomly generated?
//!   Concealment: Was allocation adequately concealed?
//! ```
//!
//! Criteria keep the order they are written in; that order drives the
//! per-criterion calls and the summary columns.

use std::path::Path;

use serde::Serialize;
use serde_yaml::Value;
use tracing::debug;

use crate::error::AssessError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Criterion {
    pub key: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptScript {
    pub intro: String,
    pub output_format: String,
    pub criteria: Vec<Criterion>,
}

impl PromptScript {
    pub fn load(path: &Path) -> Result<Self, AssessError> {
        let text = std::fs::read_to_string(path).map_err(|e| AssessError::io(path, e))?;
        let script = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), criteria = script.criteria.len(), "Prompt script loaded");
        Ok(script)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, AssessError> {
        let doc: Value = serde_yaml::from_str(text)?;

        let intro = string_field(&doc, "Intro")?;
        let output_format = string_field(&doc, "OutputFormat")?;

        let mapping = match doc.get("Criteria") {
            None | Some(Value::Null) => return Err(AssessError::PromptMissingKey("Criteria")),
            Some(Value::Mapping(m)) => m,
            Some(_) => return Err(AssessError::PromptNotAString("Criteria".to_string())),
        };

        let mut criteria = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let key = match key {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b)   => b.to_string(),
                _ => return Err(AssessError::PromptNotAString("Criteria key".to_string())),
            };
            let prompt = value
                .as_str()
                .ok_or_else(|| AssessError::PromptNotAString(format!("Criteria.{key}")))?
                .to_string();
            criteria.push(Criterion { key, prompt });
        }

        if criteria.is_empty() {
            return Err(AssessError::NoCriteria);
        }

        Ok(Self { intro, output_format, criteria })
    }

    /// System instructions sent with every call.
    pub fn instructions(&self) -> String {
        format!("{}\n{}", self.intro, self.output_format)
    }

    /// Every criterion prompt, one per line, for the all-criteria strategy.
    pub fn combined_body(&self) -> String {
        self.criteria
            .iter()
            .map(|c| c.prompt.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn criterion_keys(&self) -> Vec<&str> {
        self.criteria.iter().map(|c| c.key.as_str()).collect()
    }
}

fn string_field(doc: &Value, key: &'static str) -> Result<String, AssessError> {
    match doc.get(key) {
        None | Some(Value::Null) => Err(AssessError::PromptMissingKey(key)),
        Some(Value::String(s))   => Ok(s.clone()),
        Some(_)                  => Err(AssessError::PromptNotAString(key.to_string())),
    }
}
