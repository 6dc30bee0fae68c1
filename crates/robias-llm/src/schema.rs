//! JSON-schema descriptions of structured model output.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{LlmError, StructuredResponse};

/// A named JSON schema sent with a request so the API constrains the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
    pub strict: bool,
}

impl OutputSchema {
    /// Builds a strict object schema whose properties are all required strings.
    ///
    /// Strict mode requires every property to be listed in `required` and
    /// `additionalProperties` to be `false`.
    pub fn strict_object(name: &str, fields: &[(&str, &str)]) -> Self {
        let mut properties = serde_json::Map::new();
        for (field, description) in fields {
            properties.insert(
                field.to_string(),
                serde_json::json!({"type": "string", "description": description}),
            );
        }
        let required: Vec<&str> = fields.iter().map(|(f, _)| *f).collect();

        Self {
            name: name.to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            }),
            strict: true,
        }
    }
}

/// A Rust type the model is asked to produce.
pub trait StructuredOutput: DeserializeOwned + Send {
    fn output_schema() -> OutputSchema;

    /// Decode a response into `Self`. Shape mismatches are reported as
    /// `InvalidOutput` so the caller may retry the call.
    fn from_response(resp: &StructuredResponse) -> Result<Self, LlmError> {
        serde_json::from_value(resp.value.clone()).map_err(|e| {
            LlmError::InvalidOutput(format!(
                "output does not match schema {}: {e}",
                Self::output_schema().name
            ))
        })
    }
}
