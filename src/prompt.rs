//! Prompt template loading and placeholder substitution.
//!
//! Templates routinely embed JSON examples, so substitution is a plain
//! substring replace of `{name}` tokens. Any other brace in the template
//! survives untouched.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::schema::FieldSchema;

/// Placeholder filled with the row's input text
pub const RESULTS_PLACEHOLDER: &str = "Results";

/// Placeholder filled with the draft answer in verifier templates
pub const DRAFT_JSON_PLACEHOLDER: &str = "draft_json";

/// Render `name` as the literal token `{name}`
pub fn token(name: &str) -> String {
    format!("{{{}}}", name)
}

/// Replace every `{name}` token for each `(name, value)` pair.
///
/// Tokens missing from the template are ignored.
pub fn fill_placeholders<K, V>(template: &str, mapping: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = template.to_string();
    for (name, value) in mapping {
        out = out.replace(&token(name.as_ref()), value.as_ref());
    }
    out
}

/// A prompt template loaded once and shared across all rows
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
    source: Option<PathBuf>,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
        }
    }

    /// Read a UTF-8 template file in full
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to load prompt from {}", path.display()))?;
        debug!("Loaded prompt template {} ({} chars)", path.display(), text.len());
        Ok(Self {
            text,
            source: Some(path.to_path_buf()),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn contains_placeholder(&self, name: &str) -> bool {
        self.text.contains(&token(name))
    }

    /// Fill the `{Results}` token with a row's input text
    pub fn render(&self, results: &str) -> String {
        fill_placeholders(&self.text, &[(RESULTS_PLACEHOLDER, results)])
    }
}

/// Wrap a user prompt with an instruction to answer with a single JSON
/// object shaped like the field schema.
pub fn force_json_wrapper(schema: &FieldSchema, user_prompt: &str) -> String {
    format!(
        "\nYou must respond with **only** a single JSON object and nothing else (no prose).\n\
         JSON schema:\n\
         {{\n  {}\n}}\n\n\
         User content:\n\
         {}\n",
        schema.shape_spec(),
        user_prompt
    )
}
