//! JSON candidate extraction and required-field validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Sentinel a model uses when it cannot fill a field
pub const PLACEHOLDER_SENTINEL: &str = "invalid";

/// Ordered set of JSON keys every accepted answer must contain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSchema {
    fields: Vec<String>,
}

impl FieldSchema {
    /// Build a schema, dropping duplicate names while keeping first-seen order
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into();
            if !unique.contains(&field) {
                unique.push(field);
            }
        }
        Self { fields: unique }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `"a": "<string>", "b": "<string>"`
    pub fn shape_spec(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("\"{}\": \"<string>\"", f))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `"a", "b"`
    pub fn key_list(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("\"{}\"", f))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// JSON object with every required field set to `message`
    pub fn error_json(&self, message: &str) -> String {
        let object: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.clone(), Value::String(message.to_string())))
            .collect();
        Value::Object(object).to_string()
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::new(["decision", "evidence"])
    }
}

/// How strictly answers are checked beyond key presence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderCheck {
    /// Required keys present is sufficient
    #[default]
    Lenient,
    /// Additionally reject answers whose every field is the sentinel
    Strict,
}

/// Outcome of validating one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    NoCandidate,
    Parse(String),
    NotObject,
    MissingField(String),
    AllPlaceholders,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::Valid => write!(f, "valid"),
            Validation::NoCandidate => write!(f, "no JSON object found"),
            Validation::Parse(e) => write!(f, "JSON parse error: {}", e),
            Validation::NotObject => write!(f, "JSON value is not an object"),
            Validation::MissingField(name) => write!(f, "missing required field '{}'", name),
            Validation::AllPlaceholders => write!(f, "every field is a placeholder"),
        }
    }
}

/// Locate the outermost `{ ... }` span after stripping newlines.
///
/// Heuristic only: the span is shaped like an object but may not parse.
pub fn extract_json(text: &str) -> Option<String> {
    let flattened: String = text.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    let flattened = flattened.trim();

    let start = flattened.find('{')?;
    let end = flattened.rfind('}')?;
    if start > end {
        return None;
    }
    Some(flattened[start..=end].to_string())
}

/// Checks candidates against a field schema
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: FieldSchema,
    check: PlaceholderCheck,
}

impl SchemaValidator {
    pub fn new(schema: FieldSchema, check: PlaceholderCheck) -> Self {
        Self { schema, check }
    }

    /// Validate an extracted candidate. Never fails: errors are outcomes.
    pub fn validate(&self, candidate: Option<&str>) -> Validation {
        let candidate = match candidate {
            Some(c) if !c.is_empty() => c,
            _ => return Validation::NoCandidate,
        };

        let parsed: Value = match serde_json::from_str(candidate) {
            Ok(v) => v,
            Err(e) => return Validation::Parse(e.to_string()),
        };

        let object = match parsed.as_object() {
            Some(o) => o,
            None => return Validation::NotObject,
        };

        if let Some(missing) = self.schema.fields().iter().find(|f| !object.contains_key(*f)) {
            return Validation::MissingField(missing.clone());
        }

        if self.check == PlaceholderCheck::Strict && self.all_placeholders(object) {
            return Validation::AllPlaceholders;
        }

        Validation::Valid
    }

    /// Extract then validate a raw model reply
    pub fn validate_reply(&self, reply: &str) -> Validation {
        self.validate(extract_json(reply).as_deref())
    }

    fn all_placeholders(&self, object: &Map<String, Value>) -> bool {
        self.schema.fields().iter().all(|f| {
            object
                .get(f)
                .and_then(Value::as_str)
                .map_or(false, |v| v.trim().eq_ignore_ascii_case(PLACEHOLDER_SENTINEL))
        })
    }
}
