pub mod providers;
pub mod client;
pub mod correction;
pub mod verification;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::schema::{FieldSchema, PlaceholderCheck};

pub use client::ModelClient;

/// LLM provider types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LLMProvider {
    #[default]
    OpenAI,
    Gemini,
    Ollama,
}

impl LLMProvider {
    pub fn default_model(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI => "gpt-5.1",
            LLMProvider::Gemini => "gemini-2.5-pro",
            LLMProvider::Ollama => "llama3.3",
        }
    }

    /// Environment variables consulted for the API key, in order
    pub fn api_key_vars(&self) -> &'static [&'static str] {
        match self {
            LLMProvider::OpenAI => &["OPENAI_API_KEY", "GPT_API_KEY"],
            LLMProvider::Gemini => &["GOOGLE_API_KEY"],
            LLMProvider::Ollama => &[],
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, LLMProvider::Ollama)
    }

    /// Local pipelines cross-check the draft answer before format repair
    pub fn uses_verifier(&self) -> bool {
        self.is_local()
    }

    pub fn error_style(&self) -> ErrorStyle {
        if self.is_local() {
            ErrorStyle::Json
        } else {
            ErrorStyle::Tagged
        }
    }

    /// Whether primary requests get the JSON-only instruction wrapper
    pub fn wraps_prompt(&self) -> bool {
        !self.is_local()
    }

    pub fn system_prompt(&self) -> Option<&'static str> {
        match self {
            LLMProvider::OpenAI => Some("You are a helpful assistant."),
            LLMProvider::Gemini | LLMProvider::Ollama => None,
        }
    }

    pub fn default_placeholder_check(&self) -> PlaceholderCheck {
        match self {
            LLMProvider::Gemini => PlaceholderCheck::Strict,
            LLMProvider::OpenAI | LLMProvider::Ollama => PlaceholderCheck::Lenient,
        }
    }
}

impl fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LLMProvider::OpenAI => "OpenAI",
            LLMProvider::Gemini => "Gemini",
            LLMProvider::Ollama => "Ollama",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "gpt" => Ok(LLMProvider::OpenAI),
            "gemini" | "google" => Ok(LLMProvider::Gemini),
            "ollama" | "local" => Ok(LLMProvider::Ollama),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    /// Model identifier; the provider default when unset
    pub model: Option<String>,
    /// Override the provider's API endpoint
    pub endpoint: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub timeout_seconds: u64,
    /// Resolved credential, never written to config files
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::OpenAI,
            model: None,
            endpoint: None,
            api_key_env: None,
            timeout_seconds: 120,
            api_key: None,
        }
    }
}

impl LLMConfig {
    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    /// Look up the API key in the environment. Absence yields an empty
    /// credential; the provider reports the authentication failure.
    pub fn resolve_api_key(&mut self) {
        if self.provider.is_local() {
            return;
        }
        let key = match &self.api_key_env {
            Some(var) => std::env::var(var).ok(),
            None => self
                .provider
                .api_key_vars()
                .iter()
                .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty())),
        };
        self.api_key = Some(key.unwrap_or_default());
    }
}

/// Chat message for LLM communication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// LLM response
#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub content: String,
    pub tokens_used: Option<u32>,
}

/// Transport and model errors raised by providers
#[derive(thiserror::Error, Debug)]
pub enum LLMError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: LLMProvider,
        status: u16,
        body: String,
    },

    #[error("Empty response text from {0}")]
    EmptyResponse(LLMProvider),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LLMError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LLMError::Http(e) if e.is_timeout() => FailureKind::Timeout,
            LLMError::Http(e) if e.is_decode() => FailureKind::MalformedResponse,
            LLMError::Http(_) => FailureKind::Transport,
            LLMError::Api { .. } => FailureKind::Api,
            LLMError::EmptyResponse(_) => FailureKind::EmptyResponse,
            LLMError::MalformedResponse(_) => FailureKind::MalformedResponse,
            LLMError::Configuration(_) => FailureKind::Configuration,
        }
    }
}

/// Trait for LLM providers
#[async_trait]
pub trait LLM: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse, LLMError>;
    fn provider_type(&self) -> LLMProvider;
}

/// Create LLM instance based on configuration
pub fn create_llm(config: &LLMConfig) -> Result<Box<dyn LLM>, LLMError> {
    match config.provider {
        LLMProvider::OpenAI => Ok(Box::new(providers::OpenAIProvider::new(config.clone())?)),
        LLMProvider::Gemini => Ok(Box::new(providers::GeminiProvider::new(config.clone())?)),
        LLMProvider::Ollama => Ok(Box::new(providers::OllamaProvider::new(config.clone())?)),
    }
}

/// Structured category of a failed model invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Transport,
    Timeout,
    Api,
    EmptyResponse,
    MalformedResponse,
    Configuration,
    /// Verifier template is missing a placeholder or was not filled
    Template,
    /// Verifier inputs were absent
    Input,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Transport => "TransportError",
            FailureKind::Timeout => "TimeoutError",
            FailureKind::Api => "ApiError",
            FailureKind::EmptyResponse => "EmptyResponse",
            FailureKind::MalformedResponse => "MalformedResponse",
            FailureKind::Configuration => "ConfigurationError",
            FailureKind::Template => "Template",
            FailureKind::Input => "Input",
        };
        write!(f, "{}", name)
    }
}

/// A failed model invocation, kept as data rather than raised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ModelFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Human-readable diagnostic, e.g. `Correction Error: ApiError: 401 ...`
    pub fn describe(&self, stage: Stage) -> String {
        match self.kind {
            FailureKind::Template | FailureKind::Input => {
                format!("{} {} Error: {}", stage.title(), self.kind, self.message)
            }
            _ => format!("{}: {}: {}", stage.error_label(), self.kind, self.message),
        }
    }
}

impl From<&LLMError> for ModelFailure {
    fn from(error: &LLMError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

/// Which pipeline call produced a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Primary,
    Verification,
    Correction,
}

impl Stage {
    fn title(&self) -> &'static str {
        match self {
            Stage::Primary => "Request",
            Stage::Verification => "Verification",
            Stage::Correction => "Correction",
        }
    }

    fn error_label(&self) -> &'static str {
        match self {
            Stage::Primary => "Error",
            Stage::Verification => "Verification Error",
            Stage::Correction => "Correction Error",
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Stage::Primary => "[ERROR]",
            Stage::Verification => "[VERIFICATION_ERROR]",
            Stage::Correction => "[CORRECTION_ERROR]",
        }
    }
}

/// How a failure is written into the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStyle {
    /// `[ERROR] Kind: message`, never valid JSON
    Tagged,
    /// JSON object with every required field set to the diagnostic
    Json,
}

/// Result of one model invocation: text or a structured failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    Text(String),
    Failure(ModelFailure),
}

impl ModelReply {
    pub fn text(&self) -> Option<&str> {
        match self {
            ModelReply::Text(t) => Some(t),
            ModelReply::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ModelFailure> {
        match self {
            ModelReply::Text(_) => None,
            ModelReply::Failure(f) => Some(f),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ModelReply::Failure(_))
    }

    /// Cell value for this reply
    pub fn render(&self, stage: Stage, style: ErrorStyle, schema: &FieldSchema) -> String {
        match self {
            ModelReply::Text(t) => t.clone(),
            ModelReply::Failure(failure) => match style {
                ErrorStyle::Tagged => match failure.kind {
                    FailureKind::Template | FailureKind::Input => {
                        format!("{} {}", stage.tag(), failure.describe(stage))
                    }
                    _ => format!("{} {}: {}", stage.tag(), failure.kind, failure.message),
                },
                ErrorStyle::Json => schema.error_json(&failure.describe(stage)),
            },
        }
    }
}
