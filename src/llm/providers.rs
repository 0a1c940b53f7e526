use super::{ChatMessage, LLMConfig, LLMError, LLMProvider, LLMResponse, LLM};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const OLLAMA_ENDPOINT: &str = "http://localhost:11434";

fn build_client(config: &LLMConfig) -> Result<reqwest::Client, LLMError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()?)
}

async fn check_status(provider: LLMProvider, response: reqwest::Response) -> Result<reqwest::Response, LLMError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(LLMError::Api { provider, status, body })
}

/// OpenAI provider implementation
pub struct OpenAIProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u32,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    fn build_request(&self, messages: Vec<ChatMessage>) -> OpenAIRequest {
        OpenAIRequest {
            model: self.config.model(),
            messages,
            temperature: 0.0,
        }
    }

    fn into_response(response: OpenAIResponse) -> Result<LLMResponse, LLMError> {
        let content = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::MalformedResponse("no choices in OpenAI response".to_string()))?
            .message
            .content
            .unwrap_or_default();

        Ok(LLMResponse {
            content,
            tokens_used: response.usage.map(|u| u.total_tokens),
        })
    }
}

#[async_trait]
impl LLM for OpenAIProvider {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse, LLMError> {
        // An empty key is still sent; the API answers 401.
        let api_key = self.config.api_key.clone().unwrap_or_default();

        let request = self.build_request(messages);

        let url = self.config.endpoint.as_deref().unwrap_or(OPENAI_ENDPOINT);

        debug!("Sending request to OpenAI API ({})", request.model);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await?;

        let openai_response: OpenAIResponse =
            check_status(LLMProvider::OpenAI, response).await?.json().await?;
        Self::into_response(openai_response)
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::OpenAI
    }
}

/// Gemini provider implementation
pub struct GeminiProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

impl GeminiProvider {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    /// System messages become `systemInstruction`, the rest one user content
    fn build_request(messages: Vec<ChatMessage>) -> GeminiRequest {
        let (system, user): (Vec<_>, Vec<_>) = messages.into_iter().partition(|m| m.role == "system");

        let to_content = |msgs: Vec<ChatMessage>| GeminiContent {
            parts: msgs.into_iter().map(|m| GeminiPart { text: m.content }).collect(),
        };

        GeminiRequest {
            contents: vec![to_content(user)],
            system_instruction: if system.is_empty() { None } else { Some(to_content(system)) },
            generation_config: GeminiGenerationConfig { temperature: 0.0 },
        }
    }

    fn url(&self) -> String {
        let base = self.config.endpoint.as_deref().unwrap_or(GEMINI_ENDPOINT);
        format!("{}/{}:generateContent", base.trim_end_matches('/'), self.config.model())
    }

    fn into_response(response: GeminiResponse) -> LLMResponse {
        // Text may be split across several parts of the first candidate.
        let content = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
            .unwrap_or_default();

        LLMResponse {
            content,
            tokens_used: response.usage_metadata.map(|u| u.total_token_count),
        }
    }
}

#[async_trait]
impl LLM for GeminiProvider {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse, LLMError> {
        let api_key = self.config.api_key.clone().unwrap_or_default();

        let request = Self::build_request(messages);
        let url = self.url();

        debug!("Sending request to Gemini API");

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let gemini_response: GeminiResponse =
            check_status(LLMProvider::Gemini, response).await?.json().await?;
        Ok(Self::into_response(gemini_response))
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::Gemini
    }
}

/// Local Ollama provider implementation
pub struct OllamaProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    eval_count: Option<u32>,
    prompt_eval_count: Option<u32>,
}

impl OllamaProvider {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    /// Flatten chat messages into a single prompt plus optional system text
    fn build_request(&self, messages: Vec<ChatMessage>) -> OllamaRequest {
        let mut system = Vec::new();
        let mut prompt = Vec::new();
        for message in messages {
            if message.role == "system" {
                system.push(message.content);
            } else {
                prompt.push(message.content);
            }
        }

        OllamaRequest {
            model: self.config.model(),
            prompt: prompt.join("\n\n"),
            system: if system.is_empty() { None } else { Some(system.join("\n\n")) },
            stream: false,
        }
    }

    fn into_response(response: OllamaResponse) -> LLMResponse {
        let tokens_used = match (response.prompt_eval_count, response.eval_count) {
            (None, None) => None,
            (p, e) => Some(p.unwrap_or(0) + e.unwrap_or(0)),
        };

        LLMResponse {
            content: response.response,
            tokens_used,
        }
    }
}

#[async_trait]
impl LLM for OllamaProvider {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse, LLMError> {
        let request = self.build_request(messages);

        let base = self.config.endpoint.as_deref().unwrap_or(OLLAMA_ENDPOINT);
        let url = format!("{}/api/generate", base.trim_end_matches('/'));

        debug!("Sending request to Ollama at {}", url);

        let response = self.client.post(&url).json(&request).send().await?;

        let ollama_response: OllamaResponse =
            check_status(LLMProvider::Ollama, response).await?.json().await?;
        Ok(Self::into_response(ollama_response))
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::Ollama
    }
}
