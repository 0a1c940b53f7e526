//! Model client: the boundary past which no model error escapes.

use tracing::{debug, warn};

use super::{
    create_llm, ChatMessage, ErrorStyle, FailureKind, LLMConfig, LLMError, LLMProvider, ModelFailure,
    ModelReply, Stage, LLM,
};
use crate::prompt::force_json_wrapper;
use crate::schema::FieldSchema;

/// Sends prompts to one backend and returns text or a structured failure.
///
/// Constructed once per run and shared by the batch processor, the
/// corrector and the verifier.
pub struct ModelClient {
    llm: Box<dyn LLM>,
    schema: FieldSchema,
    system_prompt: Option<String>,
    wrap_json: bool,
    error_style: ErrorStyle,
}

impl ModelClient {
    /// Wrap an LLM, taking wrapper/system prompt/error style from its provider
    pub fn new(llm: Box<dyn LLM>, schema: FieldSchema) -> Self {
        let provider = llm.provider_type();
        Self {
            llm,
            schema,
            system_prompt: provider.system_prompt().map(str::to_string),
            wrap_json: provider.wraps_prompt(),
            error_style: provider.error_style(),
        }
    }

    pub fn from_config(config: &LLMConfig, schema: FieldSchema) -> Result<Self, LLMError> {
        Ok(Self::new(create_llm(config)?, schema))
    }

    pub fn provider(&self) -> LLMProvider {
        self.llm.provider_type()
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn error_style(&self) -> ErrorStyle {
        self.error_style
    }

    /// Primary request: wrapped with the JSON-only instruction when enabled
    pub async fn request(&self, prompt: &str) -> ModelReply {
        if self.wrap_json {
            self.send(&force_json_wrapper(&self.schema, prompt)).await
        } else {
            self.send(prompt).await
        }
    }

    /// Send a fully assembled prompt as-is
    pub async fn send(&self, prompt: &str) -> ModelReply {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        match self.llm.chat(messages).await {
            Ok(response) => {
                let text = response.content.trim();
                if text.is_empty() {
                    let error = LLMError::EmptyResponse(self.provider());
                    warn!("⚠️ {}", error);
                    return ModelReply::Failure(ModelFailure::new(FailureKind::EmptyResponse, error.to_string()));
                }
                debug!("Model replied with {} chars (tokens: {:?})", text.len(), response.tokens_used);
                ModelReply::Text(text.to_string())
            }
            Err(e) => {
                warn!("⚠️ {} request failed: {}", self.provider(), e);
                ModelReply::Failure(ModelFailure::from(&e))
            }
        }
    }

    /// Cell value for a reply in this client's error style
    pub fn render(&self, reply: &ModelReply, stage: Stage) -> String {
        reply.render(stage, self.error_style, &self.schema)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-process LLM for unit tests.

    use super::super::{ChatMessage, LLMError, LLMProvider, LLMResponse, LLM};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    pub enum Scripted {
        Reply(&'static str),
        Fail,
    }

    #[derive(Clone)]
    pub struct ScriptedLLM {
        provider: LLMProvider,
        script: Arc<Mutex<VecDeque<Scripted>>>,
        pub prompts: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    }

    impl ScriptedLLM {
        pub fn new(provider: LLMProvider, script: Vec<Scripted>) -> Self {
            Self {
                provider,
                script: Arc::new(Mutex::new(script.into())),
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub fn last_user_prompt(&self) -> String {
            let prompts = self.prompts.lock().unwrap();
            prompts
                .last()
                .and_then(|m| m.iter().rev().find(|m| m.role == "user"))
                .map(|m| m.content.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl LLM for ScriptedLLM {
        async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse, LLMError> {
            self.prompts.lock().unwrap().push(messages);
            match self.script.lock().unwrap().pop_front() {
                Some(Scripted::Reply(text)) => Ok(LLMResponse {
                    content: text.to_string(),
                    tokens_used: None,
                }),
                Some(Scripted::Fail) | None => Err(LLMError::Api {
                    provider: self.provider,
                    status: 503,
                    body: "service unavailable".to_string(),
                }),
            }
        }

        fn provider_type(&self) -> LLMProvider {
            self.provider
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Scripted, ScriptedLLM};
    use super::*;

    fn schema() -> FieldSchema {
        FieldSchema::new(["decision", "evidence"])
    }

    #[tokio::test]
    async fn test_remote_request_is_wrapped_with_system_prompt() {
        let llm = ScriptedLLM::new(LLMProvider::OpenAI, vec![Scripted::Reply("  {\"decision\":\"yes\"}  \n")]);
        let client = ModelClient::new(Box::new(llm.clone()), schema());

        let reply = client.request("Is there a lesion?").await;
        assert_eq!(reply, ModelReply::Text("{\"decision\":\"yes\"}".to_string()));

        let messages = llm.prompts.lock().unwrap()[0].clone();
        assert_eq!(messages[0], ChatMessage::system("You are a helpful assistant."));
        assert!(messages[1].content.contains("only** a single JSON object"));
        assert!(messages[1].content.contains("Is there a lesion?"));
    }

    #[tokio::test]
    async fn test_local_request_is_sent_verbatim() {
        let llm = ScriptedLLM::new(LLMProvider::Ollama, vec![Scripted::Reply("ok")]);
        let client = ModelClient::new(Box::new(llm.clone()), schema());

        client.request("raw prompt").await;
        let messages = llm.prompts.lock().unwrap()[0].clone();
        assert_eq!(messages, vec![ChatMessage::user("raw prompt")]);
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_reply() {
        let llm = ScriptedLLM::new(LLMProvider::OpenAI, vec![Scripted::Fail]);
        let client = ModelClient::new(Box::new(llm), schema());

        let reply = client.request("x").await;
        let failure = reply.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Api);
        assert!(client.render(&reply, Stage::Primary).starts_with("[ERROR] ApiError: OpenAI API error 503"));
    }

    #[tokio::test]
    async fn test_blank_text_is_empty_response_failure() {
        let llm = ScriptedLLM::new(LLMProvider::Gemini, vec![Scripted::Reply("   \n ")]);
        let client = ModelClient::new(Box::new(llm), schema());

        let reply = client.request("x").await;
        assert_eq!(reply.failure().map(|f| f.kind), Some(FailureKind::EmptyResponse));
    }

    #[tokio::test]
    async fn test_local_failure_renders_error_json() {
        let llm = ScriptedLLM::new(LLMProvider::Ollama, vec![Scripted::Fail]);
        let client = ModelClient::new(Box::new(llm), schema());

        let reply = client.request("x").await;
        let cell = client.render(&reply, Stage::Primary);
        let value: serde_json::Value = serde_json::from_str(&cell).unwrap();
        assert!(value["decision"].as_str().unwrap().starts_with("Error: ApiError:"));
        assert_eq!(value["decision"], value["evidence"]);
    }
}
