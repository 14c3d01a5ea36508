//! LLM-backed message generator.
//!
//! Implements `MessageGenerator` against any OpenAI-compatible chat
//! completions endpoint via [`async_openai`]. The template slug and the
//! subject context are rendered into a short prompt; the first choice's
//! content is the message.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
};
use dripflow_core::flow::context::FlowContext;
use dripflow_core::generator::{GenerationError, MessageGenerator};
use dripflow_types::config::LlmConfig;
use dripflow_types::subject::ContextValue;
use secrecy::{ExposeSecret, SecretString};

#[derive(Debug, thiserror::Error)]
pub enum GeneratorSetupError {
    #[error("API key environment variable '{0}' is not set")]
    MissingApiKey(String),
}

/// Writes flow messages with a chat completion model.
///
/// Does not derive Debug: the client holds the API key.
pub struct LlmMessageGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    language: String,
    max_tokens: u32,
}

impl LlmMessageGenerator {
    pub fn new(api_key: SecretString, config: &LlmConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(&config.base_url);

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            language: config.language.clone(),
            max_tokens: config.max_tokens,
        }
    }

    /// Build a generator reading the API key from `config.api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, GeneratorSetupError> {
        let key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GeneratorSetupError::MissingApiKey(config.api_key_env.clone()))?;
        Ok(Self::new(SecretString::from(key), config))
    }

    fn build_request(&self, template: &str, context: &FlowContext) -> CreateChatCompletionRequest {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(system_prompt(
                    &self.language,
                )),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(user_prompt(
                    template, context,
                )),
                name: None,
            }),
        ];

        CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_completion_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

impl MessageGenerator for LlmMessageGenerator {
    async fn generate(
        &self,
        template: &str,
        context: &FlowContext,
    ) -> Result<String, GenerationError> {
        let request = self.build_request(template, context);

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| GenerationError::Failed(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(GenerationError::Failed(
                "model returned no content".to_string(),
            ));
        }

        tracing::debug!(template, model = %self.model, chars = content.len(), "message generated");
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

fn system_prompt(language: &str) -> String {
    format!(
        "You write short WhatsApp messages that win back inactive customers. \
         Tone: warm and engaging. Always answer in {language}. \
         Reply with the final message text only, ready to send."
    )
}

/// Render the template slug and context into the user turn. Keys are listed
/// in sorted order; null values are left out.
fn user_prompt(template: &str, context: &FlowContext) -> String {
    let mut prompt = format!("Template: {template}\n");
    let lines: Vec<String> = context
        .iter()
        .filter(|(_, v)| !matches!(v, ContextValue::Null))
        .map(|(k, v)| format!("- {k}: {v}"))
        .collect();
    if !lines.is_empty() {
        prompt.push_str("Customer context:\n");
        prompt.push_str(&lines.join("\n"));
        prompt.push('\n');
    }
    prompt
}
