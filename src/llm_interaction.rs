use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::constants;
use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything sent to the model for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub context: Vec<ChatMessage>,
    pub auxiliary: Option<String>,
    pub temperature: f32,
}

impl Prompt {
    /// System text with auxiliary data appended, as sent in the instructions slot.
    pub fn instructions(&self) -> String {
        match self.auxiliary.as_deref() {
            Some(aux) if !aux.trim().is_empty() => format!("{}\n\n{}", self.system, aux),
            _ => self.system.clone(),
        }
    }
}

/// A hosted model that turns a prompt into text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, api_key: &str, prompt: &Prompt) -> Result<String, GenerationError>;
}

/// Which OpenAI-compatible endpoint to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    /// `/responses` with a reasoning model.
    Responses,
    /// `/chat/completions` with a plain chat model.
    ChatCompletions,
}

impl FromStr for ApiFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "responses" => Ok(ApiFlavor::Responses),
            "chat" | "chat_completions" | "chat-completions" => Ok(ApiFlavor::ChatCompletions),
            other => Err(format!("unknown API flavor '{}', expected 'responses' or 'chat'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub flavor: ApiFlavor,
    pub reasoning_model: String,
    pub chat_model: String,
    pub reasoning_effort: String,
}

impl OpenAiConfig {
    /// Build from the environment-backed constants.
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            base_url: constants::OPENAI_BASE_URL.clone(),
            flavor: constants::API_FLAVOR.parse()?,
            reasoning_model: constants::REASONING_MODEL.clone(),
            chat_model: constants::FALLBACK_CHAT_MODEL.clone(),
            reasoning_effort: "medium".to_string(),
        })
    }
}

// Request/response shapes for POST /responses
#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: String,
    input: &'a [ChatMessage],
    reasoning: ReasoningOptions<'a>,
}

#[derive(Serialize)]
struct ReasoningOptions<'a> {
    effort: &'a str,
}

#[derive(Deserialize, Debug)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<ResponsesOutputItem>,
}

#[derive(Deserialize, Debug)]
struct ResponsesOutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<ResponsesContentPart>,
}

#[derive(Deserialize, Debug)]
struct ResponsesContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

// Request/response shapes for POST /chat/completions
#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiClient {
    http: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), suffix)
    }

    async fn post_json<T: Serialize>(
        &self,
        url: &str,
        api_key: &str,
        body: &T,
    ) -> Result<reqwest::Response, GenerationError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        error!(%status, %error_body, "LLM API request failed");
        Err(GenerationError::from_status(status.as_u16(), &error_body, retry_after))
    }

    async fn generate_responses(&self, api_key: &str, prompt: &Prompt) -> Result<String, GenerationError> {
        let url = self.endpoint("responses");
        let request = ResponsesRequest {
            model: &self.config.reasoning_model,
            instructions: prompt.instructions(),
            input: &prompt.context,
            reasoning: ReasoningOptions {
                effort: &self.config.reasoning_effort,
            },
        };

        let parsed = self
            .post_json(&url, api_key, &request)
            .await?
            .json::<ResponsesResponse>()
            .await
            .map_err(|e| GenerationError::Transport(format!("Failed to parse response body: {}", e)))?;

        let text = parsed
            .output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .map(|part| part.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        Ok(text)
    }

    async fn generate_chat(&self, api_key: &str, prompt: &Prompt) -> Result<String, GenerationError> {
        let url = self.endpoint("chat/completions");
        let instructions = prompt.instructions();
        let mut messages = Vec::with_capacity(prompt.context.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: &instructions,
        });
        messages.extend(prompt.context.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        let request = ChatCompletionRequest {
            model: &self.config.chat_model,
            messages,
            temperature: prompt.temperature,
        };

        let parsed = self
            .post_json(&url, api_key, &request)
            .await?
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| GenerationError::Transport(format!("Failed to parse response body: {}", e)))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    #[instrument(skip_all, fields(flavor = ?self.config.flavor, context_len = prompt.context.len()))]
    async fn generate(&self, api_key: &str, prompt: &Prompt) -> Result<String, GenerationError> {
        let text = match self.config.flavor {
            ApiFlavor::Responses => self.generate_responses(api_key, prompt).await?,
            ApiFlavor::ChatCompletions => self.generate_chat(api_key, prompt).await?,
        };

        let text = text.trim();
        if text.is_empty() {
            error!("LLM API returned no text");
            return Err(GenerationError::Transport(
                "The model returned an empty response".to_string(),
            ));
        }
        debug!(chars = text.len(), "Received LLM response");
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_append_auxiliary() {
        let prompt = Prompt {
            system: "You are helpful.".into(),
            context: vec![],
            auxiliary: Some("Technical checks:\n- auth".into()),
            temperature: 0.2,
        };
        assert_eq!(prompt.instructions(), "You are helpful.\n\nTechnical checks:\n- auth");

        let bare = Prompt {
            auxiliary: Some("   ".into()),
            ..prompt
        };
        assert_eq!(bare.instructions(), "You are helpful.");
    }

    #[test]
    fn test_api_flavor_parsing() {
        assert_eq!("responses".parse::<ApiFlavor>().unwrap(), ApiFlavor::Responses);
        assert_eq!("Chat".parse::<ApiFlavor>().unwrap(), ApiFlavor::ChatCompletions);
        assert!("grpc".parse::<ApiFlavor>().is_err());
    }

    #[test]
    fn test_chat_message_serializes_lowercase_role() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }
}
