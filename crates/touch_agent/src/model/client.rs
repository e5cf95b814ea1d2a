//! Conversation client for an OpenAI-compatible multimodal endpoint

use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImage, ChatCompletionRequestMessageContentPartText,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::message::{prune_images, Content, ContentItem, Message, Role, MAX_LIVE_IMAGES};
use super::transport::{ChatTransport, HttpTransport};
use crate::config::{get_system_prompt, Language};
use crate::error::ModelError;
use crate::surface::Screenshot;

/// Completion ceiling for one reply
pub const MAX_TOKENS: u32 = 3000;
/// Sampling is pinned so the same screen yields the same action
pub const TEMPERATURE: f32 = 0.0;
pub const TOP_P: f32 = 0.85;
pub const FREQUENCY_PENALTY: f32 = 0.2;

/// Configuration for the model endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    pub lang: Language,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model_name: "autoglm-phone-9b".to_string(),
            lang: Language::English,
        }
    }
}

impl ModelConfig {
    /// Create a new ModelConfig with custom settings
    pub fn new(base_url: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_name: model_name.into(),
            ..Default::default()
        }
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Set the language
    pub fn with_lang(mut self, lang: Language) -> Self {
        self.lang = lang;
        self
    }
}

/// A model reply split into reasoning and the action text
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub thinking: String,
    pub action: String,
    pub raw_content: String,
}

impl ModelResponse {
    /// Split `<think>..</think><answer>..</answer>`, falling back to the
    /// `finish(message=` / `do(action=` markers when tags are missing
    pub fn parse(content: &str) -> Self {
        let raw_content = content.to_string();

        if let Some((before, after)) = content.split_once("<answer>") {
            let thinking = match before.split_once("<think>") {
                Some((_, rest)) => rest.split("</think>").next().unwrap_or(rest),
                None => before,
            };
            let action = after.split("</answer>").next().unwrap_or(after);
            return Self {
                thinking: thinking.trim().to_string(),
                action: action.trim().to_string(),
                raw_content,
            };
        }

        for marker in ["finish(message=", "do(action="] {
            if let Some(idx) = content.find(marker) {
                let thinking = content[..idx]
                    .replace("<think>", "")
                    .replace("</think>", "");
                return Self {
                    thinking: thinking.trim().to_string(),
                    action: content[idx..].trim().to_string(),
                    raw_content,
                };
            }
        }

        Self {
            thinking: String::new(),
            action: content.trim().to_string(),
            raw_content,
        }
    }
}

/// Split an assistant reply into reasoning and action text
pub fn parse_reply(content: &str) -> ModelResponse {
    ModelResponse::parse(content)
}

/// Converts conversation messages into chat-completion request messages
pub struct MessageBuilder;

impl MessageBuilder {
    pub fn create_system_message(content: &str) -> Result<ChatCompletionRequestMessage, ModelError> {
        Ok(ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()?
            .into())
    }

    pub fn create_assistant_message(
        content: &str,
    ) -> Result<ChatCompletionRequestMessage, ModelError> {
        Ok(ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()?
            .into())
    }

    pub fn create_user_message(message: &Message) -> Result<ChatCompletionRequestMessage, ModelError> {
        let content = match &message.content {
            Content::Text(text) => ChatCompletionRequestUserMessageContent::Text(text.clone()),
            Content::Multimodal(items) => ChatCompletionRequestUserMessageContent::Array(
                items
                    .iter()
                    .map(|item| match item {
                        ContentItem::Text { text } => {
                            ChatCompletionRequestUserMessageContentPart::Text(
                                ChatCompletionRequestMessageContentPartText { text: text.clone() },
                            )
                        }
                        ContentItem::Image { data_uri } => {
                            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                ChatCompletionRequestMessageContentPartImage {
                                    image_url: ImageUrl {
                                        url: data_uri.clone(),
                                        detail: Some(ImageDetail::Auto),
                                    },
                                },
                            )
                        }
                    })
                    .collect(),
            ),
        };
        Ok(ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into())
    }

    pub fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage, ModelError> {
        match message.role {
            Role::System => Self::create_system_message(&message.text()),
            Role::User => Self::create_user_message(message),
            Role::Assistant => Self::create_assistant_message(&message.text()),
        }
    }

    /// Build screen info string for the model
    pub fn build_screen_info(current_app: &str) -> String {
        json!({
            "current_app": current_app
        })
        .to_string()
    }
}

fn encode_screenshot(screenshot: &Screenshot) -> Result<String, ModelError> {
    screenshot
        .to_data_uri()
        .map_err(|e| ModelError::InvalidRequest(format!("failed to encode screenshot: {}", e)))
}

/// Owns one bounded multimodal conversation and sends it to the model.
///
/// The system instruction is not part of the history; it is prefixed to
/// every outbound request.
pub struct ConversationClient {
    config: ModelConfig,
    system_prompt: String,
    transport: Box<dyn ChatTransport>,
    history: Vec<Message>,
}

impl ConversationClient {
    /// Create a client talking HTTP to `config.base_url`
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let transport = HttpTransport::new(&config.base_url, config.api_key.clone())?;
        Ok(Self::with_transport(config, Box::new(transport)))
    }

    /// Create a client over an arbitrary transport
    pub fn with_transport(config: ModelConfig, transport: Box<dyn ChatTransport>) -> Self {
        let system_prompt = get_system_prompt(config.lang);
        Self {
            config,
            system_prompt,
            transport,
            history: Vec::new(),
        }
    }

    /// Replace the system instruction
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Forget the conversation
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Whether the last message is a user turn still waiting for a reply
    pub fn has_pending_turn(&self) -> bool {
        matches!(self.history.last(), Some(m) if m.role == Role::User)
    }

    /// Append a user turn (with the screenshot, if any) and send the conversation
    pub async fn send(
        &mut self,
        user_text: &str,
        screenshot: Option<&Screenshot>,
    ) -> Result<String, ModelError> {
        let message = match screenshot {
            Some(shot) => Message::user_with_image(user_text, encode_screenshot(shot)?),
            None => Message::user(user_text),
        };
        self.history.push(message);
        self.prune();
        self.dispatch().await
    }

    /// Replace the conversation with `history` and send it. A plain-text
    /// trailing user turn is upgraded in place with the screenshot.
    pub async fn send_with_history(
        &mut self,
        history: Vec<Message>,
        screenshot: Option<&Screenshot>,
    ) -> Result<String, ModelError> {
        self.history = history;
        if let Some(shot) = screenshot {
            let data_uri = encode_screenshot(shot)?;
            let upgraded = self
                .history
                .last_mut()
                .map_or(false, |last| last.attach_image(data_uri));
            if !upgraded {
                warn!("Screenshot dropped: last message is not a plain-text user turn");
            }
        }
        self.prune();
        self.dispatch().await
    }

    /// Re-send the pending user turn after a failed attempt
    pub async fn retry_pending(&mut self) -> Result<String, ModelError> {
        if !self.has_pending_turn() {
            return Err(ModelError::InvalidRequest(
                "no pending user turn to retry".to_string(),
            ));
        }
        self.dispatch().await
    }

    /// Send a minimal request to verify the endpoint answers
    pub async fn check_connection(&self) -> Result<(), ModelError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model_name)
            .max_tokens(5_u32)
            .temperature(TEMPERATURE)
            .stream(false)
            .messages(vec![ChatCompletionRequestUserMessageArgs::default()
                .content("Hi")
                .build()?
                .into()])
            .build()?;
        self.transport.complete(&request).await.map(|_| ())
    }

    /// The request that would be sent for the current history
    pub fn build_request(&self) -> Result<CreateChatCompletionRequest, ModelError> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(MessageBuilder::create_system_message(&self.system_prompt)?);
        for message in &self.history {
            messages.push(MessageBuilder::to_request_message(message)?);
        }

        Ok(CreateChatCompletionRequestArgs::default()
            .model(&self.config.model_name)
            .messages(messages)
            .max_tokens(MAX_TOKENS)
            .temperature(TEMPERATURE)
            .top_p(TOP_P)
            .frequency_penalty(FREQUENCY_PENALTY)
            .stream(false)
            .build()?)
    }

    fn prune(&mut self) {
        let collapsed = prune_images(&mut self.history, MAX_LIVE_IMAGES);
        if collapsed > 0 {
            debug!(collapsed, "collapsed old screenshots to text");
        }
    }

    async fn dispatch(&mut self) -> Result<String, ModelError> {
        let request = self.build_request()?;
        let content = self.transport.complete(&request).await?;
        self.history.push(Message::assistant(content.clone()));
        Ok(content)
    }
}
