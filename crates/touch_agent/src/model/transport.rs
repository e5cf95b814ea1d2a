//! Network seam between the conversation client and a chat-completions endpoint

use async_openai::types::CreateChatCompletionRequest;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, Level};

use crate::error::ModelError;

/// Fixed timeout for one chat-completion round trip
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends a fully shaped request and returns the first choice's content
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, request: &CreateChatCompletionRequest) -> Result<String, ModelError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Pull `choices[0].message.content` out of a response body
pub fn extract_content(body: &str) -> Result<String, ModelError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ModelError::MalformedResponse(format!("{}: {}", e, truncate(body, 200))))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ModelError::MalformedResponse("response has no message content".to_string()))
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Request body for logging, with base64 image payloads replaced
fn sanitized_body(request: &CreateChatCompletionRequest) -> String {
    let mut body = serde_json::to_value(request).unwrap_or(Value::Null);
    if let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for message in messages {
            let Some(parts) = message.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                    *url = Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    body.to_string()
}

/// HTTPS transport with bearer-token auth
pub struct HttpTransport {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn complete(&self, request: &CreateChatCompletionRequest) -> Result<String, ModelError> {
        debug!(endpoint = %self.endpoint, model = %request.model, "sending chat completion");
        if tracing::enabled!(Level::DEBUG) {
            debug!(body = %sanitized_body(request), "request body (base64 omitted)");
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ModelError::Http {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), bytes = body.len(), "chat completion received");
        extract_content(&body)
    }
}
