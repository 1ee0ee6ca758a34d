//! Local LLM completion backend
//!
//! Talks to a llama-server style OpenAI-compatible endpoint on localhost.
//! Local chat templates are strict about message shape, so the conversation
//! is normalized first: `tool` results become user messages and consecutive
//! same-role messages are merged, leaving a strictly alternating
//! user/assistant sequence after the optional system message.

use crate::domain::chat::{ChatCompletion, ChatMessage, ToolChoice, ToolDef};
use crate::error::LlmError;
use crate::ports::completion::CompletionBackend;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    tools: &'a [ToolDef],
    tool_choice: ToolChoice,
}

/// Completion backend for a local model server.
pub struct LocalBackend {
    client: reqwest::Client,
    base_url: String,

    /// Model name, when the server hosts more than one.
    pub model: Option<String>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            // Local generation without a GPU can be slow.
            .timeout(Duration::from_secs(600))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            model: None,
        }
    }

    /// Normalize a conversation for a strict chat template.
    ///
    /// Tool results become user messages prefixed with "Tool output: ", then
    /// consecutive messages of the same role are merged with blank lines.
    fn sanitize_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut sanitized: Vec<ChatMessage> = Vec::with_capacity(messages.len());

        for message in messages {
            let (role, text) = if message.role == "tool" {
                ("user", format!("Tool output: {}", message.content_text()))
            } else {
                (message.role.as_str(), message.content_text())
            };

            match sanitized.last_mut() {
                Some(last) if last.role == role => {
                    let merged = format!("{}\n\n{}", last.content_text(), text);
                    *last = match role {
                        "system" => ChatMessage::system(merged),
                        "assistant" => ChatMessage::assistant(merged),
                        _ => ChatMessage::user(merged),
                    };
                }
                _ => {
                    let fresh = match role {
                        "system" => ChatMessage::system(text),
                        "assistant" => ChatMessage::assistant(text),
                        _ => ChatMessage::user(text),
                    };
                    sanitized.push(fresh);
                }
            }
        }

        sanitized
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionBackend for LocalBackend {
    async fn completion(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDef],
        tool_choice: ToolChoice,
    ) -> Result<ChatCompletion, LlmError> {
        let messages = Self::sanitize_messages(&messages);
        let body = ChatCompletionRequest {
            model: self.model.as_deref(),
            messages: &messages,
            tools,
            tool_choice,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Transport(format!("local completion failed: {}", err)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!("Local LLM error response ({}): {}", status, text);
            return Err(LlmError::Transport(format!("HTTP {}: {}", status, text)));
        }

        response
            .json::<ChatCompletion>()
            .await
            .map_err(|err| LlmError::Decode(err.to_string()))
    }
}
