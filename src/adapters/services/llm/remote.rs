//! Remote LLM completion backend
//!
//! Provider-agnostic chat-completions client. The provider is selected by the
//! prefix of the model string (`provider/model-id`) and every provider speaks
//! the same OpenAI-compatible wire format.

use crate::domain::chat::{
    ChatCompletion, ChatMessage, ContentPart, MessageContent, ToolChoice, ToolDef,
};
use crate::error::{ConfigError, LlmError};
use crate::ports::completion::CompletionBackend;
use crate::ports::credentials::CredentialStore;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Attempts per completion call, counting the first one.
const MAX_ATTEMPTS: u32 = 3;

/// Attribution headers sent with every request; OpenRouter and friends use
/// these to credit the calling application.
const REFERER: &str = "https://github.com/livecap/livecap";
const TITLE: &str = "livecap";

/// Chat-completions URL per provider prefix.
fn provider_url(provider: &str) -> Result<&'static str, ConfigError> {
    match provider {
        "groq" => Ok("https://api.groq.com/openai/v1/chat/completions"),
        "mistral" => Ok("https://api.mistral.ai/v1/chat/completions"),
        "google" => {
            Ok("https://generativelanguage.googleapis.com/v1beta/openai/chat/completions")
        }
        "deepinfra" => Ok("https://api.deepinfra.com/v1/openai/chat/completions"),
        "openrouter" => Ok("https://openrouter.ai/api/v1/chat/completions"),
        "ollama" => Ok("http://localhost:11434/api/chat"),
        other => Err(ConfigError::UnknownProvider(other.to_string())),
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    tools: &'a [ToolDef],
    tool_choice: ToolChoice,
}

/// Remote completion backend for one provider/model pair.
#[derive(Debug)]
pub struct RemoteBackend {
    client: reqwest::Client,
    provider: String,
    model_id: String,
    url: &'static str,
    api_key: String,
}

impl RemoteBackend {
    /// Create a backend for a `provider/model-id` string.
    ///
    /// Fails with [`ConfigError::UnknownProvider`] when the prefix is not in
    /// the provider table.
    pub fn new(model: &str, api_key: String) -> Result<Self, ConfigError> {
        let (provider, model_id) = model
            .split_once('/')
            .ok_or_else(|| ConfigError::UnknownProvider(model.to_string()))?;
        let url = provider_url(provider)?;

        // One shared pool for the whole session: completions are serial but
        // keep-alive across calls matters for latency.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            client,
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            url,
            api_key,
        })
    }

    /// Build a backend with the API key looked up from a credential store,
    /// under the provider name the model string selects.
    pub fn from_store(
        store: &dyn CredentialStore,
        namespace: &str,
        model: &str,
    ) -> Result<Self, ConfigError> {
        let (provider, _) = model
            .split_once('/')
            .ok_or_else(|| ConfigError::UnknownProvider(model.to_string()))?;
        let api_key = store.get(namespace, provider)?;
        Self::new(model, api_key)
    }

    fn model(&self) -> String {
        format!("{}/{}", self.provider, self.model_id)
    }

    /// Attach the attribution and auth headers every request carries.
    fn apply_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE);
        if self.provider != "ollama" {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }
        request
    }

    /// Wrap the system message in a cache-control content part for providers
    /// that support prompt caching through it.
    fn mark_cacheable(&self, messages: &mut [ChatMessage]) {
        if self.provider != "openrouter" || !self.model_id.contains("anthropic") {
            return;
        }

        for message in messages.iter_mut() {
            if message.role != "system" {
                continue;
            }
            if let Some(MessageContent::Text(text)) = message.content.take() {
                message.content = Some(MessageContent::Parts(vec![ContentPart::cached_text(text)]));
            }
        }
    }

    async fn try_completion(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        tool_choice: ToolChoice,
    ) -> Result<ChatCompletion, CallError> {
        let body = ChatCompletionRequest {
            model: &self.model_id,
            messages,
            tools,
            tool_choice,
        };

        let request = self.apply_headers(self.client.post(self.url).json(&body));

        let response = request.send().await.map_err(|err| {
            let message = format!("completion request failed: {}", err);
            if err.is_timeout() || err.is_connect() {
                CallError::Retryable(LlmError::Transport(message))
            } else {
                CallError::Fatal(LlmError::Transport(message))
            }
        })?;

        let status = response.status();

        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            log::error!(
                "API request error:\nRequest: {}\nResponse: {}",
                serde_json::to_string_pretty(&body).unwrap_or_default(),
                text
            );

            if is_tool_use_failed(&text) {
                return Err(CallError::Retryable(LlmError::ToolUseFailed(text)));
            }
            return Err(CallError::Fatal(LlmError::Transport(format!(
                "HTTP {}: {}",
                status, text
            ))));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::Fatal(LlmError::Transport(format!(
                "HTTP {}: {}",
                status, text
            ))));
        }

        response
            .json::<ChatCompletion>()
            .await
            .map_err(|err| CallError::Fatal(LlmError::Decode(err.to_string())))
    }
}

enum CallError {
    Retryable(LlmError),
    Fatal(LlmError),
}

/// Does a 4xx body carry the provider's "model did not call a tool" marker?
fn is_tool_use_failed(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")?
                .get("code")
                .map(|code| code == "tool_use_failed")
        })
        .unwrap_or(false)
}

#[async_trait]
impl CompletionBackend for RemoteBackend {
    async fn completion(
        &self,
        mut messages: Vec<ChatMessage>,
        tools: &[ToolDef],
        tool_choice: ToolChoice,
    ) -> Result<ChatCompletion, LlmError> {
        self.mark_cacheable(&mut messages);

        let start = Instant::now();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_completion(&messages, tools, tool_choice).await {
                Ok(completion) => {
                    log::info!(
                        "Remote LLM completion ({}) took {:.2}s",
                        self.model(),
                        start.elapsed().as_secs_f64()
                    );
                    return Ok(completion);
                }
                Err(CallError::Retryable(err)) if attempt < MAX_ATTEMPTS => {
                    log::warn!(
                        "Completion attempt {}/{} failed, retrying: {}",
                        attempt,
                        MAX_ATTEMPTS,
                        err
                    );
                }
                Err(CallError::Retryable(err)) | Err(CallError::Fatal(err)) => return Err(err),
            }
        }

        Err(LlmError::Transport("completion retries exhausted".to_string()))
    }
}
