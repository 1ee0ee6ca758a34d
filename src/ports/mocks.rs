//! Mock implementations for testing

use crate::domain::chat::{ChatCompletion, ChatMessage, ToolChoice, ToolDef};
use crate::domain::models::{TranslatedTurn, Turn};
use crate::error::{ConfigError, LlmError};
use crate::ports::completion::CompletionBackend;
use crate::ports::credentials::CredentialStore;
use crate::ports::sink::{TranscriptSink, TranslationSink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Completion backend that replays a scripted list of responses.
///
/// When the script runs out it answers with a plain assistant message and no
/// tool calls, which exercises the zero-tool-call path.
#[derive(Default)]
pub struct ScriptedBackend {
    responses: Mutex<Vec<ChatCompletion>>,
    /// Every request's messages, for asserting on conversation assembly.
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<ChatCompletion>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: ChatCompletion) {
        self.responses.lock().unwrap().push(response);
    }

    /// Build a one-choice completion around an assistant message.
    pub fn completion_of(message: ChatMessage) -> ChatCompletion {
        serde_json::from_value(serde_json::json!({
            "choices": [{"message": serde_json::to_value(message).unwrap()}]
        }))
        .unwrap()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn completion(
        &self,
        messages: Vec<ChatMessage>,
        _tools: &[ToolDef],
        _tool_choice: ToolChoice,
    ) -> Result<ChatCompletion, LlmError> {
        self.requests.lock().unwrap().push(messages);

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(Self::completion_of(ChatMessage::assistant("No response")));
        }
        Ok(responses.remove(0))
    }
}

/// Completion backend that always fails, for the translated-empty path.
pub struct FailingBackend;

#[async_trait]
impl CompletionBackend for FailingBackend {
    async fn completion(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: &[ToolDef],
        _tool_choice: ToolChoice,
    ) -> Result<ChatCompletion, LlmError> {
        Err(LlmError::Transport("backend down".to_string()))
    }
}

/// Transcript sink that records every turn it receives.
#[derive(Clone, Default)]
pub struct CollectingTranscriptSink {
    pub turns: Arc<Mutex<Vec<Turn>>>,
}

#[async_trait]
impl TranscriptSink for CollectingTranscriptSink {
    async fn turn(&self, turn: Turn) {
        self.turns.lock().unwrap().push(turn);
    }
}

/// Translation sink that records every delivered batch.
#[derive(Clone, Default)]
pub struct CollectingTranslationSink {
    pub batches: Arc<Mutex<Vec<Vec<TranslatedTurn>>>>,
}

impl CollectingTranslationSink {
    pub fn last_batch(&self) -> Vec<TranslatedTurn> {
        self.batches.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TranslationSink for CollectingTranslationSink {
    async fn receive_translations(&self, turns: Vec<TranslatedTurn>) {
        self.batches.lock().unwrap().push(turns);
    }
}

/// In-memory credential store keyed by "namespace:provider".
#[derive(Default)]
pub struct MemoryStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn with(namespace: &str, provider: &str, secret: &str) -> Self {
        let store = Self::default();
        store
            .secrets
            .lock()
            .unwrap()
            .insert(format!("{}:{}", namespace, provider), secret.to_string());
        store
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, namespace: &str, provider: &str) -> Result<String, ConfigError> {
        self.secrets
            .lock()
            .unwrap()
            .get(&format!("{}:{}", namespace, provider))
            .cloned()
            .ok_or_else(|| ConfigError::MissingCredential {
                namespace: namespace.to_string(),
                provider: provider.to_string(),
            })
    }
}

/// Build an assistant message carrying the given raw tool calls.
pub fn assistant_with_tool_calls(calls: serde_json::Value) -> ChatMessage {
    serde_json::from_value(serde_json::json!({
        "role": "assistant",
        "tool_calls": calls,
    }))
    .unwrap()
}

/// Shorthand for a scripted `translate` tool call.
pub fn translate_call(id: &str, speaker: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "type": "function",
        "function": {
            "name": "translate",
            "arguments": serde_json::json!({"speaker": speaker, "text": text}).to_string(),
        },
    })
}

/// Shorthand for a scripted `delete_turn` tool call.
pub fn delete_call(id: &str, turn_id: u64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "type": "function",
        "function": {
            "name": "delete_turn",
            "arguments": serde_json::json!({"turn_id": turn_id}).to_string(),
        },
    })
}
