/// Completion backend port trait
///
/// The single external call the translator makes. Implementations: remote
/// OpenAI-compatible providers, local llama-server.
use crate::domain::chat::{ChatCompletion, ChatMessage, ToolChoice, ToolDef};
use crate::error::LlmError;
use async_trait::async_trait;

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Perform one chat completion.
    ///
    /// Implementations are expected to retry recoverable failures (the model
    /// not calling a tool, transport timeouts) up to 3 attempts before
    /// returning an error.
    async fn completion(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDef],
        tool_choice: ToolChoice,
    ) -> Result<ChatCompletion, LlmError>;
}
