/// Error types for livecap
///
/// Uses thiserror for ergonomic error handling with proper Display implementations.
use thiserror::Error;

/// Audio source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio decoder failed: {0}")]
    DecoderFailed(String),
}

/// ASR streaming session errors
#[derive(Error, Debug)]
pub enum AsrError {
    #[error("ASR authentication failed: {0}")]
    Auth(String),

    #[error("ASR transport error: {0}")]
    Transport(String),

    #[error("ASR protocol error: {0}")]
    Protocol(String),
}

/// LLM completion backend errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("Model did not call a tool: {0}")]
    ToolUseFailed(String),

    #[error("Failed to decode LLM response: {0}")]
    Decode(String),
}

/// Configuration and credential errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing credential for {namespace}:{provider}")]
    MissingCredential { namespace: String, provider: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio source error: {0}")]
    Source(#[from] SourceError),

    #[error("ASR session error: {0}")]
    Asr(#[from] AsrError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for convenience
pub type Result<T, E = AppError> = std::result::Result<T, E>;
