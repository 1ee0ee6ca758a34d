//! livecap - live speech captioning and translation pipeline
//!
//! Ingests a real-time audio stream (microphone or decoded file), drives a
//! streaming ASR session to obtain incrementally revised transcription turns,
//! and feeds the evolving turns into an incremental LLM translator that
//! emits a stable, revisable stream of translated utterances.
//!
//! The display layer, CLI and secret management live outside this crate;
//! they plug in through the sink, source and credential ports.

pub mod adapters;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod ports;
pub mod utils;

pub use adapters::audio::{AudioStream, ReplaySource, SourceConfig};
#[cfg(target_os = "linux")]
pub use adapters::audio::MicSource;
pub use adapters::services::asr::{AssemblyAi, Encoding, Region, StreamParams};
pub use adapters::services::llm::{LocalBackend, RemoteBackend};
pub use domain::{LlmTranslator, TranslatedTurn, TranslatorConfig, Turn, TurnStore, Word};
pub use error::{AppError, AsrError, ConfigError, LlmError, Result, SourceError};
pub use pipeline::run_live;
pub use ports::{CompletionBackend, CredentialStore, TranscriptSink, TranslationSink, Translator};
pub use utils::KeychainStore;
