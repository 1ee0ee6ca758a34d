/// Domain layer - core pipeline logic
///
/// Transcription/translation entities, the turn store, and the incremental
/// translator. Everything here is provider-agnostic; external calls go
/// through the ports.
pub mod chat;
pub mod models;
pub mod prompts;
pub mod translator;
pub mod turn_store;

pub use models::{TranslatedTurn, Turn, Word};
pub use translator::{LlmTranslator, TranslationEntry, TranslatorConfig};
pub use turn_store::TurnStore;
