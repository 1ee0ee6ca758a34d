/// Port trait definitions (interfaces)
///
/// These traits define the contracts for adapters to implement.
/// Following the ports-and-adapters (hexagonal) architecture pattern.
pub mod completion;
pub mod credentials;
pub mod sink;
pub mod translator;

#[cfg(test)]
pub mod mocks;

pub use completion::CompletionBackend;
pub use credentials::CredentialStore;
pub use sink::{TranscriptSink, TranslationSink};
pub use translator::Translator;
