//! LLM completion backends
//!
//! Implementations of the CompletionBackend port:
//! - Remote: any OpenAI-compatible provider, selected by model prefix
//! - Local: llama-server style endpoint on localhost

pub mod local;
pub mod remote;

pub use local::LocalBackend;
pub use remote::RemoteBackend;
