//! ASR (Automatic Speech Recognition) service adapters
//!
//! Streaming transcription over the provider's realtime WebSocket API.

pub mod assemblyai;

pub use assemblyai::{AssemblyAi, Encoding, Region, StreamParams};
