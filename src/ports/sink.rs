/// Sink port traits
///
/// The display layer (terminal UI, file writer, ...) implements these to
/// receive source turns and translated turns. Both kinds of turns are
/// revisable: the same id may arrive again with different content.
use crate::domain::models::{TranslatedTurn, Turn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Callback trait for ASR session events.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    /// Called once when the provider confirms the session.
    async fn session_begins(&self, session_id: Uuid, expires_at: DateTime<Utc>) {
        log::debug!("ASR session {} begins, token expires {}", session_id, expires_at);
    }

    /// Called for every turn event, including in-place revisions.
    async fn turn(&self, turn: Turn);

    /// Called when the provider acknowledges the end of the session.
    async fn termination(&self, audio_duration: Duration, session_duration: Duration) {
        log::debug!(
            "ASR session terminated: {:.1}s audio over {:.1}s",
            audio_duration.as_secs_f64(),
            session_duration.as_secs_f64()
        );
    }
}

/// Callback trait for translator output.
#[async_trait]
pub trait TranslationSink: Send + Sync {
    /// Receives the full visible translated list after each translation
    /// step, whether individual turns changed or not.
    async fn receive_translations(&self, turns: Vec<TranslatedTurn>);
}
