/// Translator port trait
use crate::domain::models::Turn;
use crate::ports::sink::TranslationSink;
use async_trait::async_trait;
use std::sync::Arc;

/// Contract for a translation system fed by evolving turn snapshots.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Hand the translator the latest snapshot of all source turns.
    ///
    /// Non-blocking and callable from any task. Snapshots queued while a
    /// translation step is in flight may be superseded by newer ones; only
    /// the latest matters.
    fn update_turns(&self, turns: Vec<Turn>);

    /// Drive translation forever, delivering updates to the sink at each
    /// incremental step. Run this in its own task; it only returns when the
    /// task is cancelled.
    async fn process(&self, sink: Arc<dyn TranslationSink>);
}
