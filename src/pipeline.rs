//! Session wiring
//!
//! Connects the pieces for one live session: audio chunks flow into the ASR
//! socket, decoded turns land in the turn store and fan out to the caller's
//! sink and to the translator, whose driver task feeds the translation sink.

use crate::adapters::audio::AudioStream;
use crate::adapters::services::asr::{AssemblyAi, StreamParams};
use crate::domain::models::Turn;
use crate::domain::turn_store::TurnStore;
use crate::error::Result;
use crate::ports::sink::{TranscriptSink, TranslationSink};
use crate::ports::translator::Translator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use uuid::Uuid;

/// Sink adapter that maintains the turn store.
///
/// The store is written here and nowhere else. Every accepted turn is
/// forwarded to the caller's sink, and the translator receives a fresh
/// id-ordered snapshot.
struct TurnStoreSink {
    store: StdMutex<TurnStore>,
    forward: Arc<dyn TranscriptSink>,
    translator: Option<Arc<dyn Translator>>,
}

#[async_trait]
impl TranscriptSink for TurnStoreSink {
    async fn session_begins(&self, session_id: Uuid, expires_at: DateTime<Utc>) {
        self.forward.session_begins(session_id, expires_at).await;
    }

    async fn turn(&self, turn: Turn) {
        // Keep-alive turns with no content yet.
        if turn.text.trim().is_empty() {
            return;
        }

        let snapshot = {
            let mut store = match self.store.lock() {
                Ok(store) => store,
                Err(poisoned) => poisoned.into_inner(),
            };
            store.upsert(turn.clone());
            store.snapshot()
        };

        self.forward.turn(turn).await;

        if let Some(translator) = &self.translator {
            translator.update_turns(snapshot);
        }
    }

    async fn termination(&self, audio_duration: Duration, session_duration: Duration) {
        self.forward.termination(audio_duration, session_duration).await;
    }
}

/// Run one captioning session to completion.
///
/// The translator driver runs as a sibling task for the duration of the ASR
/// session and is cancelled when the session ends, whatever the exit path.
pub async fn run_live(
    audio: AudioStream,
    asr: &AssemblyAi,
    params: StreamParams,
    transcript_sink: Arc<dyn TranscriptSink>,
    translation: Option<(Arc<dyn Translator>, Arc<dyn TranslationSink>)>,
) -> Result<()> {
    let mut translator = None;
    let mut driver = None;

    if let Some((t, translation_sink)) = translation {
        translator = Some(Arc::clone(&t));
        driver = Some(tokio::spawn(async move {
            t.process(translation_sink).await;
        }));
    }

    let store_sink = Arc::new(TurnStoreSink {
        store: StdMutex::new(TurnStore::new()),
        forward: transcript_sink,
        translator,
    });

    let result = asr.stream(audio, store_sink, params).await;

    if let Some(driver) = driver {
        driver.abort();
    }

    result
}
