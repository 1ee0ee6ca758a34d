/// Domain models for livecap
///
/// These models represent the transcription and translation entities and are
/// provider-agnostic.
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single recognized word within a turn.
///
/// Words are immutable once observed, but a later event for the same turn may
/// replace the word at the same position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,

    /// Offset from the stream origin.
    pub start: Duration,

    /// Offset from the stream origin.
    pub end: Duration,

    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,

    /// Whether the ASR considers this word settled.
    pub is_final: bool,

    /// Speaker label from diarization, when the provider returns one.
    pub speaker: Option<String>,
}

/// One unit of transcribed speech.
///
/// Turns with the same `id` are updated in place by subsequent ASR events;
/// `id` order equals chronological utterance order. A turn stays revisable
/// until a strictly greater id has appeared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Monotonically increasing id assigned by the ASR provider.
    pub id: u64,

    /// Full transcript as rendered by the ASR.
    pub text: String,

    /// End-of-turn flag from the provider.
    pub is_final: bool,

    pub words: Vec<Word>,

    /// Detected language, when language detection is enabled.
    pub language_code: Option<String>,

    pub language_confidence: Option<f32>,
}

impl Turn {
    /// A bare turn with only id and text, words split on whitespace.
    /// Convenience for tests and tooling.
    pub fn from_text(id: u64, text: &str, speaker: Option<&str>) -> Self {
        let words = text
            .split_whitespace()
            .map(|w| Word {
                text: w.to_string(),
                start: Duration::ZERO,
                end: Duration::ZERO,
                confidence: 1.0,
                is_final: true,
                speaker: speaker.map(str::to_string),
            })
            .collect();

        Self {
            id,
            text: text.to_string(),
            is_final: true,
            words,
            language_code: None,
            language_confidence: None,
        }
    }
}

/// A turn of speech after translation and post-processing.
///
/// These turns are never final: further context can change the meaning of
/// previously said things, so consumers must be ready for updates. The `id`
/// is stable and monotonic within a session; `original_id` maps back to the
/// source turn (not necessarily 1:1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedTurn {
    /// Translator-assigned id: never reused, never decreasing.
    pub id: u64,

    /// Source turn this derives from.
    pub original_id: u64,

    pub speaker: String,

    pub text: String,

    pub start: Option<Duration>,

    pub end: Option<Duration>,

    /// True when the translator retracted this entry. The id slot is kept.
    pub hidden: bool,

    /// Optional diagnostic payload for inspection tooling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,
}

impl TranslatedTurn {
    pub fn new(id: u64, original_id: u64, speaker: String, text: String) -> Self {
        Self {
            id,
            original_id,
            speaker,
            text,
            start: None,
            end: None,
            hidden: false,
            debug: None,
        }
    }

    /// Placeholder occupying an id slot consumed by a deletion.
    pub fn hidden_slot(id: u64, original_id: u64) -> Self {
        Self {
            id,
            original_id,
            speaker: String::new(),
            text: String::new(),
            start: None,
            end: None,
            hidden: true,
            debug: None,
        }
    }
}
