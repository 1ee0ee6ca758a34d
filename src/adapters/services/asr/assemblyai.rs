//! AssemblyAI streaming transcription adapter
//!
//! Implements the v3 realtime API: a short-lived session token is fetched
//! over HTTPS, then audio is streamed over a WebSocket while turn events come
//! back as JSON text frames.
//! Reference: https://www.assemblyai.com/docs/speech-to-text/universal-streaming

use crate::adapters::audio::AudioStream;
use crate::domain::models::{Turn, Word};
use crate::error::{AppError, AsrError, ConfigError, Result};
use crate::ports::credentials::CredentialStore;
use crate::ports::sink::TranscriptSink;
use chrono::DateTime;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

/// Validity requested for the session token.
const TOKEN_EXPIRES_SECS: u32 = 60;

/// How long to wait for the Termination event after asking for it.
const TERMINATION_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// API region, which selects both the REST and the streaming domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Eu,
    Us,
}

/// Audio encoding accepted by the streaming endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    PcmS16le,
    PcmMulaw,
}

impl Encoding {
    fn as_str(self) -> &'static str {
        match self {
            Encoding::PcmS16le => "pcm_s16le",
            Encoding::PcmMulaw => "pcm_mulaw",
        }
    }
}

/// Streaming session parameters, mapped 1:1 onto the socket URL query.
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub encoding: Encoding,
    pub end_of_turn_confidence_threshold: f32,
    pub format_turns: bool,
    pub inactivity_timeout: Option<Duration>,
    pub keyterms_prompt: Vec<String>,
    pub language_detection: bool,
    pub min_end_of_turn_silence_when_confident: Duration,
    pub max_turn_silence: Duration,
    pub speech_model: String,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            encoding: Encoding::PcmS16le,
            end_of_turn_confidence_threshold: 0.4,
            format_turns: true,
            inactivity_timeout: None,
            keyterms_prompt: Vec::new(),
            language_detection: true,
            min_end_of_turn_silence_when_confident: Duration::from_millis(400),
            max_turn_silence: Duration::from_millis(1280),
            speech_model: "universal-streaming-multilingual".to_string(),
        }
    }
}

/// AssemblyAI streaming client.
pub struct AssemblyAi {
    client: reqwest::Client,
    api_key: String,
    region: Region,
}

impl AssemblyAi {
    /// Create a new client with the given API key, in the EU region.
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            region: Region::Eu,
        }
    }

    /// Build a client with the API key looked up from a credential store.
    pub fn from_store(store: &dyn CredentialStore, namespace: &str) -> Result<Self, ConfigError> {
        let api_key = store.get(namespace, "assemblyai")?;
        Ok(Self::new(api_key))
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    fn streaming_domain(&self) -> &'static str {
        match self.region {
            Region::Eu => "streaming.eu.assemblyai.com",
            Region::Us => "streaming.assemblyai.com",
        }
    }

    /// Fetch a short-lived token binding the upcoming socket to this key.
    pub async fn fetch_stream_token(&self) -> Result<String, AsrError> {
        let url = format!("https://{}/v3/token", self.streaming_domain());

        let response = self
            .client
            .get(&url)
            .query(&[("expires_in_seconds", TOKEN_EXPIRES_SECS.to_string())])
            .header("Authorization", &self.api_key)
            .send()
            .await
            .map_err(|err| AsrError::Auth(format!("token request failed: {}", err)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AsrError::Auth(format!(
                "token request returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|err| {
            AsrError::Protocol(format!("failed to decode token response: {}", err))
        })?;

        Ok(token.token)
    }

    fn stream_url(&self, token: &str, params: &StreamParams) -> Result<Url, AsrError> {
        let mut url = Url::parse(&format!("wss://{}/v3/ws", self.streaming_domain()))
            .map_err(|err| AsrError::Protocol(err.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("sample_rate", &params.sample_rate.to_string());
            query.append_pair("encoding", params.encoding.as_str());
            query.append_pair(
                "end_of_turn_confidence_threshold",
                &params.end_of_turn_confidence_threshold.to_string(),
            );
            query.append_pair("format_turns", bool_str(params.format_turns));
            if let Some(timeout) = params.inactivity_timeout {
                query.append_pair("inactivity_timeout", &timeout.as_secs().to_string());
            }
            for term in &params.keyterms_prompt {
                query.append_pair("keyterms_prompt", term);
            }
            query.append_pair("language_detection", bool_str(params.language_detection));
            query.append_pair(
                "min_end_of_turn_silence_when_confident",
                &params
                    .min_end_of_turn_silence_when_confident
                    .as_millis()
                    .to_string(),
            );
            query.append_pair(
                "max_turn_silence",
                &params.max_turn_silence.as_millis().to_string(),
            );
            query.append_pair("speech_model", &params.speech_model);
            query.append_pair("token", token);
        }

        Ok(url)
    }

    /// Run one streaming session: forward audio chunks from the queue,
    /// deliver decoded events to the sink, terminate gracefully.
    pub async fn stream(
        &self,
        audio: AudioStream,
        sink: Arc<dyn TranscriptSink>,
        params: StreamParams,
    ) -> Result<()> {
        let token = self.fetch_stream_token().await?;
        let url = self.stream_url(&token, &params)?;
        run_session(url.as_str(), audio, sink).await
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Tracks whether the provider acknowledged termination.
#[derive(Default)]
struct ShutdownSignal {
    terminated: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    fn mark_terminated(&self) {
        self.terminated.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    fn terminated(&self) -> bool {
        self.terminated.load(Ordering::Relaxed)
    }

    async fn wait_terminated(&self) {
        while !self.terminated() {
            self.notify.notified().await;
        }
    }
}

/// Drive the socket: TX drains the audio queue, RX dispatches events.
///
/// When TX sees the empty end-of-stream chunk and the provider has not yet
/// acknowledged termination, a `Terminate` frame is sent and the Termination
/// event awaited for at most 5s. The first task failure wins and is
/// propagated after both tasks are stopped.
async fn run_session(url: &str, mut audio: AudioStream, sink: Arc<dyn TranscriptSink>) -> Result<()> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|err| AsrError::Transport(format!("websocket handshake failed: {}", err)))?;

    log::info!("ASR streaming session connected");

    let (write, mut read) = ws.split();
    let writer: Arc<Mutex<WsSink>> = Arc::new(Mutex::new(write));
    let shutdown = Arc::new(ShutdownSignal::default());

    let mut tx_task: JoinHandle<Result<()>> = {
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            loop {
                let chunk = audio.recv().await.map_err(AppError::Source)?;
                if chunk.is_empty() {
                    break;
                }

                let mut writer = writer.lock().await;
                writer.send(Message::Binary(chunk)).await.map_err(|err| {
                    AsrError::Transport(format!("failed to send audio frame: {}", err))
                })?;
            }

            audio.shutdown().await;
            Ok(())
        })
    };

    let mut rx_task: JoinHandle<Result<()>> = {
        let sink = Arc::clone(&sink);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        dispatch_event(&text, sink.as_ref(), &shutdown).await;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        return Err(
                            AsrError::Transport(format!("websocket error: {}", err)).into()
                        );
                    }
                }
            }
            Ok(())
        })
    };

    let mut should_terminate = false;
    let mut failure: Option<AppError> = None;

    tokio::select! {
        res = &mut tx_task => match flatten(res) {
            Ok(()) => should_terminate = true,
            Err(err) => failure = Some(err),
        },
        res = &mut rx_task => {
            if let Err(err) = flatten(res) {
                failure = Some(err);
            }
        }
    }

    if failure.is_none() && should_terminate && !shutdown.terminated() {
        log::debug!("Requesting session termination");
        {
            let mut writer = writer.lock().await;
            if let Err(err) = writer
                .send(Message::Text(r#"{"type":"Terminate"}"#.to_string()))
                .await
            {
                log::warn!("Failed to send Terminate frame: {}", err);
            }
        }

        if tokio::time::timeout(TERMINATION_TIMEOUT, shutdown.wait_terminated())
            .await
            .is_err()
        {
            log::warn!(
                "Termination event not received within {:?}",
                TERMINATION_TIMEOUT
            );
        }
    }

    tx_task.abort();
    rx_task.abort();

    {
        let mut writer = writer.lock().await;
        let _ = writer.close().await;
    }

    match failure {
        Some(err) => Err(err),
        None => {
            log::info!("ASR streaming session closed");
            Ok(())
        }
    }
}

fn flatten(res: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match res {
        Ok(inner) => inner,
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(AsrError::Transport(format!("session task failed: {}", err)).into()),
    }
}

/// Decode one text frame and deliver it. Decode failures and unknown frame
/// types are logged and skipped; the stream keeps going.
async fn dispatch_event(text: &str, sink: &dyn TranscriptSink, shutdown: &ShutdownSignal) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            log::debug!("Skipping non-JSON frame: {}", err);
            return;
        }
    };

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(str::to_owned);

    match kind.as_deref() {
        Some("Begin") => match serde_json::from_value::<BeginEvent>(value) {
            Ok(event) => {
                let Some(expires_at) = DateTime::from_timestamp(event.expires_at as i64, 0) else {
                    log::warn!("Begin event with out-of-range expiry {}", event.expires_at);
                    return;
                };
                sink.session_begins(event.id, expires_at).await;
            }
            Err(err) => log::warn!("Failed to decode Begin event: {}", err),
        },
        Some("Turn") => match serde_json::from_value::<TurnEvent>(value) {
            Ok(event) => sink.turn(event.into_turn()).await,
            Err(err) => log::warn!("Failed to decode Turn event: {}", err),
        },
        Some("Termination") => match serde_json::from_value::<TerminationEvent>(value) {
            Ok(event) => {
                sink.termination(
                    Duration::from_secs_f64(event.audio_duration_seconds),
                    Duration::from_secs_f64(event.session_duration_seconds),
                )
                .await;
                shutdown.mark_terminated();
            }
            Err(err) => log::warn!("Failed to decode Termination event: {}", err),
        },
        other => log::debug!("Ignoring unknown frame type {:?}", other),
    }
}

// ===== API Request/Response Types =====

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct BeginEvent {
    id: Uuid,
    expires_at: f64,
}

#[derive(Debug, Deserialize)]
struct TurnEvent {
    turn_order: u64,
    end_of_turn: bool,
    transcript: String,
    words: Vec<WireWord>,
    #[serde(default)]
    language_code: Option<String>,
    #[serde(default)]
    language_confidence: Option<f32>,
}

impl TurnEvent {
    fn into_turn(self) -> Turn {
        Turn {
            id: self.turn_order,
            text: self.transcript,
            is_final: self.end_of_turn,
            words: self.words.into_iter().map(WireWord::into_word).collect(),
            language_code: self.language_code.filter(|code| !code.is_empty()),
            language_confidence: self.language_confidence,
        }
    }
}

/// Word as it appears on the wire: offsets in milliseconds.
#[derive(Debug, Deserialize)]
struct WireWord {
    text: String,
    start: u64,
    end: u64,
    confidence: f32,
    #[serde(default)]
    word_is_final: bool,
    #[serde(default)]
    speaker: Option<String>,
}

impl WireWord {
    fn into_word(self) -> Word {
        Word {
            text: self.text,
            start: Duration::from_millis(self.start),
            end: Duration::from_millis(self.end),
            confidence: self.confidence,
            is_final: self.word_is_final,
            speaker: self.speaker,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TerminationEvent {
    audio_duration_seconds: f64,
    session_duration_seconds: f64,
}
