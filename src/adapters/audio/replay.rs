//! File replay audio source
//!
//! Decodes an audio file to raw PCM through a subprocess (ffmpeg by default)
//! and feeds it into the queue at real-time pace, so a replayed file drives
//! the pipeline exactly like a live microphone would.

use crate::adapters::audio::{set_error, AudioStream, ErrorSlot, SharedChild, SourceConfig};
use crate::error::SourceError;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Audio source that replays a file through a decoder subprocess.
pub struct ReplaySource {
    pub config: SourceConfig,
    pub path: PathBuf,

    /// Decoder command override (program + arguments). The command must write
    /// 16-bit little-endian mono PCM at the configured sample rate to stdout.
    /// `None` uses ffmpeg.
    pub decoder: Option<Vec<String>>,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>, config: SourceConfig) -> Self {
        Self {
            config,
            path: path.into(),
            decoder: None,
        }
    }

    fn decoder_command(&self) -> Vec<String> {
        if let Some(command) = &self.decoder {
            return command.clone();
        }

        vec![
            "ffmpeg".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            self.path.to_string_lossy().into_owned(),
            "-f".to_string(),
            "s16le".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            self.config.sample_rate.to_string(),
            "pipe:1".to_string(),
        ]
    }

    /// Spawn the decoder and the paced feeder task.
    pub async fn open(&self) -> Result<AudioStream, SourceError> {
        let command = self.decoder_command();
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SourceError::DecoderFailed("empty decoder command".to_string()))?;

        log::info!("Starting decoder: {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                SourceError::DecoderFailed(format!("failed to spawn {}: {}", program, err))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            SourceError::DecoderFailed("decoder stdout was not captured".to_string())
        })?;

        let (tx, rx) = mpsc::channel(self.config.queue_capacity());
        let child: SharedChild = Arc::new(tokio::sync::Mutex::new(Some(child)));
        let error: ErrorSlot = Arc::new(StdMutex::new(None));

        let feeder = tokio::spawn(feed_and_reap(
            stdout,
            tx,
            self.config.clone(),
            Arc::clone(&child),
            Arc::clone(&error),
        ));

        Ok(AudioStream::process_backed(rx, error, feeder, child))
    }
}

/// Feed fixed-size chunks from the decoder into the queue, paced to real
/// time, then reap the subprocess and emit the end-of-stream marker.
async fn feed_and_reap(
    stdout: impl AsyncRead + Unpin,
    tx: mpsc::Sender<Vec<u8>>,
    config: SourceConfig,
    child: SharedChild,
    error: ErrorSlot,
) {
    if !feed_chunks(stdout, &tx, &config).await {
        // Consumer went away; the stream guard tears the decoder down.
        return;
    }

    let Some(mut child) = child.lock().await.take() else {
        return;
    };

    match child.wait().await {
        Ok(status) if status.success() => {
            let _ = tx.send(Vec::new()).await;
        }
        Ok(status) => {
            log::error!("Decoder exited with {}", status);
            set_error(
                &error,
                SourceError::DecoderFailed(format!("decoder exited with {}", status)),
            );
        }
        Err(err) => {
            log::error!("Failed to await decoder: {}", err);
            set_error(
                &error,
                SourceError::DecoderFailed(format!("failed to await decoder: {}", err)),
            );
        }
    }
}

/// Read `chunk_bytes`-sized blocks and deliver them at playback speed.
///
/// Returns `true` when the reader reached end of input, `false` when the
/// consumer side of the queue is gone.
async fn feed_chunks(
    mut reader: impl AsyncRead + Unpin,
    tx: &mpsc::Sender<Vec<u8>>,
    config: &SourceConfig,
) -> bool {
    let chunk_bytes = config.chunk_bytes();

    loop {
        let mut buf = vec![0u8; chunk_bytes];
        let mut filled = 0;

        while filled < chunk_bytes {
            match reader.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) => {
                    log::warn!("Decoder read failed: {}", err);
                    break;
                }
            }
        }

        if filled == 0 {
            return true;
        }
        buf.truncate(filled);

        let pause = config.byte_duration(filled);

        if tx.send(buf).await.is_err() {
            return false;
        }

        tokio::time::sleep(pause).await;
    }
}
