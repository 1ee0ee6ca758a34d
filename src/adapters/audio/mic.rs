//! Linux PulseAudio microphone capture
//!
//! Capture runs on a dedicated OS thread doing blocking reads from a
//! PulseAudio record stream, one chunk at a time, pushing into the bounded
//! queue with `blocking_send`. A full queue therefore blocks the capture
//! thread, which is exactly the back-pressure the pipeline wants.

use crate::adapters::audio::{set_error, AudioStream, ErrorSlot, SourceConfig};
use crate::error::SourceError;
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;

const APP_NAME: &str = "livecap";

/// Microphone audio source.
pub struct MicSource {
    pub config: SourceConfig,

    /// PulseAudio source name. `None` uses the default input device.
    pub device: Option<String>,
}

impl MicSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            device: None,
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Start the capture thread and hand back the chunk queue.
    ///
    /// Fails with [`SourceError::DeviceUnavailable`] when the record stream
    /// cannot be opened; a read failure mid-stream is recorded and surfaces
    /// from [`AudioStream::recv`] once the queue drains. The thread stops
    /// promptly once the returned stream is shut down or dropped.
    pub async fn open(&self) -> Result<AudioStream, SourceError> {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity());
        let stop = Arc::new(AtomicBool::new(false));
        let error: ErrorSlot = Arc::new(StdMutex::new(None));
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        let spec = Spec {
            format: Format::S16le,
            channels: 1,
            rate: self.config.sample_rate,
        };
        let chunk_bytes = self.config.chunk_bytes();
        let device = self.device.clone();
        let thread_stop = Arc::clone(&stop);
        let thread_error = Arc::clone(&error);

        std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                capture_loop(spec, device, chunk_bytes, tx, thread_stop, thread_error, ready_tx)
            })
            .map_err(|err| {
                SourceError::DeviceUnavailable(format!("failed to spawn capture thread: {}", err))
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(AudioStream::thread_backed(rx, error, stop)),
            Ok(Err(message)) => Err(SourceError::DeviceUnavailable(message)),
            Err(_) => Err(SourceError::DeviceUnavailable(
                "capture thread exited before opening the device".to_string(),
            )),
        }
    }
}

/// One blocking device read. Abstracted so the pump loop can be exercised
/// without a live PulseAudio server.
trait BlockingRead {
    fn read_chunk(&self, buf: &mut [u8]) -> Result<(), String>;
}

impl BlockingRead for Simple {
    fn read_chunk(&self, buf: &mut [u8]) -> Result<(), String> {
        self.read(buf).map_err(|err| format!("{}", err))
    }
}

/// Open the record stream and pump it until stopped.
fn capture_loop(
    spec: Spec,
    device: Option<String>,
    chunk_bytes: usize,
    tx: mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
    error: ErrorSlot,
    ready: tokio::sync::oneshot::Sender<Result<(), String>>,
) {
    let simple = match Simple::new(
        None,                // Use default server
        APP_NAME,            // Application name
        Direction::Record,   // Recording
        device.as_deref(),   // Input device, default when None
        "microphone capture",
        &spec,
        None, // Use default channel map
        None, // Use default buffering attributes
    ) {
        Ok(simple) => {
            let _ = ready.send(Ok(()));
            simple
        }
        Err(err) => {
            let _ = ready.send(Err(format!("failed to open record stream: {}", err)));
            return;
        }
    };

    log::info!(
        "Microphone capture started: {} Hz mono, {} byte chunks",
        spec.rate,
        chunk_bytes
    );

    pump_device(&simple, chunk_bytes, tx, stop, error);

    log::info!("Microphone capture thread stopped");
}

/// Blocking pump: read a chunk, hand it to the queue, repeat until the stop
/// flag is raised or the device fails. A read failure is recorded in the
/// error slot so the consumer sees it instead of a clean end of stream.
fn pump_device(
    device: &impl BlockingRead,
    chunk_bytes: usize,
    tx: mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
    error: ErrorSlot,
) {
    let mut buf = vec![0u8; chunk_bytes];

    while !stop.load(Ordering::Relaxed) {
        match device.read_chunk(&mut buf) {
            Ok(()) => {
                // Blocks when the queue is full; ring overflow on the OS side
                // is absorbed by PulseAudio and not an error here.
                if tx.blocking_send(buf.clone()).is_err() {
                    break;
                }
            }
            Err(err) => {
                log::error!("Failed to read from PulseAudio: {}", err);
                set_error(
                    &error,
                    SourceError::DeviceUnavailable(format!(
                        "failed to read from audio device: {}",
                        err
                    )),
                );
                break;
            }
        }
    }
}
