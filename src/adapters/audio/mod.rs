//! Audio sources
//!
//! Every source yields the same thing: a bounded queue of raw PCM chunks
//! (16-bit little-endian, mono) wrapped in an [`AudioStream`] whose drop
//! releases the capture thread or decoder subprocess. An empty chunk signals
//! end of stream.

#[cfg(target_os = "linux")]
pub mod mic;
pub mod replay;

#[cfg(target_os = "linux")]
pub use mic::MicSource;
pub use replay::ReplaySource;

use crate::error::SourceError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;

/// Audio capture configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Target duration of one chunk.
    pub buffer_duration: Duration,

    /// Upper bound on audio buffered between producer and consumer. Sets the
    /// queue capacity; a full queue blocks the producer.
    pub max_latency: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000, // 16kHz is standard for speech recognition
            buffer_duration: Duration::from_millis(100),
            max_latency: Duration::from_secs(3),
        }
    }
}

impl SourceConfig {
    /// Samples per chunk.
    pub fn frames_per_buffer(&self) -> usize {
        (self.sample_rate as f64 * self.buffer_duration.as_secs_f64()).round() as usize
    }

    /// Bytes per chunk (16-bit mono).
    pub fn chunk_bytes(&self) -> usize {
        self.frames_per_buffer() * 2
    }

    /// Queue slots between producer and consumer.
    pub fn queue_capacity(&self) -> usize {
        let slots =
            (self.max_latency.as_secs_f64() / self.buffer_duration.as_secs_f64()).round() as usize;
        slots.max(1)
    }

    /// Real-time playback duration of `len` PCM bytes.
    pub fn byte_duration(&self, len: usize) -> Duration {
        Duration::from_secs_f64(len as f64 / (self.sample_rate as f64 * 2.0))
    }
}

pub(crate) type SharedChild = Arc<tokio::sync::Mutex<Option<Child>>>;
pub(crate) type ErrorSlot = Arc<StdMutex<Option<SourceError>>>;

/// Record a producer-side failure for the consumer to pick up once the
/// queue drains.
pub(crate) fn set_error(slot: &ErrorSlot, err: SourceError) {
    match slot.lock() {
        Ok(mut slot) => *slot = Some(err),
        Err(poisoned) => *poisoned.into_inner() = Some(err),
    }
}

/// A scoped stream of PCM chunks.
///
/// Holds whatever produces the audio (capture thread or decoder subprocess)
/// and releases it on [`AudioStream::shutdown`] or drop.
#[derive(Debug)]
pub struct AudioStream {
    rx: mpsc::Receiver<Vec<u8>>,
    error: ErrorSlot,
    guard: Option<Guard>,
}

#[derive(Debug)]
enum Guard {
    /// A capture thread watching a stop flag.
    Thread { stop: Arc<AtomicBool> },

    /// A feeder task reading a decoder subprocess.
    Process { feeder: tokio::task::JoinHandle<()>, child: SharedChild },
}

impl AudioStream {
    pub(crate) fn thread_backed(
        rx: mpsc::Receiver<Vec<u8>>,
        error: ErrorSlot,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rx,
            error,
            guard: Some(Guard::Thread { stop }),
        }
    }

    pub(crate) fn process_backed(
        rx: mpsc::Receiver<Vec<u8>>,
        error: ErrorSlot,
        feeder: tokio::task::JoinHandle<()>,
        child: SharedChild,
    ) -> Self {
        Self {
            rx,
            error,
            guard: Some(Guard::Process { feeder, child }),
        }
    }

    /// Next chunk of PCM bytes. An empty chunk means end of stream; a closed
    /// queue is reported as end of stream too, unless the producer recorded
    /// a failure.
    pub async fn recv(&mut self) -> Result<Vec<u8>, SourceError> {
        match self.rx.recv().await {
            Some(chunk) => Ok(chunk),
            None => {
                let failure = match self.error.lock() {
                    Ok(mut slot) => slot.take(),
                    Err(poisoned) => poisoned.into_inner().take(),
                };
                match failure {
                    Some(err) => Err(err),
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    /// Release the underlying capture, waiting for the decoder subprocess to
    /// exit (5 s grace, then kill).
    pub async fn shutdown(mut self) {
        if let Some(guard) = self.guard.take() {
            match guard {
                Guard::Thread { stop } => stop.store(true, Ordering::Relaxed),
                Guard::Process { feeder, child } => {
                    feeder.abort();
                    terminate_decoder(child).await;
                }
            }
        }
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            match guard {
                Guard::Thread { stop } => stop.store(true, Ordering::Relaxed),
                Guard::Process { feeder, child } => {
                    feeder.abort();
                    // Best effort without an async context of our own.
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        handle.spawn(terminate_decoder(child));
                    }
                }
            }
        }
    }
}

/// Stop the decoder subprocess: SIGTERM, 5 s grace, then SIGKILL.
pub(crate) async fn terminate_decoder(child: SharedChild) {
    let Some(mut child) = child.lock().await.take() else {
        return;
    };

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
        Ok(Ok(status)) => log::debug!("Decoder exited with {}", status),
        Ok(Err(err)) => log::warn!("Failed to reap decoder: {}", err),
        Err(_) => {
            log::warn!("Decoder did not exit within 5s, killing it");
            if let Err(err) = child.kill().await {
                log::warn!("Failed to kill decoder: {}", err);
            }
        }
    }
}
