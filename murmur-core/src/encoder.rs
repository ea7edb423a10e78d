//! Push-based encode session.
//!
//! ## Design
//!
//! ```text
//!  caller thread                         writer thread
//!  ─────────────                         ─────────────
//!  write(bytes) ─▶ widen ─▶ [conversion buffer]
//!                               │ full / flush
//!                               ▼
//!                        Mutex<WriterQueue> ──wake──▶ detach batch
//!                                                        │ (lock released)
//!                                                        ▼
//!                                                 EncodeEngine frames
//! ```
//!
//! Submitted PCM is widened to 32-bit samples into a conversion buffer on
//! the caller's thread; full buffers are handed to a background writer
//! through an unbounded FIFO so `write` never blocks on the encoder or the
//! disk. The writer detaches the whole queue under the lock and encodes
//! outside it. A chunk that keeps failing is dropped along with the rest of
//! its detached batch; later batches are still processed, so a transient
//! write failure costs audio but never wedges the session.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::codec::block::BlockEncodeEngine;
use crate::codec::{EncodeEngine, EncoderParams};
use crate::error::{CodecError, Result};
use crate::sample::{AmplitudeTracker, SampleWidth};

/// Samples buffered on the caller thread before handing off to the writer.
const CONVERSION_BUFFER_SAMPLES: usize = 32_768;

/// Attempts per chunk before the writer gives up on it.
const WRITE_RETRY_LIMIT: u32 = 3;

/// Pause between write attempts.
const RETRY_DELAY: Duration = Duration::from_millis(5);

#[derive(Default)]
struct WriterQueue {
    pending: VecDeque<Vec<i32>>,
    shutdown: bool,
    dropped: u64,
}

struct Shared {
    queue: Mutex<WriterQueue>,
    available: Condvar,
}

/// Push-based adapter from interleaved PCM to a compressed stream.
///
/// Amplitude statistics are gathered on the submission path and read
/// destructively: [`EncodeSession::max_amplitude`] and
/// [`EncodeSession::average_amplitude`] each reset their accumulator.
pub struct EncodeSession {
    shared: Arc<Shared>,
    writer: Option<JoinHandle<()>>,
    params: EncoderParams,
    width: SampleWidth,
    channels: usize,
    /// Widened samples not yet handed to the writer.
    pending: Vec<i32>,
    amplitude: AmplitudeTracker,
    /// Individual samples submitted (all channels).
    submitted: u64,
}

impl EncodeSession {
    /// Create `path` with the default block codec engine and start the
    /// writer thread.
    pub fn create(path: &Path, sample_rate: u32, channels: u32, bits_per_sample: u32) -> Result<Self> {
        let params = EncoderParams::new(sample_rate, channels, bits_per_sample);
        let engine = BlockEncodeEngine::create(path, &params)?;
        Self::with_engine(Box::new(engine), params)
    }

    /// Wrap an already-constructed engine. The engine moves to the writer
    /// thread and is only ever driven from there.
    pub fn with_engine(engine: Box<dyn EncodeEngine>, params: EncoderParams) -> Result<Self> {
        params.validate()?;
        let width = SampleWidth::from_bits(params.bits_per_sample)
            .ok_or(CodecError::UnsupportedBitDepth(params.bits_per_sample))?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(WriterQueue::default()),
            available: Condvar::new(),
        });

        let writer = thread::Builder::new()
            .name("murmur-writer".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || writer_loop(&shared, engine)
            })
            .map_err(|e| CodecError::WriterSpawn(e.to_string()))?;

        debug!(
            sample_rate = params.sample_rate,
            channels = params.channels,
            bits = params.bits_per_sample,
            "encode session started"
        );

        Ok(Self {
            shared,
            writer: Some(writer),
            channels: params.channels as usize,
            amplitude: AmplitudeTracker::new(params.channels),
            params,
            width,
            pending: Vec::with_capacity(CONVERSION_BUFFER_SAMPLES),
            submitted: 0,
        })
    }

    /// Submit interleaved little-endian PCM bytes at the session's width.
    ///
    /// Returns the number of bytes consumed; a trailing partial sample is
    /// left unconsumed. Never blocks on the encoder: samples are buffered
    /// and handed to the writer thread when the conversion buffer fills. A
    /// request larger than the buffer flushes straight through as one
    /// dedicated chunk.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let step = self.width.bytes();
        let whole = bytes.len() / step * step;
        let samples = whole / step;
        if samples == 0 {
            return 0;
        }

        // Lacking room for the new data, hand the current buffer to the
        // writer before converting.
        if self.pending.len() + samples > CONVERSION_BUFFER_SAMPLES {
            self.flush_pending();
        }

        let start = self.pending.len();
        self.width.widen(&bytes[..whole], &mut self.pending);
        self.amplitude.record(&self.pending[start..], self.width);
        self.submitted += samples as u64;

        if self.pending.len() >= CONVERSION_BUFFER_SAMPLES {
            // Oversized request: goes out immediately as one dedicated
            // chunk instead of waiting for more data.
            self.flush_pending();
        }
        whole
    }

    /// Hand everything buffered so far to the writer thread.
    pub fn flush(&mut self) {
        self.flush_pending();
    }

    /// Flush remaining samples, stop the writer and wait for the stream to
    /// be finalised. Returns the number of chunks dropped after repeated
    /// write failures (0 for a clean run).
    pub fn finish(mut self) -> u64 {
        self.shutdown_and_join()
    }

    /// Peak amplitude since the last call, normalised so full scale is 1.0.
    pub fn max_amplitude(&mut self) -> f32 {
        self.amplitude.take_peak()
    }

    /// Mean amplitude since the last call, sampled once per channel group.
    /// Returns 0.0 when nothing was submitted since the last call.
    pub fn average_amplitude(&mut self) -> f32 {
        self.amplitude.take_average()
    }

    /// Time steps per channel submitted so far.
    pub fn samples_written(&self) -> u64 {
        self.submitted / self.channels as u64
    }

    /// Chunks abandoned by the writer after repeated failures.
    pub fn dropped_chunks(&self) -> u64 {
        self.shared.queue.lock().dropped
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    /// Channel count.
    pub fn channels(&self) -> u32 {
        self.params.channels
    }

    /// Bits per sample accepted by [`EncodeSession::write`].
    pub fn bits_per_sample(&self) -> u32 {
        self.params.bits_per_sample
    }

    /// Push the channel-aligned part of the conversion buffer onto the
    /// FIFO, keeping any trailing partial time step for the next write.
    fn flush_pending(&mut self) {
        let aligned = self.pending.len() - self.pending.len() % self.channels;
        if aligned == 0 {
            return;
        }
        let remainder = self.pending.split_off(aligned);
        let chunk = std::mem::replace(&mut self.pending, remainder);
        self.pending.reserve(CONVERSION_BUFFER_SAMPLES);

        let mut guard = self.shared.queue.lock();
        guard.pending.push_back(chunk);
        self.shared.available.notify_one();
    }

    fn shutdown_and_join(&mut self) -> u64 {
        self.flush_pending();
        {
            let mut guard = self.shared.queue.lock();
            guard.shutdown = true;
            self.shared.available.notify_all();
        }
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                error!("writer thread panicked");
            }
        }
        self.shared.queue.lock().dropped
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        if self.writer.is_some() {
            self.shutdown_and_join();
        }
    }
}

/// Writer thread body: sleep on the condvar, detach the whole queue when
/// woken, encode outside the lock, finalise the stream on shutdown.
fn writer_loop(shared: &Shared, mut engine: Box<dyn EncodeEngine>) {
    let mut guard = shared.queue.lock();
    loop {
        if !guard.pending.is_empty() {
            let batch = std::mem::take(&mut guard.pending);
            let dropped =
                MutexGuard::unlocked(&mut guard, || drain_batch(engine.as_mut(), batch));
            guard.dropped += dropped;
            continue;
        }
        if guard.shutdown {
            break;
        }
        shared.available.wait(&mut guard);
    }
    drop(guard);

    if !engine.finish() {
        error!("stream finalisation failed");
    }
}

/// Encode one detached batch. A chunk that fails [`WRITE_RETRY_LIMIT`]
/// times is dropped together with the rest of the batch; the count of
/// dropped chunks is returned.
fn drain_batch(engine: &mut dyn EncodeEngine, batch: VecDeque<Vec<i32>>) -> u64 {
    let mut iter = batch.into_iter();
    while let Some(chunk) = iter.next() {
        let mut attempt = 1;
        while !engine.process_interleaved(&chunk) {
            if attempt >= WRITE_RETRY_LIMIT {
                warn!(
                    samples = chunk.len(),
                    attempts = attempt,
                    "dropping chunk after repeated write failures"
                );
                return 1 + iter.count() as u64;
            }
            attempt += 1;
            thread::sleep(RETRY_DELAY);
        }
    }
    0
}
