//! Pull-based decode session.
//!
//! ## Design
//!
//! ```text
//!             read(buf) ────────────────────────────┐
//!                 │                                 │
//!        ┌────────▼────────┐   process_single   ┌───▼─────────┐
//!        │  DecodeSession  │ ──────────────────▶│ DecodeEngine │
//!        │  (state + pos)  │ ◀────────────────── │   (frames)  │
//!        └────────┬────────┘   InterleaveSink   └─────────────┘
//!                 │
//!          interleaved PCM bytes, caller's width
//! ```
//!
//! The session drives the engine one frame at a time until the caller's
//! buffer is full, interleaving channel planes back into raw little-endian
//! PCM as they arrive. Seeks are recorded and applied lazily on the next
//! read; a seek the engine cannot satisfy is absorbed by flushing the
//! engine and continuing from the old position, so callers never have to
//! handle a transient seek failure. Any terminal condition — end of
//! stream or a codec error — latches the session finished, and every later
//! read reports that immediately without touching the engine again.

use std::path::Path;

use tracing::{debug, warn};

use crate::codec::block::BlockDecodeEngine;
use crate::codec::{
    DecodeEngine, DecodeErrorKind, DecodeSink, EngineState, FileSource, Frame, SinkStatus,
    StreamInfo,
};
use crate::error::{CodecError, Result};
use crate::sample::SampleWidth;

/// Negative status codes returned by [`DecodeSession::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The stream was fully consumed (or a terminal error was already
    /// reported) on an earlier call.
    Finished,
    /// The engine hit end of stream.
    EndOfStream,
    /// The container structure is invalid or truncated.
    ContainerError,
    /// A seek could not be satisfied. Absorbed internally; only observable
    /// transiently.
    SeekError,
    /// Decoding was aborted (output buffer overflow or source failure).
    Aborted,
    /// The engine ran out of working memory.
    OutOfMemory,
    /// The session was never fully initialised.
    Uninitialized,
    /// An unclassified engine condition.
    Unknown,
}

impl ReadStatus {
    /// Stable numeric form of this status.
    pub fn code(self) -> i32 {
        match self {
            ReadStatus::Finished => -1,
            ReadStatus::EndOfStream => -2,
            ReadStatus::ContainerError => -3,
            ReadStatus::SeekError => -4,
            ReadStatus::Aborted => -5,
            ReadStatus::OutOfMemory => -6,
            ReadStatus::Uninitialized => -7,
            ReadStatus::Unknown => -8,
        }
    }

    fn from_state(state: EngineState) -> Self {
        match state {
            EngineState::EndOfStream => ReadStatus::EndOfStream,
            EngineState::ContainerError => ReadStatus::ContainerError,
            EngineState::SeekError => ReadStatus::SeekError,
            EngineState::Aborted => ReadStatus::Aborted,
            EngineState::OutOfMemory => ReadStatus::OutOfMemory,
            EngineState::Uninitialized => ReadStatus::Uninitialized,
            EngineState::Active => ReadStatus::Unknown,
        }
    }
}

/// Sink that re-interleaves decoded channel planes into a caller buffer.
///
/// Frames are written sample-major: one sample from every channel, then the
/// next time step. If the buffer fills mid-frame the write is abandoned
/// where it stands and the engine is told to abort; callers avoid that by
/// sizing `buf` to at least [`DecodeSession::min_buffer_size`] bytes.
struct InterleaveSink<'a> {
    buf: &'a mut [u8],
    width: SampleWidth,
    used: usize,
    samples: usize,
}

impl<'a> InterleaveSink<'a> {
    fn new(buf: &'a mut [u8], width: SampleWidth) -> Self {
        Self {
            buf,
            width,
            used: 0,
            samples: 0,
        }
    }

    fn full(&self) -> bool {
        self.buf.len() - self.used < self.width.bytes()
    }
}

impl DecodeSink for InterleaveSink<'_> {
    fn frame(&mut self, frame: &Frame) -> SinkStatus {
        let step = self.width.bytes();
        for t in 0..frame.block_size {
            for plane in &frame.planes {
                if self.buf.len() - self.used < step {
                    return SinkStatus::Abort;
                }
                self.width
                    .narrow_into(plane[t], &mut self.buf[self.used..]);
                self.used += step;
                self.samples += 1;
            }
        }
        SinkStatus::Continue
    }

    fn error(&mut self, kind: DecodeErrorKind) {
        warn!(?kind, "codec error during read");
    }
}

/// Probe-only sink for the metadata pass.
#[derive(Default)]
struct MetadataSink {
    info: Option<StreamInfo>,
}

impl DecodeSink for MetadataSink {
    fn metadata(&mut self, info: &StreamInfo) {
        self.info = Some(*info);
    }
}

/// Pull-based adapter from a compressed stream to interleaved PCM.
pub struct DecodeSession {
    engine: Box<dyn DecodeEngine>,
    info: StreamInfo,
    width: SampleWidth,
    /// Next sample position in time steps per channel.
    position: u64,
    /// Seek target recorded by [`DecodeSession::seek`], applied on the next
    /// read.
    pending_seek: Option<u64>,
    /// Latched on end of stream or any codec error; terminal.
    finished: bool,
}

impl DecodeSession {
    /// Open `path` with the default block codec engine.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let source = FileSource::new(file)?;
        Self::with_engine(Box::new(BlockDecodeEngine::new(Box::new(source))))
    }

    /// Run the metadata pass on `engine` and wrap it in a session.
    pub fn with_engine(mut engine: Box<dyn DecodeEngine>) -> Result<Self> {
        let mut sink = MetadataSink::default();
        if !engine.read_metadata(&mut sink) {
            return Err(match engine.state() {
                EngineState::Uninitialized => {
                    CodecError::EngineInit("stream not recognised".into())
                }
                state => CodecError::Metadata(format!("metadata pass failed in {state:?}")),
            });
        }
        let info = sink
            .info
            .ok_or_else(|| CodecError::Metadata("engine reported no stream info".into()))?;
        let width = SampleWidth::from_bits(info.bits_per_sample)
            .ok_or(CodecError::UnsupportedBitDepth(info.bits_per_sample))?;

        debug!(
            sample_rate = info.sample_rate,
            channels = info.channels,
            bits = info.bits_per_sample,
            total_samples = info.total_samples,
            "decode session opened"
        );

        Ok(Self {
            engine,
            info,
            width,
            position: 0,
            pending_seek: None,
            finished: false,
        })
    }

    /// Decode into `buf`, returning the number of bytes written.
    ///
    /// Only whole samples are written. A call that reaches end of stream or
    /// a codec error still returns the bytes decoded so far; the session is
    /// then finished and every later call reports
    /// [`ReadStatus::Finished`]. A fatal abort mid-call (undersized buffer,
    /// hard source failure) is the only path that loses the call's partial
    /// output.
    pub fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, ReadStatus> {
        if self.finished {
            return Err(ReadStatus::Finished);
        }

        if let Some(target) = self.pending_seek.take() {
            if self.engine.seek_absolute(target) {
                self.position = target;
            } else {
                // Recoverable: flush the engine and keep decoding from the
                // old position instead of failing the call.
                warn!(target, "seek absorbed; continuing from current position");
                self.engine.flush();
            }
        }

        let mut sink = InterleaveSink::new(buf, self.width);
        let mut ok = true;
        while ok && !sink.full() && self.engine.state() == EngineState::Active {
            ok = self.engine.process_single(&mut sink);
        }

        if !ok {
            let status = ReadStatus::from_state(self.engine.state());
            warn!(status = status.code(), "decode aborted");
            self.finished = true;
            return Err(status);
        }
        if self.engine.state() != EngineState::Active {
            // End of stream or a codec-reported error: hand back what was
            // decoded, report Finished from here on.
            self.finished = true;
        }

        self.position += sink.samples as u64 / u64::from(self.info.channels.max(1));
        Ok(sink.used)
    }

    /// Record `sample` (time steps per channel) as the position for the
    /// next [`DecodeSession::read`]. Takes effect lazily; a finished
    /// session stays finished.
    pub fn seek(&mut self, sample: u64) {
        self.pending_seek = Some(sample);
    }

    /// Next sample position in time steps per channel.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }

    /// Channel count.
    pub fn channels(&self) -> u32 {
        self.info.channels
    }

    /// Bits per sample of the decoded PCM.
    pub fn bits_per_sample(&self) -> u32 {
        self.info.bits_per_sample
    }

    /// Total stream length in time steps per channel (0 if unknown).
    pub fn total_samples(&self) -> u64 {
        self.info.total_samples
    }

    /// Smallest buffer size in bytes guaranteed to hold any single frame.
    pub fn min_buffer_size(&self) -> usize {
        self.info.max_block_size as usize * self.info.channels as usize * self.width.bytes()
    }

    /// Full stream metadata.
    pub fn stream_info(&self) -> StreamInfo {
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted engine: plays back a fixed list of frames, then a terminal
    /// state, without touching any real bitstream.
    struct ScriptedEngine {
        info: StreamInfo,
        frames: Vec<Frame>,
        cursor: usize,
        state: EngineState,
        /// When set, entering this frame index reports the state instead.
        fail_at: Option<(usize, EngineState, DecodeErrorKind)>,
    }

    impl ScriptedEngine {
        fn new(channels: u32, blocks: &[Vec<i32>]) -> Self {
            let mut frames = Vec::new();
            let mut first_sample = 0u64;
            for block in blocks {
                let block_size = block.len();
                // Same plane for every channel keeps the scripts short.
                let planes = vec![block.clone(); channels as usize];
                frames.push(Frame {
                    first_sample,
                    block_size,
                    planes,
                });
                first_sample += block_size as u64;
            }
            Self {
                info: StreamInfo {
                    sample_rate: 16_000,
                    channels,
                    bits_per_sample: 16,
                    total_samples: first_sample,
                    max_block_size: blocks.iter().map(Vec::len).max().unwrap_or(0) as u32,
                },
                frames,
                cursor: 0,
                state: EngineState::Uninitialized,
                fail_at: None,
            }
        }
    }

    impl DecodeEngine for ScriptedEngine {
        fn read_metadata(&mut self, sink: &mut dyn DecodeSink) -> bool {
            self.state = EngineState::Active;
            sink.metadata(&self.info);
            true
        }

        fn process_single(&mut self, sink: &mut dyn DecodeSink) -> bool {
            if self.state != EngineState::Active {
                return self.state == EngineState::EndOfStream;
            }
            if let Some((index, state, kind)) = self.fail_at {
                if self.cursor == index {
                    sink.error(kind);
                    self.state = state;
                    return true;
                }
            }
            match self.frames.get(self.cursor) {
                Some(frame) => {
                    let frame = frame.clone();
                    self.cursor += 1;
                    if sink.frame(&frame) == SinkStatus::Abort {
                        self.state = EngineState::Aborted;
                        return false;
                    }
                    true
                }
                None => {
                    self.state = EngineState::EndOfStream;
                    true
                }
            }
        }

        fn seek_absolute(&mut self, sample: u64) -> bool {
            if sample >= self.info.total_samples {
                self.state = EngineState::SeekError;
                return false;
            }
            // Scripts use equal-size frames, so index math is enough.
            let block = self.frames[0].block_size as u64;
            self.cursor = (sample / block) as usize;
            self.state = EngineState::Active;
            true
        }

        fn state(&self) -> EngineState {
            self.state
        }

        fn flush(&mut self) {
            if self.state == EngineState::SeekError {
                self.state = EngineState::Active;
            }
        }
    }

    fn session(channels: u32, blocks: &[Vec<i32>]) -> DecodeSession {
        DecodeSession::with_engine(Box::new(ScriptedEngine::new(channels, blocks)))
            .expect("session")
    }

    fn pcm16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn read_spans_multiple_frames() {
        let mut session = session(1, &[vec![1, 2], vec![3, 4]]);
        let mut buf = [0u8; 16];
        let n = session.read(&mut buf).expect("read");
        assert_eq!(n, 8);
        assert_eq!(pcm16(&buf[..n]), vec![1, 2, 3, 4]);
        assert_eq!(session.position(), 4);
    }

    #[test]
    fn finished_wins_after_data_is_drained() {
        let mut session = session(1, &[vec![5, 6, 7]]);
        let mut buf = [0u8; 64];
        assert_eq!(session.read(&mut buf), Ok(6));
        assert_eq!(session.read(&mut buf), Err(ReadStatus::Finished));
        // Finished is sticky, even across a seek.
        session.seek(0);
        assert_eq!(session.read(&mut buf), Err(ReadStatus::Finished));
    }

    #[test]
    fn stereo_output_is_interleaved() {
        let mut session = session(2, &[vec![10, 20]]);
        let mut buf = [0u8; 64];
        let n = session.read(&mut buf).expect("read");
        // Same scripted plane per channel: L R L R.
        assert_eq!(pcm16(&buf[..n]), vec![10, 10, 20, 20]);
        assert_eq!(session.position(), 2);
    }

    #[test]
    fn undersized_buffer_aborts_mid_frame() {
        let mut session = session(1, &[vec![1, 2, 3, 4]]);
        let mut buf = [0u8; 4];
        assert_eq!(session.read(&mut buf), Err(ReadStatus::Aborted));
        // The abort latches the session.
        let mut big = [0u8; 64];
        assert_eq!(session.read(&mut big), Err(ReadStatus::Finished));
    }

    #[test]
    fn codec_error_latches_finished_after_partial_data() {
        let mut engine = ScriptedEngine::new(1, &[vec![1, 2], vec![3, 4]]);
        engine.fail_at = Some((1, EngineState::ContainerError, DecodeErrorKind::LostSync));
        let mut session = DecodeSession::with_engine(Box::new(engine)).expect("session");

        let mut buf = [0u8; 64];
        // First frame decodes; the error ends the session.
        assert_eq!(session.read(&mut buf), Ok(4));
        assert_eq!(session.read(&mut buf), Err(ReadStatus::Finished));
    }

    #[test]
    fn seek_applies_on_the_next_read() {
        let mut session = session(1, &[vec![1, 2], vec![3, 4]]);
        let mut buf = [0u8; 4];
        assert_eq!(session.read(&mut buf), Ok(4));
        assert_eq!(session.position(), 2);

        session.seek(0);
        // Position unchanged until the seek is applied.
        assert_eq!(session.position(), 2);
        let n = session.read(&mut buf).expect("read after seek");
        assert_eq!(pcm16(&buf[..n]), vec![1, 2]);
        assert_eq!(session.position(), 2);
    }

    #[test]
    fn failed_seek_is_absorbed() {
        let mut session = session(1, &[vec![1, 2]]);
        session.seek(100);

        // The read flushes the engine and continues from the old position.
        let mut buf = [0u8; 64];
        assert_eq!(session.read(&mut buf), Ok(4));
        assert_eq!(session.position(), 2);
    }

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(ReadStatus::Finished.code(), -1);
        assert_eq!(ReadStatus::EndOfStream.code(), -2);
        assert_eq!(ReadStatus::ContainerError.code(), -3);
        assert_eq!(ReadStatus::SeekError.code(), -4);
        assert_eq!(ReadStatus::Aborted.code(), -5);
        assert_eq!(ReadStatus::OutOfMemory.code(), -6);
        assert_eq!(ReadStatus::Uninitialized.code(), -7);
        assert_eq!(ReadStatus::Unknown.code(), -8);
    }

    #[test]
    fn min_buffer_size_covers_largest_frame() {
        let session = session(2, &[vec![1; 128], vec![2; 64]]);
        assert_eq!(session.min_buffer_size(), 128 * 2 * 2);
    }
}
