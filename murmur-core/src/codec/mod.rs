//! Codec engine capability surface.
//!
//! The sessions in [`crate::decoder`] and [`crate::encoder`] never parse or
//! produce the compressed bitstream themselves; they drive an engine through
//! the traits below and treat its block/frame decomposition as opaque. The
//! engine reads its input through a caller-supplied [`StreamSource`] and
//! reports decoded audio, stream metadata and errors through a per-call
//! [`DecodeSink`] — capability objects rather than raw function pointers.
//!
//! [`block`] provides the default engine pair used by
//! [`DecodeSession::open`](crate::DecodeSession::open) and
//! [`EncodeSession::create`](crate::EncodeSession::create).

pub mod block;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use crate::error::Result;
use crate::sample::SampleWidth;

/// Stream metadata discovered by the engine's metadata pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Bits per sample (8 or 16 at the session boundary).
    pub bits_per_sample: u32,
    /// Total stream length in time steps per channel.
    pub total_samples: u64,
    /// Largest block (samples per channel) any frame in the stream carries.
    pub max_block_size: u32,
}

/// One decoded unit of audio: a block of samples per channel, in separate
/// non-interleaved planes.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Absolute position (time steps per channel) of the first sample.
    pub first_sample: u64,
    /// Samples per channel in this frame.
    pub block_size: usize,
    /// One plane of `block_size` samples per channel.
    pub planes: Vec<Vec<i32>>,
}

/// Flow control returned by [`DecodeSink::frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// Keep decoding.
    Continue,
    /// Stop immediately; the sink cannot accept more samples.
    Abort,
}

/// Classification passed to [`DecodeSink::error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The engine lost frame synchronisation.
    LostSync,
    /// A frame ended before its declared payload did.
    TruncatedFrame,
    /// A frame payload failed to decode.
    BadData,
}

/// Enumerated engine status, polled by the decode session after every drive
/// call and mapped onto [`crate::ReadStatus`] codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Metadata has not been read yet (or initialisation failed).
    Uninitialized,
    /// Ready to decode the next frame.
    Active,
    /// The input stream is exhausted.
    EndOfStream,
    /// The container structure is invalid or truncated.
    ContainerError,
    /// The last seek could not be satisfied. Recoverable via
    /// [`DecodeEngine::flush`].
    SeekError,
    /// The sink aborted mid-frame or the source failed hard.
    Aborted,
    /// The engine could not allocate working memory.
    OutOfMemory,
}

/// Read/seek/tell/length/eof capabilities the decode engine pulls its input
/// through. Implemented by [`FileSource`]; tests substitute in-memory
/// sources.
pub trait StreamSource: Send {
    /// Read up to `buf.len()` bytes; returns 0 at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Seek to an absolute byte offset.
    fn seek(&mut self, offset: u64) -> io::Result<()>;

    /// Current byte offset.
    fn tell(&mut self) -> io::Result<u64>;

    /// Total stream length in bytes.
    fn len(&mut self) -> io::Result<u64>;

    /// Whether the read cursor is at or past the end of the stream.
    fn is_eof(&mut self) -> bool;
}

/// Write/metadata/error capabilities the decode session supplies per drive
/// call. Default impls let metadata-only probes ignore frames and vice versa.
pub trait DecodeSink {
    /// Stream info block, delivered during the metadata pass.
    fn metadata(&mut self, _info: &StreamInfo) {}

    /// One decoded frame. Return [`SinkStatus::Abort`] to stop the engine.
    fn frame(&mut self, _frame: &Frame) -> SinkStatus {
        SinkStatus::Continue
    }

    /// A codec-level error. The engine also reflects it in its state.
    fn error(&mut self, _kind: DecodeErrorKind) {}
}

/// Pull-decoding engine surface: metadata pass, one-frame-at-a-time
/// processing, absolute seeking and state inspection.
pub trait DecodeEngine: Send {
    /// Run the metadata pass. Delivers [`DecodeSink::metadata`] on success
    /// and leaves the engine positioned at the first frame.
    fn read_metadata(&mut self, sink: &mut dyn DecodeSink) -> bool;

    /// Decode exactly one frame (or detect end of stream). Returns `false`
    /// on a fatal condition; inspect [`DecodeEngine::state`] either way.
    fn process_single(&mut self, sink: &mut dyn DecodeSink) -> bool;

    /// Position the engine so the next frame starts at `sample` (time steps
    /// per channel). On failure the state is [`EngineState::SeekError`].
    fn seek_absolute(&mut self, sample: u64) -> bool;

    /// Current engine status.
    fn state(&self) -> EngineState;

    /// Clear a recoverable error condition and resume decoding.
    fn flush(&mut self);
}

/// Encoder configuration handed to the engine at construction time.
#[derive(Debug, Clone)]
pub struct EncoderParams {
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    /// 0 stores samples verbatim; higher levels enable delta coding.
    pub compression_level: u8,
    /// Re-decode every written frame and compare against the input.
    pub verify: bool,
}

/// Compression level used by [`crate::EncodeSession::create`].
pub const DEFAULT_COMPRESSION_LEVEL: u8 = 5;

impl EncoderParams {
    pub fn new(sample_rate: u32, channels: u32, bits_per_sample: u32) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            verify: true,
        }
    }

    /// Reject parameter combinations the engine cannot represent.
    pub fn validate(&self) -> Result<()> {
        use crate::error::CodecError;

        if self.sample_rate == 0 {
            return Err(CodecError::Config("sample rate must be non-zero".into()));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(CodecError::Config(format!(
                "channel count {} out of range 1..=8",
                self.channels
            )));
        }
        if SampleWidth::from_bits(self.bits_per_sample).is_none() {
            return Err(CodecError::Config(format!(
                "bits per sample must be 8 or 16, got {}",
                self.bits_per_sample
            )));
        }
        if self.compression_level > 8 {
            return Err(CodecError::Config(format!(
                "compression level {} out of range 0..=8",
                self.compression_level
            )));
        }
        Ok(())
    }
}

/// Push-encoding engine surface, driven from the writer thread.
pub trait EncodeEngine: Send {
    /// Encode one chunk of interleaved 32-bit samples as a frame. `samples`
    /// holds `block_size × channels` values in (time, channel) order.
    /// Returns `false` if the frame could not be written.
    fn process_interleaved(&mut self, samples: &[i32]) -> bool;

    /// Finalise the stream (patch headers, flush the file). Called once,
    /// after the last frame.
    fn finish(&mut self) -> bool;
}

/// [`StreamSource`] over a regular file.
pub struct FileSource {
    file: File,
    len: u64,
    pos: u64,
}

impl FileSource {
    pub fn new(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self { file, len, pos: 0 })
    }
}

impl StreamSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.pos = self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn tell(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.len)
    }

    fn is_eof(&mut self) -> bool {
        self.pos >= self.len
    }
}
