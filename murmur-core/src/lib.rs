//! # murmur-core
//!
//! Streaming adapters between raw interleaved PCM and a lossless block
//! codec: a pull-based [`DecodeSession`] and a push-based [`EncodeSession`].
//!
//! ```text
//!              ┌──────────────────┐  read(buf)  ┌───────────────┐
//!  .mur file ─▶│  DecodeSession   │────────────▶│ PCM consumer  │
//!              │  (seek, status)  │             └───────────────┘
//!              └──────────────────┘
//!
//!              ┌──────────────────┐  write(buf) ┌───────────────┐
//!  .mur file ◀─│  EncodeSession   │◀────────────│ PCM producer  │
//!              │ (writer thread)  │             └───────────────┘
//!              └──────────────────┘
//! ```
//!
//! Both sessions speak raw little-endian PCM at 8 or 16 bits per sample and
//! hide the codec behind the engine traits in [`codec`], so the bitstream
//! format can be swapped without touching callers. The encode side never
//! blocks on the disk: submitted audio is buffered and encoded by a
//! background writer thread, with peak and mean amplitude tracked on the
//! submission path for level metering.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod sample;

pub use codec::{EncoderParams, StreamInfo, DEFAULT_COMPRESSION_LEVEL};
pub use decoder::{DecodeSession, ReadStatus};
pub use encoder::EncodeSession;
pub use error::{CodecError, Result};
pub use sample::SampleWidth;
