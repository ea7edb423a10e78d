//! Default block codec engine.
//!
//! ## Stream layout
//!
//! ```text
//! header:  "MURC" | version u8 | sample_rate u32 | channels u8 | bits u8
//!          | max_block_size u32 | total_samples u64          (all LE)
//! frame:   sync 0xA5 | first_sample u64 | block_size u32
//!          | per channel: tag u8 | payload_len u32 | payload
//! ```
//!
//! `max_block_size` and `total_samples` are written as zero at init and
//! back-patched by `finish()` once the stream length is known. Channel
//! payloads are either verbatim little-endian i32 (tag 0) or zigzag-varint
//! coded deltas (tag 1); carrying the payload length per channel lets
//! `seek_absolute` skip whole frames without decoding them.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, error, warn};

use crate::codec::{
    DecodeEngine, DecodeErrorKind, DecodeSink, EncodeEngine, EncoderParams, EngineState, Frame,
    SinkStatus, StreamInfo, StreamSource,
};
use crate::error::{CodecError, Result};

const MAGIC: &[u8; 4] = b"MURC";
const VERSION: u8 = 1;

/// Header length in bytes; the patched region starts at [`PATCH_OFFSET`].
const HEADER_LEN: usize = 23;
const PATCH_OFFSET: u64 = 11;

const FRAME_SYNC: u8 = 0xA5;
const TAG_VERBATIM: u8 = 0;
const TAG_DELTA: u8 = 1;

/// Upper bound on samples per channel in one frame; anything larger is
/// treated as lost sync rather than allocated.
const MAX_FRAME_BLOCK: u32 = 1 << 24;

/// Largest legal payload bytes per sample: verbatim needs exactly 4, a
/// delta varint at most 5. A length field above `block_size` times this is
/// corrupt and must be rejected before it sizes an allocation.
const MAX_PAYLOAD_PER_SAMPLE: usize = 10;

// ── varint helpers ──────────────────────────────────────────────────────────

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn take_varint(bytes: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let &byte = bytes.get(*pos)?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

// ── channel plane coding ────────────────────────────────────────────────────

fn encode_verbatim(plane: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(plane.len() * 4);
    for &sample in plane {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

fn encode_delta(plane: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(plane.len() * 2);
    let mut prev = 0i64;
    for &sample in plane {
        put_varint(&mut out, zigzag(i64::from(sample) - prev));
        prev = i64::from(sample);
    }
    out
}

fn decode_plane(tag: u8, payload: &[u8], block_size: usize) -> Option<Vec<i32>> {
    match tag {
        TAG_VERBATIM => {
            if payload.len() != block_size * 4 {
                return None;
            }
            Some(
                payload
                    .chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            )
        }
        TAG_DELTA => {
            let mut plane = Vec::with_capacity(block_size);
            let mut pos = 0usize;
            let mut prev = 0i64;
            for _ in 0..block_size {
                let delta = unzigzag(take_varint(payload, &mut pos)?);
                prev += delta;
                plane.push(i32::try_from(prev).ok()?);
            }
            if pos != payload.len() {
                return None;
            }
            Some(plane)
        }
        _ => None,
    }
}

// ── encoder ─────────────────────────────────────────────────────────────────

/// Block codec encoder writing to a file.
pub struct BlockEncodeEngine {
    file: File,
    channels: usize,
    compression_level: u8,
    verify: bool,
    /// Absolute position (time steps per channel) of the next frame.
    next_sample: u64,
    /// Largest block written so far, patched into the header at finish.
    max_block: u32,
    /// Byte offset just past the last fully written frame.
    offset: u64,
}

impl BlockEncodeEngine {
    /// Validate `params`, create `path` and write the provisional header.
    pub fn create(path: &Path, params: &EncoderParams) -> Result<Self> {
        params.validate()?;

        let mut file = File::create(path).map_err(CodecError::Io)?;

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.push(VERSION);
        header.extend_from_slice(&params.sample_rate.to_le_bytes());
        header.push(params.channels as u8);
        header.push(params.bits_per_sample as u8);
        header.extend_from_slice(&0u32.to_le_bytes()); // max_block_size
        header.extend_from_slice(&0u64.to_le_bytes()); // total_samples
        file.write_all(&header).map_err(CodecError::Io)?;

        debug!(
            sample_rate = params.sample_rate,
            channels = params.channels,
            bits = params.bits_per_sample,
            level = params.compression_level,
            verify = params.verify,
            "block encoder initialised"
        );

        Ok(Self {
            file,
            channels: params.channels as usize,
            compression_level: params.compression_level,
            verify: params.verify,
            next_sample: 0,
            max_block: 0,
            offset: HEADER_LEN as u64,
        })
    }

    fn encode_channel(&self, plane: &[i32]) -> (u8, Vec<u8>) {
        if self.compression_level == 0 {
            return (TAG_VERBATIM, encode_verbatim(plane));
        }
        let delta = encode_delta(plane);
        if delta.len() < plane.len() * 4 {
            (TAG_DELTA, delta)
        } else {
            (TAG_VERBATIM, encode_verbatim(plane))
        }
    }
}

impl EncodeEngine for BlockEncodeEngine {
    fn process_interleaved(&mut self, samples: &[i32]) -> bool {
        let block_size = samples.len() / self.channels;
        if block_size == 0 {
            return true;
        }

        let mut frame = Vec::with_capacity(13 + samples.len() * 4);
        frame.push(FRAME_SYNC);
        frame.extend_from_slice(&self.next_sample.to_le_bytes());
        frame.extend_from_slice(&(block_size as u32).to_le_bytes());

        let mut plane = Vec::with_capacity(block_size);
        for channel in 0..self.channels {
            plane.clear();
            plane.extend(
                samples[..block_size * self.channels]
                    .iter()
                    .skip(channel)
                    .step_by(self.channels),
            );

            let (tag, payload) = self.encode_channel(&plane);
            if self.verify
                && decode_plane(tag, &payload, block_size).as_deref() != Some(plane.as_slice())
            {
                error!(channel, block_size, "verification failed for encoded channel");
                return false;
            }
            frame.push(tag);
            frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            frame.extend_from_slice(&payload);
        }

        // Rewrite from the end of the last good frame so a failed attempt
        // can be retried without corrupting the stream.
        if let Err(e) = self
            .file
            .seek(SeekFrom::Start(self.offset))
            .and_then(|_| self.file.write_all(&frame))
        {
            error!(error = %e, "frame write failed");
            return false;
        }

        self.offset += frame.len() as u64;
        self.next_sample += block_size as u64;
        self.max_block = self.max_block.max(block_size as u32);
        true
    }

    fn finish(&mut self) -> bool {
        let mut patch = Vec::with_capacity(12);
        patch.extend_from_slice(&self.max_block.to_le_bytes());
        patch.extend_from_slice(&self.next_sample.to_le_bytes());

        match self
            .file
            .seek(SeekFrom::Start(PATCH_OFFSET))
            .and_then(|_| self.file.write_all(&patch))
            .and_then(|_| self.file.flush())
        {
            Ok(()) => {
                debug!(
                    total_samples = self.next_sample,
                    max_block = self.max_block,
                    "stream finalised"
                );
                true
            }
            Err(e) => {
                error!(error = %e, "could not finalise stream header");
                false
            }
        }
    }
}

// ── decoder ─────────────────────────────────────────────────────────────────

/// Block codec decoder pulling from a [`StreamSource`].
pub struct BlockDecodeEngine {
    source: Box<dyn StreamSource>,
    info: Option<StreamInfo>,
    state: EngineState,
    /// Byte offset of the first frame, recorded after the metadata pass.
    first_frame_offset: u64,
    /// Leading samples to trim from the next decoded frame after a seek.
    skip: u64,
}

impl BlockDecodeEngine {
    pub fn new(source: Box<dyn StreamSource>) -> Self {
        Self {
            source,
            info: None,
            state: EngineState::Uninitialized,
            first_frame_offset: 0,
            skip: 0,
        }
    }

    /// Read exactly `buf.len()` bytes, reporting how many arrived.
    fn read_fully(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut got = 0;
        while got < buf.len() {
            let n = self.source.read(&mut buf[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        Ok(got)
    }

    fn read_u8(&mut self) -> std::io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok((self.read_fully(&mut byte)? == 1).then_some(byte[0]))
    }

    /// Parse `sync` + the fixed frame header fields. `None` means the stream
    /// ended or the header was malformed; the state is already updated.
    fn read_frame_header(&mut self, sink: &mut dyn DecodeSink) -> Option<(u64, u32)> {
        let mut fixed = [0u8; 12];
        match self.read_fully(&mut fixed) {
            Ok(12) => {}
            Ok(_) => {
                sink.error(DecodeErrorKind::TruncatedFrame);
                self.state = EngineState::ContainerError;
                return None;
            }
            Err(e) => {
                error!(error = %e, "source read failed");
                self.state = EngineState::Aborted;
                return None;
            }
        }

        let first_sample = u64::from_le_bytes(fixed[..8].try_into().unwrap_or_default());
        let block_size = u32::from_le_bytes(fixed[8..].try_into().unwrap_or_default());
        if block_size == 0 || block_size > MAX_FRAME_BLOCK {
            sink.error(DecodeErrorKind::LostSync);
            self.state = EngineState::ContainerError;
            return None;
        }
        Some((first_sample, block_size))
    }
}

impl DecodeEngine for BlockDecodeEngine {
    fn read_metadata(&mut self, sink: &mut dyn DecodeSink) -> bool {
        match self.source.len() {
            Ok(len) if len < HEADER_LEN as u64 => {
                self.state = EngineState::ContainerError;
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "length query failed");
                self.state = EngineState::Aborted;
                return false;
            }
        }

        let mut header = [0u8; HEADER_LEN];
        match self.read_fully(&mut header) {
            Ok(n) if n == HEADER_LEN => {}
            Ok(_) => {
                self.state = EngineState::ContainerError;
                return false;
            }
            Err(e) => {
                error!(error = %e, "header read failed");
                self.state = EngineState::Aborted;
                return false;
            }
        }

        if &header[..4] != MAGIC || header[4] != VERSION {
            // Not a stream this engine understands; stay uninitialised.
            return false;
        }

        let info = StreamInfo {
            sample_rate: u32::from_le_bytes(header[5..9].try_into().unwrap_or_default()),
            channels: u32::from(header[9]),
            bits_per_sample: u32::from(header[10]),
            max_block_size: u32::from_le_bytes(header[11..15].try_into().unwrap_or_default()),
            total_samples: u64::from_le_bytes(header[15..23].try_into().unwrap_or_default()),
        };
        if info.sample_rate == 0 || info.channels == 0 {
            self.state = EngineState::ContainerError;
            return false;
        }

        self.first_frame_offset = match self.source.tell() {
            Ok(offset) => offset,
            Err(e) => {
                error!(error = %e, "tell failed after header");
                self.state = EngineState::Aborted;
                return false;
            }
        };
        self.info = Some(info);
        self.state = EngineState::Active;
        sink.metadata(&info);
        true
    }

    fn process_single(&mut self, sink: &mut dyn DecodeSink) -> bool {
        match self.state {
            EngineState::Active => {}
            EngineState::EndOfStream => return true,
            _ => return false,
        }
        let Some(info) = self.info else {
            return false;
        };

        if self.source.is_eof() {
            self.state = EngineState::EndOfStream;
            return true;
        }

        let sync = match self.read_u8() {
            Ok(Some(byte)) => byte,
            Ok(None) => {
                self.state = EngineState::EndOfStream;
                return true;
            }
            Err(e) => {
                error!(error = %e, "source read failed");
                self.state = EngineState::Aborted;
                return false;
            }
        };
        if sync != FRAME_SYNC {
            sink.error(DecodeErrorKind::LostSync);
            self.state = EngineState::ContainerError;
            return false;
        }

        let Some((mut first_sample, block_size)) = self.read_frame_header(sink) else {
            return false;
        };

        let mut planes = Vec::with_capacity(info.channels as usize);
        for _ in 0..info.channels {
            let mut meta = [0u8; 5];
            let tag_len = self.read_fully(&mut meta);
            if !matches!(tag_len, Ok(5)) {
                sink.error(DecodeErrorKind::TruncatedFrame);
                self.state = EngineState::ContainerError;
                return false;
            }
            let tag = meta[0];
            let payload_len = u32::from_le_bytes(meta[1..].try_into().unwrap_or_default()) as usize;
            if payload_len > block_size as usize * MAX_PAYLOAD_PER_SAMPLE {
                sink.error(DecodeErrorKind::BadData);
                self.state = EngineState::ContainerError;
                return false;
            }

            let mut payload = vec![0u8; payload_len];
            if !matches!(self.read_fully(&mut payload), Ok(n) if n == payload_len) {
                sink.error(DecodeErrorKind::TruncatedFrame);
                self.state = EngineState::ContainerError;
                return false;
            }

            match decode_plane(tag, &payload, block_size as usize) {
                Some(plane) => planes.push(plane),
                None => {
                    sink.error(DecodeErrorKind::BadData);
                    self.state = EngineState::ContainerError;
                    return false;
                }
            }
        }

        let mut block_size = block_size as usize;
        if self.skip > 0 {
            // Post-seek trim: drop samples before the requested position so
            // the delivered frame starts exactly at the seek target.
            let trim = (self.skip as usize).min(block_size);
            for plane in &mut planes {
                plane.drain(..trim);
            }
            first_sample += trim as u64;
            block_size -= trim;
            self.skip = 0;
        }

        let frame = Frame {
            first_sample,
            block_size,
            planes,
        };
        if sink.frame(&frame) == SinkStatus::Abort {
            warn!(
                first_sample,
                block_size, "sink aborted mid-frame; output buffer too small"
            );
            self.state = EngineState::Aborted;
            return false;
        }
        true
    }

    fn seek_absolute(&mut self, sample: u64) -> bool {
        let Some(info) = self.info else {
            return false;
        };
        if info.total_samples > 0 && sample >= info.total_samples {
            self.state = EngineState::SeekError;
            return false;
        }
        if let Err(e) = self.source.seek(self.first_frame_offset) {
            error!(error = %e, "seek to first frame failed");
            self.state = EngineState::SeekError;
            return false;
        }

        // Walk frame headers, skipping payloads, until the frame containing
        // the target. Payload lengths make this a header-only scan.
        loop {
            let frame_start = match self.source.tell() {
                Ok(offset) => offset,
                Err(_) => {
                    self.state = EngineState::SeekError;
                    return false;
                }
            };

            let mut header = [0u8; 13];
            if !matches!(self.read_fully(&mut header), Ok(13)) || header[0] != FRAME_SYNC {
                self.state = EngineState::SeekError;
                return false;
            }
            let first_sample = u64::from_le_bytes(header[1..9].try_into().unwrap_or_default());
            let block_size =
                u64::from(u32::from_le_bytes(header[9..13].try_into().unwrap_or_default()));

            if sample < first_sample + block_size {
                if self.source.seek(frame_start).is_err() {
                    self.state = EngineState::SeekError;
                    return false;
                }
                self.skip = sample.saturating_sub(first_sample);
                self.state = EngineState::Active;
                debug!(target = sample, frame_start, "seek positioned");
                return true;
            }

            for _ in 0..info.channels {
                let mut meta = [0u8; 5];
                if !matches!(self.read_fully(&mut meta), Ok(5)) {
                    self.state = EngineState::SeekError;
                    return false;
                }
                let payload_len =
                    u64::from(u32::from_le_bytes(meta[1..].try_into().unwrap_or_default()));
                if payload_len > block_size * MAX_PAYLOAD_PER_SAMPLE as u64 {
                    self.state = EngineState::SeekError;
                    return false;
                }
                let here = match self.source.tell() {
                    Ok(offset) => offset,
                    Err(_) => {
                        self.state = EngineState::SeekError;
                        return false;
                    }
                };
                if self.source.seek(here + payload_len).is_err() {
                    self.state = EngineState::SeekError;
                    return false;
                }
            }
        }
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn flush(&mut self) {
        if self.state == EngineState::SeekError {
            self.skip = 0;
            self.state = EngineState::Active;
        }
    }
}
