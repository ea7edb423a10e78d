//! End-to-end tests: encode PCM through the full session stack, read the
//! stream back and compare byte-for-byte.

use std::fs;
use std::path::Path;

use murmur_core::{DecodeSession, EncodeSession, ReadStatus};

/// Deterministic 16-bit test signal, interleaved across `channels`.
fn pcm16_signal(steps: usize, channels: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(steps * channels * 2);
    for t in 0..steps {
        for ch in 0..channels {
            let phase = (t * (ch + 3) * 31) % 20000;
            let sample = (phase as i32 - 10000) as i16;
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }
    bytes
}

fn encode_file(path: &Path, bytes: &[u8], sample_rate: u32, channels: u32, bits: u32) {
    let mut session =
        EncodeSession::create(path, sample_rate, channels, bits).expect("create encode session");
    // Submit in slices smaller than the conversion buffer to exercise it.
    for piece in bytes.chunks(4096) {
        assert_eq!(session.write(piece), piece.len());
    }
    assert_eq!(session.finish(), 0, "no chunks should be dropped");
}

fn decode_file(path: &Path) -> (DecodeSession, Vec<u8>) {
    let mut session = DecodeSession::open(path).expect("open decode session");
    let mut buf = vec![0u8; session.min_buffer_size().max(4096)];
    let mut out = Vec::new();
    loop {
        match session.read(&mut buf) {
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(ReadStatus::Finished) => break,
            Err(status) => panic!("unexpected status {}", status.code()),
        }
    }
    (session, out)
}

#[test]
fn pcm16_stereo_survives_a_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stereo.mur");
    let original = pcm16_signal(10_000, 2);

    encode_file(&path, &original, 44_100, 2, 16);
    let (session, decoded) = decode_file(&path);

    assert_eq!(decoded, original);
    assert_eq!(session.sample_rate(), 44_100);
    assert_eq!(session.channels(), 2);
    assert_eq!(session.bits_per_sample(), 16);
    assert_eq!(session.total_samples(), 10_000);
    assert_eq!(session.position(), 10_000);
}

#[test]
fn pcm8_mono_survives_a_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mono8.mur");
    let original: Vec<u8> = (0..5_000u32).map(|i| (i * 7 % 251) as u8).collect();

    encode_file(&path, &original, 8_000, 1, 8);
    let (session, decoded) = decode_file(&path);

    assert_eq!(decoded, original);
    assert_eq!(session.bits_per_sample(), 8);
    assert_eq!(session.total_samples(), 5_000);
}

#[test]
fn two_second_speech_shaped_stream() {
    // 2 s of mono 16 kHz 16-bit audio, the shape the dictation pipeline
    // produces.
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("speech.mur");
    let original = pcm16_signal(32_000, 1);

    encode_file(&path, &original, 16_000, 1, 16);
    let (session, decoded) = decode_file(&path);

    assert_eq!(decoded, original);
    assert_eq!(session.total_samples(), 32_000);
}

#[test]
fn oversized_single_write_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("big.mur");
    let original = pcm16_signal(50_000, 1);

    let mut session = EncodeSession::create(&path, 16_000, 1, 16).expect("create");
    assert_eq!(session.write(&original), original.len());
    assert_eq!(session.finish(), 0);

    let (_, decoded) = decode_file(&path);
    assert_eq!(decoded, original);
}

#[test]
fn seek_then_read_starts_at_the_target_sample() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("seek.mur");
    let original = pcm16_signal(40_000, 1);
    encode_file(&path, &original, 16_000, 1, 16);

    let mut session = DecodeSession::open(&path).expect("open");
    let target = 12_345u64;
    session.seek(target);

    let mut buf = vec![0u8; session.min_buffer_size()];
    let n = session.read(&mut buf).expect("read after seek");
    assert!(n >= 2);
    assert_eq!(&buf[..2], &original[target as usize * 2..target as usize * 2 + 2]);
    assert_eq!(session.position(), target + n as u64 / 2);
}

#[test]
fn seek_back_before_the_stream_ends() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rewind.mur");
    let original = pcm16_signal(8_000, 2);
    encode_file(&path, &original, 22_050, 2, 16);

    let mut session = DecodeSession::open(&path).expect("open");
    let mut buf = vec![0u8; session.min_buffer_size()];
    let n = session.read(&mut buf).expect("first pass");
    assert_eq!(&buf[..n], &original[..n]);

    session.seek(0);
    let n = session.read(&mut buf).expect("read after rewind");
    assert_eq!(&buf[..n], &original[..n]);
}

#[test]
fn seek_past_end_is_absorbed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("overshoot.mur");
    let original = pcm16_signal(1_000, 1);
    encode_file(&path, &original, 16_000, 1, 16);

    let mut session = DecodeSession::open(&path).expect("open");
    session.seek(1_000);

    // The failed seek is absorbed; the read continues from the start.
    let mut buf = vec![0u8; session.min_buffer_size()];
    let n = session.read(&mut buf).expect("read after absorbed seek");
    assert_eq!(&buf[..n], &original[..n]);
}

#[test]
fn truncated_stream_reports_container_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cut.mur");
    encode_file(&path, &pcm16_signal(60_000, 1), 16_000, 1, 16);

    let bytes = fs::read(&path).expect("read stream");
    let cut = dir.path().join("cut-short.mur");
    fs::write(&cut, &bytes[..bytes.len() - 1_000]).expect("write truncated stream");

    let mut session = DecodeSession::open(&cut).expect("open");
    let mut buf = vec![0u8; session.min_buffer_size()];
    let mut produced = 0usize;
    let status = loop {
        match session.read(&mut buf) {
            Ok(n) => produced += n,
            Err(status) => break status,
        }
    };
    assert_eq!(status, ReadStatus::ContainerError);
    assert_eq!(status.code(), -3);
    assert!(produced > 0, "leading intact frames should still decode");
}

#[test]
fn corrupted_payload_length_reports_container_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corrupt.mur");
    encode_file(&path, &pcm16_signal(500, 1), 16_000, 1, 16);

    // Overwrite the first channel's payload length with an absurd value:
    // header (23) + sync (1) + first_sample (8) + block_size (4) + tag (1).
    let mut bytes = fs::read(&path).expect("read stream");
    bytes[37..41].copy_from_slice(&u32::MAX.to_le_bytes());
    fs::write(&path, &bytes).expect("rewrite stream");

    let mut session = DecodeSession::open(&path).expect("open");
    let mut buf = vec![0u8; session.min_buffer_size()];
    assert_eq!(session.read(&mut buf), Err(ReadStatus::ContainerError));
}

#[test]
fn garbage_input_fails_to_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("noise.bin");
    fs::write(&path, vec![0x42u8; 256]).expect("write garbage");
    assert!(DecodeSession::open(&path).is_err());
}

#[test]
fn amplitude_statistics_track_submitted_audio() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("levels.mur");
    let mut session = EncodeSession::create(&path, 16_000, 1, 16).expect("create");

    let loud: Vec<u8> = std::iter::repeat(i16::MAX.to_le_bytes())
        .take(100)
        .flatten()
        .collect();
    session.write(&loud);
    assert!((session.max_amplitude() - 1.0).abs() < 1e-6);
    assert!((session.average_amplitude() - 1.0).abs() < 1e-6);
    // Destructive reads: both reset.
    assert_eq!(session.max_amplitude(), 0.0);
    assert_eq!(session.average_amplitude(), 0.0);
    session.finish();
}
