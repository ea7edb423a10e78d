fn main() {
    if let Err(e) = run() {
        eprintln!("transcode failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use murmur_core::{DecodeSession, EncodeSession, ReadStatus};
    use std::path::{Path, PathBuf};

    #[derive(Debug)]
    enum Mode {
        Encode,
        Decode,
    }

    #[derive(Debug)]
    struct Args {
        mode: Mode,
        input: PathBuf,
        output: PathBuf,
    }

    fn parse_args() -> Result<Args, String> {
        let mut mode: Option<Mode> = None;
        let mut input: Option<PathBuf> = None;
        let mut output: Option<PathBuf> = None;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "encode" if mode.is_none() => mode = Some(Mode::Encode),
                "decode" if mode.is_none() => mode = Some(Mode::Decode),
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p murmur-core --bin transcode -- \\
  encode <in.wav> <out.mur> | decode <in.mur> <out.wav>"
                    );
                    std::process::exit(0);
                }
                other => {
                    if input.is_none() {
                        input = Some(PathBuf::from(other));
                    } else if output.is_none() {
                        output = Some(PathBuf::from(other));
                    } else {
                        return Err(format!("unexpected argument: {other}"));
                    }
                }
            }
        }

        Ok(Args {
            mode: mode.ok_or("missing mode: encode or decode")?,
            input: input.ok_or("missing input path")?,
            output: output.ok_or("missing output path")?,
        })
    }

    fn encode_wav(input: &Path, output: &Path) -> Result<(), String> {
        let mut reader = hound::WavReader::open(input).map_err(|e| e.to_string())?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int
            || !(spec.bits_per_sample == 8 || spec.bits_per_sample == 16)
        {
            return Err(format!(
                "only 8- and 16-bit integer WAV input is supported, got {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            ));
        }

        let mut session = EncodeSession::create(
            output,
            spec.sample_rate,
            u32::from(spec.channels),
            u32::from(spec.bits_per_sample),
        )
        .map_err(|e| e.to_string())?;

        let mut bytes = Vec::new();
        if spec.bits_per_sample == 16 {
            for sample in reader.samples::<i16>() {
                let sample = sample.map_err(|e| e.to_string())?;
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
        } else {
            for sample in reader.samples::<i8>() {
                bytes.push(sample.map_err(|e| e.to_string())? as u8);
            }
        }
        session.write(&bytes);

        let steps = session.samples_written();
        let peak = session.max_amplitude();
        let dropped = session.finish();
        if dropped > 0 {
            return Err(format!("{dropped} chunk(s) could not be written"));
        }
        println!(
            "Encoded {} samples/channel ({} Hz, {} ch, peak {:.3}) -> {}",
            steps,
            spec.sample_rate,
            spec.channels,
            peak,
            output.display()
        );
        Ok(())
    }

    fn decode_to_wav(input: &Path, output: &Path) -> Result<(), String> {
        let mut session = DecodeSession::open(input).map_err(|e| e.to_string())?;
        let spec = hound::WavSpec {
            channels: session.channels() as u16,
            sample_rate: session.sample_rate(),
            bits_per_sample: session.bits_per_sample() as u16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(output, spec).map_err(|e| e.to_string())?;

        let mut buf = vec![0u8; session.min_buffer_size().max(4096)];
        loop {
            match session.read(&mut buf) {
                Ok(n) => {
                    if session.bits_per_sample() == 16 {
                        for pair in buf[..n].chunks_exact(2) {
                            writer
                                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                                .map_err(|e| e.to_string())?;
                        }
                    } else {
                        for &byte in &buf[..n] {
                            writer
                                .write_sample(byte as i8)
                                .map_err(|e| e.to_string())?;
                        }
                    }
                }
                Err(ReadStatus::Finished) => break,
                Err(status) => {
                    return Err(format!("decode stopped with status {}", status.code()));
                }
            }
        }
        writer.finalize().map_err(|e| e.to_string())?;
        println!(
            "Decoded {} samples/channel ({} Hz, {} ch) -> {}",
            session.position(),
            session.sample_rate(),
            session.channels(),
            output.display()
        );
        Ok(())
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    if !args.input.exists() {
        return Err(format!("input not found: {}", args.input.display()));
    }
    match args.mode {
        Mode::Encode => encode_wav(&args.input, &args.output),
        Mode::Decode => decode_to_wav(&args.input, &args.output),
    }
}
