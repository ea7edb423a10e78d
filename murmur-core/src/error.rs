use thiserror::Error;

/// All errors produced by murmur-core.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec engine could not be initialised: {0}")]
    EngineInit(String),

    #[error("stream metadata could not be read: {0}")]
    Metadata(String),

    #[error("invalid encoder configuration: {0}")]
    Config(String),

    #[error("unsupported bit depth: {0} (only 8 and 16 are handled)")]
    UnsupportedBitDepth(u32),

    #[error("writer thread could not be spawned: {0}")]
    WriterSpawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
