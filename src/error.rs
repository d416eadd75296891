//! Error types for PetalSound

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PetalSoundError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown sound: {0}")]
    UnknownSound(String),

    #[error("A sound named '{0}' already exists")]
    DuplicateSound(String),

    #[error("Cue point {index} out of range ({count} cue points)")]
    InvalidCuePoint { index: usize, count: usize },

    #[error("Play position {position:.3}s is outside the sound ({length:.3}s)")]
    InvalidPosition { position: f32, length: f32 },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, PetalSoundError>;
