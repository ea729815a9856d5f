use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Audio driver error: {0}")]
    Driver(#[from] duplex_audio::Error),

    #[error("Device not usable: {0}")]
    DeviceNotUsable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No configuration directory available on this system")]
    NoConfigDir,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
