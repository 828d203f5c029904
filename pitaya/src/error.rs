use std::path::PathBuf;
use thiserror::Error;

/// Every fallible operation in the crate returns this error. Soft
/// failures (a missed SMS, a failed capture) are reported as plain
/// values instead and never end up here.
#[derive(Error, Debug)]
pub enum PitayaError {
    #[error("Could not locate the config file {0:?}")]
    ConfigMissing(PathBuf),

    #[error("Failed to read config: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid phone number {0:?}")]
    InvalidRecipient(String),

    #[error("Failed to open serial port {port}: {source}")]
    SerialOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to load image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Model file not found: {0:?}")]
    ModelMissing(PathBuf),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model returned no scores")]
    EmptyScores,

    #[error("Failed to write detection log: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PitayaError>;
