use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolkitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("No video stream")]
    NoVideoStream,

    #[error("Insufficient space in {dir}: {available} bytes free, {required} bytes needed")]
    InsufficientSpace {
        dir: String,
        available: u64,
        required: u64,
    },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Step failed: {0}")]
    StepFailed(String),

    #[error("Job {0} is running")]
    JobRunning(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid transition for job {id}: {reason}")]
    InvalidTransition { id: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ToolkitError>;
