use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipedashError {
    #[error("Envelope rejected: {0}")]
    Envelope(#[from] crate::envelope::EnvelopeError),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP server error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u64, max: u64 },

    #[error("No connected session with uuid: {0}")]
    UnknownSession(String),
}

pub type Result<T> = std::result::Result<T, PipedashError>;
