use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing identity/content; rejected before anything is persisted.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
