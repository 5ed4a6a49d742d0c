use thiserror::Error;

use crate::Denial;

#[derive(Debug, Error)]
pub enum Error {
    /// Expected business denial from an admission check. Surfaced verbatim
    /// to the client, never fatal.
    #[error(transparent)]
    Admission(#[from] Denial),

    #[error("Strategy definition error: {0}")]
    Definition(String),

    #[error("Signal engine error: {0}")]
    Engine(String),

    #[error("Data feed error: {0}")]
    Feed(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for denials that should come back as a failed-but-healthy
    /// command response rather than a daemon fault.
    pub fn is_admission(&self) -> bool {
        matches!(self, Error::Admission(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
