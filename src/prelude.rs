pub use crate::model::*;

use miette::Diagnostic;
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("client error: {0}")]
    ClientError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("no majority across {got} of {total} endpoints")]
    ConsensusError { got: usize, total: usize },

    #[error("duplicate entity id between pages: {0}")]
    PaginationError(String),

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn config(text: impl Display) -> Error {
        Error::ConfigError(text.to_string())
    }

    pub fn client(error: impl Display) -> Error {
        Error::ClientError(error.to_string())
    }

    pub fn parse(error: impl Display) -> Error {
        Error::ParseError(error.to_string())
    }

    pub fn signing(error: impl Display) -> Error {
        Error::SigningError(error.to_string())
    }

    pub fn message(text: impl Into<String>) -> Error {
        Error::Message(text.into())
    }

    /// Whether a new attempt against the same upstream may succeed.
    /// Deterministic failures (no majority, duplicated pages, bad data)
    /// are handled at the tick level instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ClientError(_) | Error::IO(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::client(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::parse(err)
    }
}

#[derive(Clone, Default)]
pub struct CancelToken(pub tokio_util::sync::CancellationToken);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }
}
