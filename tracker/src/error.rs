use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker is not running")]
    Stopped,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
