use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The queue has no work for us right now.
    #[error("not found")]
    NotFound,

    /// The queue already holds a final status for this run.
    #[error("status already set for run")]
    StatusAlreadySet,

    /// The request was torn down by cancellation on our side.
    #[error("request cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tls configuration error: {0}")]
    Tls(String),
}

impl ClientError {
    /// Whether the caller should retry the request after a backoff.
    ///
    /// `NotFound`, `StatusAlreadySet` and `Cancelled` are terminal
    /// answers, not failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Protocol(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
