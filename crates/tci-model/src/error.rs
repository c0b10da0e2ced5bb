use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing partition between owner and repository: {0}")]
    RepoNameFormat(String),

    #[error("repository name contains an invalid path segment: {0}")]
    RepoNamePath(String),

    #[error("invalid resource quantity for {name}: {value}")]
    InvalidQuantity { name: &'static str, value: String },

    #[error("could not decode access token: {0}")]
    Token(String),
}

pub type ModelResult<T> = Result<T, ModelError>;
