use thiserror::Error;

use tci_model::ModelError;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("queue item carries no owner token")]
    MissingToken,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty allocation failed: {0}")]
    Pty(#[from] nix::Error),

    #[error("{command} exited with status {code:?}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
    },

    #[error("git operation cancelled")]
    Cancelled,
}
