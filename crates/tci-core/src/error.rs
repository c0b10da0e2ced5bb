use thiserror::Error;

use tci_client::ClientError;

#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A runner hook failed in a way the framework cannot recover
    /// from; the main loop exits with this.
    #[error("fatal runner error: {0}")]
    Fatal(String),
}
