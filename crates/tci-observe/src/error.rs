use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid level filter: {0}")]
    InvalidLevel(String),

    #[error("a global logger was already initialized")]
    AlreadyInitialized,
}
