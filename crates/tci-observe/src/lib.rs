//! Structured logging for tinyCI runners.
//!
//! Runners log through the `tracing` facade; this crate owns the global
//! subscriber. Every run executes inside a span carrying the run/task
//! fingerprint, so downstream collectors see the same fields the log
//! service historically indexed on.
mod config;
mod error;

pub use config::{LoggerConfig, LoggerFormat, LoggerLevel};
pub use error::LoggerError;

use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber described by `cfg`.
///
/// Call once, from `main`, before anything logs.
pub fn init_logger(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = cfg.level.to_env_filter();

    match cfg.format {
        LoggerFormat::Text => {
            let fmt_layer = fmt::layer()
                .with_ansi(cfg.use_color)
                .with_target(cfg.with_targets);
            init_subscriber(tracing_subscriber::registry().with(filter).with(fmt_layer))
        }
        LoggerFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(cfg.with_targets);
            init_subscriber(tracing_subscriber::registry().with(filter).with(fmt_layer))
        }
    }
}

fn init_subscriber<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber
        .try_init()
        .map_err(|_| LoggerError::AlreadyInitialized)
}
