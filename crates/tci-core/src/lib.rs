//! Runner framework for tinyCI agents.
//!
//! To implement a runner, satisfy the [`Runner`] trait, wrap it in an
//! [`Entrypoint`] and hand that to [`run`]. The framework then owns:
//!
//! - dequeueing work and dispatching it to your runner
//! - signal handling, cancellation and graceful shutdown
//! - status/cancel reporting back to the queue service
//! - piping build output to the asset service
//!
//! What you do inside your [`Run`] is up to you; the framework is
//! deliberately light to avoid prescribing how runners should work.
mod cancel;
mod config;
mod context;
mod error;
mod lifecycle;
mod pipe;
mod record;
mod retry;
mod runner;
mod shutdown;

#[cfg(test)]
pub(crate) mod testutil;

pub use cancel::spawn_cancel_poller;
pub use config::{ClientConfig, Config};
pub use context::RunContext;
pub use error::FrameworkError;
pub use lifecycle::{run, Entrypoint};
pub use pipe::{color, LogPipe, LogSink};
pub use record::{ActiveRun, RunRecord};
pub use retry::RetryPolicy;
pub use runner::{Run, Runner};
pub use shutdown::{hard_stop, spawn_signal_listener, ShutdownCoordinator, ShutdownSignal};
