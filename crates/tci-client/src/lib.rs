//! Clients to the tinyCI services a runner talks to.
//!
//! The framework core only sees the [`QueueClient`] and [`AssetClient`]
//! traits; the HTTP implementations here are what the shipped binaries
//! wire in. Tests substitute in-memory fakes.
mod asset;
mod error;
mod queue;
mod tls;

pub use asset::{AssetClient, HttpAssetClient, LogStream};
pub use error::{ClientError, ClientResult};
pub use queue::{HttpQueueClient, QueueClient};
pub use tls::CertConfig;
