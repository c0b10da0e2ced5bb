use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::pull::PullEvent;

/// Raw console bytes from an attached container.
pub type ByteStream = BoxStream<'static, Result<Bytes, EngineError>>;

/// Decoded events from a streaming image pull.
pub type PullStream = BoxStream<'static, Result<PullEvent, EngineError>>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("docker connection failed: {0}")]
    Connect(String),

    #[error("image pull failed: {0}")]
    Pull(String),

    #[error("container api error: {0}")]
    Api(String),

    #[error("container wait failed: {0}")]
    Wait(String),
}

/// Everything the run pipeline needs to create one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Fully-qualified image reference (see [`crate::normalize_image`]).
    pub image: String,
    pub command: Vec<String>,
    /// `KEY=value` entries; task-level first, run-level appended.
    pub env: Vec<String>,
    pub workdir: String,
    pub privileged: bool,
    /// Host side of the bind mount: the overlay target.
    pub bind_source: PathBuf,
    /// Container side of the bind mount: the task's mountpoint.
    pub bind_target: String,
}

/// Contract with the docker engine. The production implementation is
/// [`crate::DockerEngine`]; tests drive the pipeline with a fake.
///
/// Containers are created with `AutoRemove` set and a `KILL` stop
/// signal; `container_wait` therefore waits for the *removed*
/// condition and resolves to the exit status code.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    async fn image_pull(&self, image: &str) -> Result<PullStream, EngineError>;

    /// Create a container named `name` from `spec`, returning its id.
    async fn container_create(&self, name: &str, spec: &ContainerSpec)
        -> Result<String, EngineError>;

    async fn container_start(&self, id: &str) -> Result<(), EngineError>;

    /// Attach to the container's multiplexed console stream.
    async fn container_attach(&self, id: &str) -> Result<ByteStream, EngineError>;

    async fn container_resize(&self, id: &str, height: u16, width: u16)
        -> Result<(), EngineError>;

    /// Wait for the container to be removed; the exit status code.
    async fn container_wait(&self, id: &str) -> Result<i64, EngineError>;

    /// Force-remove the container. Callers treat failures as advisory.
    async fn container_remove(&self, id: &str) -> Result<(), EngineError>;
}
