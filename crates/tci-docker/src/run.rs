use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use tci_client::AssetClient;
use tci_core::{FrameworkError, LogPipe, LogSink, RetryPolicy, Run, RunContext};
use tci_git::{GitError, RepoManager};
use tci_model::QueueItem;
use tci_overlay::{OverlayError, OverlayMount};

use crate::config::DockerConfig;
use crate::engine::{ContainerSpec, Engine, EngineError};
use crate::pull::{normalize_image, stream_pull};

/// Fixed name for the one container this runner drives at a time.
/// Leftovers from a crashed run are force-removed before create.
const CONTAINER_NAME: &str = "running";

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Git(GitError),

    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("run cancelled")]
    Cancelled,
}

impl From<GitError> for RunError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::Cancelled => RunError::Cancelled,
            other => RunError::Git(other),
        }
    }
}

/// A single docker-backed CI run.
pub struct DockerRun {
    name: String,
    ctx: Arc<RunContext>,
    config: DockerConfig,
    engine: Arc<dyn Engine>,
    asset: Arc<dyn AssetClient>,
}

impl DockerRun {
    pub(crate) fn new(
        name: String,
        ctx: Arc<RunContext>,
        config: DockerConfig,
        engine: Arc<dyn Engine>,
        asset: Arc<dyn AssetClient>,
    ) -> Self {
        Self {
            name,
            ctx,
            config,
            engine,
            asset,
        }
    }

    /// The whole pipeline: repo, overlay, image, container. Anything
    /// that goes wrong here fails the *run*, not the runner process.
    async fn execute(&self, sink: &LogSink) -> Result<bool, RunError> {
        let cancel = self.ctx.cancel_token();
        let item = self.ctx.queue_item().clone();

        let manager = RepoManager::for_item(self.config.git.clone(), sink.clone(), &item)?;
        manager.pull(&cancel, &item).await?;

        let mut overlay =
            OverlayMount::allocate(manager.repo_path(), &self.config.overlay_tempdir)?;
        overlay.mount()?;

        let result = self
            .boot_and_supervise(sink, &item, overlay.target(), &cancel)
            .await;

        if let Err(e) = overlay.release() {
            warn!(error = %e, "overlay release failed");
        }

        result
    }

    async fn boot_and_supervise(
        &self,
        sink: &LogSink,
        item: &QueueItem,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, RunError> {
        let image = normalize_image(&item.run.settings.image);

        debug!(image = %image, "starting pull of image");
        let events = self.engine.image_pull(&image).await?;
        stream_pull(sink, events).await?;

        // a previous run may have left the name behind
        let _ = self.engine.container_remove(CONTAINER_NAME).await;

        let mut env = item.run.task.settings.env.clone();
        env.extend(item.run.settings.env.iter().cloned());

        let spec = ContainerSpec {
            image,
            command: item.run.settings.command.clone(),
            env,
            workdir: item.run.task.settings.workdir.clone(),
            privileged: item.run.settings.privileged,
            bind_source: target.to_path_buf(),
            bind_target: item.run.task.settings.mountpoint.clone(),
        };

        let engine = &self.engine;
        let id = RetryPolicy::attempts(5, Duration::from_secs(1))
            .run(|| engine.container_create(CONTAINER_NAME, &spec), |_| true)
            .await?;

        // stops with the run's token, or when supervision ends below
        let attach_stop = cancel.child_token();
        let attach = spawn_attach_supervisor(
            self.engine.clone(),
            id.clone(),
            sink.clone(),
            attach_stop.clone(),
        );

        self.engine.container_start(&id).await?;
        if let Err(e) = self.engine.container_resize(&id, 25, 80).await {
            debug!(error = %e, "could not resize container tty; skipping");
        }

        let status = tokio::select! {
            res = self.engine.container_wait(&id) => match res {
                Ok(code) => Ok(code == 0),
                Err(e) => {
                    error!(error = %e, container = %id, "error waiting for container");
                    Err(RunError::from(e))
                }
            },
            _ = cancel.cancelled() => Err(RunError::Cancelled),
        };

        attach_stop.cancel();
        let _ = attach.await;

        status
    }
}

/// Keep the container's console flowing into the build log: attach,
/// copy until the stream closes, and re-attach after transient attach
/// errors until the stop token fires. Available output is drained
/// ahead of the stop signal so the tail of the console survives.
fn spawn_attach_supervisor(
    engine: Arc<dyn Engine>,
    id: String,
    sink: LogSink,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if stop.is_cancelled() {
                return;
            }

            match engine.container_attach(&id).await {
                Ok(mut stream) => {
                    loop {
                        tokio::select! {
                            biased;
                            chunk = stream.next() => match chunk {
                                Some(Ok(bytes)) => sink.write(bytes).await,
                                Some(Err(_)) | None => break,
                            },
                            _ = stop.cancelled() => return,
                        }
                    }
                    debug!("attach closed; returning gracefully");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "error during attach, trying re-attach soon");
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
    })
}

#[async_trait]
impl Run for DockerRun {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_run(&mut self) -> Result<(), FrameworkError> {
        Ok(())
    }

    async fn run(&mut self) -> Result<bool, FrameworkError> {
        let pipe = LogPipe::start(self.ctx.run_id(), self.asset.clone());
        let sink = pipe.sink();

        let status = match self.execute(&sink).await {
            Ok(status) => status,
            // not an error; the queue's cancel state tells the rest
            Err(RunError::Cancelled) => false,
            Err(e) => {
                error!(error = %e, "run failed during setup");
                sink.error_line(&format!("run failed: {e}")).await;
                false
            }
        };

        drop(sink);
        pipe.finish().await;

        Ok(status)
    }

    async fn after_run(&mut self) -> Result<(), FrameworkError> {
        // force-removal is advisory; AutoRemove usually beat us to it
        let _ = self.engine.container_remove(CONTAINER_NAME).await;
        Ok(())
    }
}
