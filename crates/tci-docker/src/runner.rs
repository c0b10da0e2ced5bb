use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use tci_client::AssetClient;
use tci_core::{FrameworkError, Run, RunContext, Runner};

use crate::config::DockerConfig;
use crate::engine::Engine;
use crate::run::DockerRun;

/// The docker+overlay runner: a single container at a time, gated by
/// the busy flag.
pub struct DockerRunner {
    config: DockerConfig,
    engine: Arc<dyn Engine>,
    asset: Arc<dyn AssetClient>,
    busy: AtomicBool,
}

impl DockerRunner {
    pub fn new(
        config: DockerConfig,
        engine: Arc<dyn Engine>,
        asset: Arc<dyn AssetClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            engine,
            asset,
            busy: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Runner for DockerRunner {
    fn queue_name(&self) -> &str {
        &self.config.base.queue_name
    }

    fn hostname(&self) -> &str {
        &self.config.base.hostname
    }

    fn ready(&self) -> bool {
        !self.busy.load(Ordering::SeqCst)
    }

    async fn make_run(
        &self,
        name: &str,
        ctx: Arc<RunContext>,
    ) -> Result<Box<dyn Run>, FrameworkError> {
        self.busy.store(true, Ordering::SeqCst);

        Ok(Box::new(DockerRun::new(
            name.to_string(),
            ctx,
            self.config.clone(),
            self.engine.clone(),
            self.asset.clone(),
        )))
    }

    async fn after_run(&self, _name: &str, _ctx: &RunContext) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tci_client::{ClientResult, LogStream};

    struct NullAsset;

    #[async_trait]
    impl AssetClient for NullAsset {
        async fn write_log(&self, _run_id: i64, mut stream: LogStream) -> ClientResult<()> {
            while stream.next().await.is_some() {}
            Ok(())
        }
    }

    struct NoEngine;

    #[async_trait]
    impl Engine for NoEngine {
        async fn image_pull(
            &self,
            _image: &str,
        ) -> Result<crate::PullStream, crate::EngineError> {
            Ok(futures::stream::empty().boxed())
        }

        async fn container_create(
            &self,
            _name: &str,
            _spec: &crate::ContainerSpec,
        ) -> Result<String, crate::EngineError> {
            Ok("cid".to_string())
        }

        async fn container_start(&self, _id: &str) -> Result<(), crate::EngineError> {
            Ok(())
        }

        async fn container_attach(
            &self,
            _id: &str,
        ) -> Result<crate::ByteStream, crate::EngineError> {
            Ok(futures::stream::empty().boxed())
        }

        async fn container_resize(
            &self,
            _id: &str,
            _height: u16,
            _width: u16,
        ) -> Result<(), crate::EngineError> {
            Ok(())
        }

        async fn container_wait(&self, _id: &str) -> Result<i64, crate::EngineError> {
            Ok(0)
        }

        async fn container_remove(&self, _id: &str) -> Result<(), crate::EngineError> {
            Ok(())
        }
    }

    fn queue_item() -> tci_model::QueueItem {
        serde_json::from_value(serde_json::json!({
            "id": 1,
            "queue_name": "default",
            "run": {
                "id": 42,
                "settings": {"image": "alpine", "command": ["true"]},
                "task": {
                    "submission": {
                        "base_ref": {"repository": {"name": "erikh/foo"}, "ref_name": "heads/main"},
                        "head_ref": {"repository": {"name": "other/foo"}, "ref_name": "heads/fix", "sha": "abc"}
                    }
                }
            }
        }))
        .expect("fixture queue item")
    }

    #[tokio::test]
    async fn busy_flag_gates_readiness_around_a_run() {
        let runner = DockerRunner::new(
            DockerConfig::default(),
            Arc::new(NoEngine),
            Arc::new(NullAsset),
        );
        assert!(runner.ready());

        let ctx = RunContext::new(queue_item(), "testhost");
        let _run = runner
            .make_run("default.42", ctx.clone())
            .await
            .expect("make_run succeeds");
        assert!(!runner.ready());

        runner.after_run("default.42", &ctx).await;
        assert!(runner.ready());
    }
}
