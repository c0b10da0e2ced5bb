use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use tci_client::AssetClient;
use tci_core::{FrameworkError, Run, RunContext, Runner};

use crate::api::CiJobApi;
use crate::config::K8sConfig;
use crate::run::K8sRun;

/// The kubernetes runner: up to `max_concurrency` CIJobs in flight.
pub struct K8sRunner {
    config: K8sConfig,
    api: Arc<dyn CiJobApi>,
    asset: Arc<dyn AssetClient>,
    run_count: AtomicU32,
}

impl K8sRunner {
    pub fn new(config: K8sConfig, api: Arc<dyn CiJobApi>, asset: Arc<dyn AssetClient>) -> Arc<Self> {
        Arc::new(Self {
            config,
            api,
            asset,
            run_count: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Runner for K8sRunner {
    fn queue_name(&self) -> &str {
        &self.config.base.queue_name
    }

    fn hostname(&self) -> &str {
        &self.config.base.hostname
    }

    fn ready(&self) -> bool {
        self.run_count.load(Ordering::SeqCst) < self.config.max_concurrency
    }

    async fn make_run(
        &self,
        name: &str,
        ctx: Arc<RunContext>,
    ) -> Result<Box<dyn Run>, FrameworkError> {
        self.run_count.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(K8sRun::new(
            name.to_string(),
            ctx,
            self.api.clone(),
            self.asset.clone(),
        )))
    }

    async fn after_run(&self, _name: &str, _ctx: &RunContext) {
        self.run_count.fetch_sub(1, Ordering::SeqCst);
    }
}
