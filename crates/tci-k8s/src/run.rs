use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use tci_client::AssetClient;
use tci_core::{FrameworkError, Run, RunContext};
use tci_model::{default_branch, OAuthToken, QueueItem};

use crate::api::{CiJobApi, CiJobRepository, CiJobSpec, CiJobStatus};

/// How long cleanup of the CIJob and its secret may take before we
/// stop caring.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A single kubernetes-backed CI run.
pub struct K8sRun {
    name: String,
    ctx: Arc<RunContext>,
    api: Arc<dyn CiJobApi>,
    asset: Arc<dyn AssetClient>,
}

impl K8sRun {
    pub(crate) fn new(
        name: String,
        ctx: Arc<RunContext>,
        api: Arc<dyn CiJobApi>,
        asset: Arc<dyn AssetClient>,
    ) -> Self {
        Self {
            name,
            ctx,
            api,
            asset,
        }
    }

    fn build_spec(&self, item: &QueueItem, secret_name: &str) -> Result<CiJobSpec, String> {
        let sub = &item.run.task.submission;

        let resources = &item.run.settings.resources;
        resources.validate().map_err(|e| e.to_string())?;
        let resources: BTreeMap<String, String> = resources
            .iter()
            .map(|(name, quantity)| (name.to_string(), quantity.to_string()))
            .collect();

        Ok(CiJobSpec {
            image: item.run.settings.image.clone(),
            command: item.run.settings.command.clone(),
            repository: CiJobRepository {
                url: format!("https://github.com/{}", sub.head_ref.repository.name),
                secret_name: secret_name.to_string(),
                head_sha: sub.head_ref.sha.clone(),
                head_branch: default_branch(&sub.head_ref.ref_name).to_string(),
            },
            workdir: item.run.task.settings.workdir.clone(),
            env: item.run.task.settings.env.clone(),
            resources,
        })
    }

    /// Poll the CIJob until it finishes or the run is cancelled. The
    /// pod's console starts streaming to the asset service as soon as
    /// the controller names a pod.
    async fn supervise(&self, job_name: &str) -> bool {
        let cancel = self.ctx.cancel_token();
        let mut log_copy = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            let status: CiJobStatus = match self.api.job_status(job_name).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(job = job_name, error = %e, "could not poll job status; retrying");
                    continue;
                }
            };

            if !status.pod_name.is_empty() && !log_copy {
                log_copy = true;
                self.spawn_log_copy(status.pod_name.clone());
            }

            if status.finished {
                info!(job = job_name, success = status.success, "job completed");
                return status.success;
            }
        }
    }

    /// Stream the pod's logs into the asset service, retrying stream
    /// creation until it takes or the run ends.
    fn spawn_log_copy(&self, pod_name: String) {
        let api = self.api.clone();
        let asset = self.asset.clone();
        let run_id = self.ctx.run_id();
        let cancel = self.ctx.cancel_token();

        tokio::spawn(async move {
            info!(pod = %pod_name, "establishing log connection to assetsvc");

            let stream = loop {
                match api.pod_logs(&pod_name).await {
                    Ok(stream) => break stream,
                    Err(e) => {
                        warn!(pod = %pod_name, error = %e, "could not open log stream; retrying");
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(POLL_INTERVAL) => {}
                        }
                    }
                }
            };

            if let Err(e) = asset.write_log(run_id, stream).await {
                error!(run_id, error = %e, "while writing log to asset service");
            }
        });
    }

    /// Delete the CIJob and its secret, bounded by [`CLEANUP_TIMEOUT`].
    async fn cleanup(&self, job_name: &str, secret_name: &str) {
        info!(job = job_name, secret = secret_name, "cleanup of completed job commencing");

        let work = async {
            if let Err(e) = self.api.delete_job(job_name).await {
                error!(job = job_name, error = %e, "error deleting job during cleanup");
            }
            if let Err(e) = self.api.delete_secret(secret_name).await {
                error!(secret = secret_name, error = %e, "error deleting secret during cleanup");
            }
        };

        if tokio::time::timeout(CLEANUP_TIMEOUT, work).await.is_err() {
            error!(job = job_name, "cleanup timed out");
        }
    }
}

#[async_trait]
impl Run for K8sRun {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_run(&mut self) -> Result<(), FrameworkError> {
        Ok(())
    }

    async fn run(&mut self) -> Result<bool, FrameworkError> {
        let item = self.ctx.queue_item().clone();

        let job_name = format!("{}-{}", item.queue_name, item.id);
        let secret_name = format!("{job_name}-secret");

        let spec = match self.build_spec(&item, &secret_name) {
            Ok(spec) => spec,
            Err(e) => {
                error!(error = %e, "could not build job spec from queue item");
                return Ok(false);
            }
        };

        let token = match item
            .run
            .task
            .submission
            .base_ref
            .repository
            .owner
            .as_ref()
            .ok_or_else(|| "queue item carries no owner token".to_string())
            .and_then(|owner| OAuthToken::from_value(&owner.token).map_err(|e| e.to_string()))
        {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "could not extract git credentials from queue item");
                return Ok(false);
            }
        };

        if let Err(e) = self
            .api
            .create_secret(&secret_name, &token.username, &token.token)
            .await
        {
            error!(secret = %secret_name, error = %e, "could not create credential secret");
            return Ok(false);
        }

        if let Err(e) = self.api.create_job(&job_name, &spec).await {
            error!(job = %job_name, error = %e, "could not create job");
            self.cleanup(&job_name, &secret_name).await;
            return Ok(false);
        }

        let success = self.supervise(&job_name).await;
        self.cleanup(&job_name, &secret_name).await;

        Ok(success)
    }

    async fn after_run(&mut self) -> Result<(), FrameworkError> {
        Ok(())
    }
}
