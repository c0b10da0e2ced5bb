use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use tci_client::LogStream;

#[derive(Debug, Error)]
pub enum K8sError {
    #[error("kubernetes api error: {0}")]
    Api(String),
}

/// Spec of one CIJob custom resource. The controller consuming these
/// is out of scope here; this is the shape we hand it.
#[derive(Debug, Clone)]
pub struct CiJobSpec {
    pub image: String,
    pub command: Vec<String>,
    pub repository: CiJobRepository,
    pub workdir: String,
    pub env: Vec<String>,
    /// Resource requests as `resource name → quantity string`.
    pub resources: BTreeMap<String, String>,
}

/// Where the job's pod clones from, and the secret holding its
/// credentials.
#[derive(Debug, Clone)]
pub struct CiJobRepository {
    pub url: String,
    pub secret_name: String,
    pub head_sha: String,
    pub head_branch: String,
}

/// Observed state of a CIJob.
#[derive(Debug, Clone, Default)]
pub struct CiJobStatus {
    /// Empty until the controller schedules the pod.
    pub pod_name: String,
    pub canceled: bool,
    pub finished: bool,
    pub success: bool,
}

/// Contract with the cluster: everything the executor needs from the
/// kubernetes API, namespaced by the implementation.
#[async_trait]
pub trait CiJobApi: Send + Sync + 'static {
    /// Create the secret holding `{username, password}` for git auth.
    async fn create_secret(
        &self,
        name: &str,
        username: &str,
        password: &str,
    ) -> Result<(), K8sError>;

    async fn create_job(&self, name: &str, spec: &CiJobSpec) -> Result<(), K8sError>;

    async fn job_status(&self, name: &str) -> Result<CiJobStatus, K8sError>;

    /// Follow the pod's console output.
    async fn pod_logs(&self, pod_name: &str) -> Result<LogStream, K8sError>;

    async fn delete_job(&self, name: &str) -> Result<(), K8sError>;

    async fn delete_secret(&self, name: &str) -> Result<(), K8sError>;
}
