use async_trait::async_trait;
use serde::Serialize;

use tci_model::QueueItem;

use crate::error::{ClientError, ClientResult};
use crate::tls::CertConfig;

/// The sentinel the queue service embeds in its conflict response when
/// a status was already reported for a run. Matched once, here, and
/// surfaced as [`ClientError::StatusAlreadySet`] so the framework never
/// has to sniff strings.
const STATUS_ALREADY_SET: &str = "status already set for run";

/// Client to the queue service: dequeue, cancel state, status reports.
#[async_trait]
pub trait QueueClient: Send + Sync + 'static {
    /// Pull the next pending item for `queue`, tagging the dequeue with
    /// this runner's hostname. Returns [`ClientError::NotFound`] when
    /// the queue is empty.
    async fn next_queue_item(&self, queue: &str, hostname: &str) -> ClientResult<QueueItem>;

    /// Whether the given run has been cancelled queue-side.
    async fn get_cancel(&self, run_id: i64) -> ClientResult<bool>;

    /// Mark the run cancelled.
    async fn set_cancel(&self, run_id: i64) -> ClientResult<()>;

    /// Report the final pass/fail status for the run.
    async fn set_status(&self, run_id: i64, status: bool) -> ClientResult<()>;
}

/// HTTP implementation of [`QueueClient`].
pub struct HttpQueueClient {
    base: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct StatusBody {
    status: bool,
}

impl HttpQueueClient {
    /// Build a client for the `host:port` (or full URL) of the queue
    /// service, applying the shared TLS client settings.
    pub fn new(addr: &str, tls: &CertConfig) -> ClientResult<Self> {
        Ok(Self {
            base: tls.base_url(addr),
            http: tls.client()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn next_queue_item(&self, queue: &str, hostname: &str) -> ClientResult<QueueItem> {
        let resp = self
            .http
            .get(self.url(&format!("queue/{queue}/next")))
            .query(&[("hostname", hostname)])
            .send()
            .await?;

        match resp.status() {
            reqwest::StatusCode::NOT_FOUND => Err(ClientError::NotFound),
            s if s.is_success() => resp
                .json()
                .await
                .map_err(|e| ClientError::Protocol(e.to_string())),
            s => Err(ClientError::Protocol(format!(
                "unexpected dequeue status: {s}"
            ))),
        }
    }

    async fn get_cancel(&self, run_id: i64) -> ClientResult<bool> {
        let resp = self
            .http
            .get(self.url(&format!("runs/{run_id}/cancel")))
            .send()
            .await?
            .error_for_status()?;

        resp.json()
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()))
    }

    async fn set_cancel(&self, run_id: i64) -> ClientResult<()> {
        self.http
            .post(self.url(&format!("runs/{run_id}/cancel")))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn set_status(&self, run_id: i64, status: bool) -> ClientResult<()> {
        let resp = self
            .http
            .put(self.url(&format!("runs/{run_id}/status")))
            .json(&StatusBody { status })
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::CONFLICT {
            let body = resp.text().await.unwrap_or_default();
            if body.contains(STATUS_ALREADY_SET) {
                return Err(ClientError::StatusAlreadySet);
            }
            return Err(ClientError::Protocol(format!("status conflict: {body}")));
        }

        resp.error_for_status()?;
        Ok(())
    }
}
