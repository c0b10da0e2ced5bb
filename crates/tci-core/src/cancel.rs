use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use tci_client::QueueClient;

use crate::context::RunContext;

/// Spawn the per-run cancellation poller.
///
/// Every second the queue service is asked whether the run was
/// cancelled; a positive answer fires the run's cancel token. Poll
/// errors are logged and retried, they never cancel the run. The
/// poller reaps itself once the token is done, whoever fired it.
pub fn spawn_cancel_poller(queue: Arc<dyn QueueClient>, ctx: Arc<RunContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let run_id = ctx.run_id();
        let token = ctx.cancel_token();

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }

            match queue.get_cancel(run_id).await {
                Ok(true) => {
                    info!(run_id, "queue requested cancellation of the current run");
                    ctx.trigger_cancel();
                    return;
                }
                Ok(false) => {}
                Err(e) => debug!(run_id, error = %e, "cancel poll failed; retrying"),
            }
        }
    })
}
