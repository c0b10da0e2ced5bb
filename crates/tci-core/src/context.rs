use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info_span, Span};

use tci_model::QueueItem;

/// Per-run state owned by the lifecycle loop.
///
/// Created when a queue item is dequeued; its cancel token is the
/// single rendezvous for all three cancellation sources (timeout,
/// queue-side cancel, process signals). Supervisors observe the token,
/// they do not retain the context.
pub struct RunContext {
    queue_item: QueueItem,
    start: Instant,
    cancel: CancellationToken,
    timed_out: Arc<AtomicBool>,
    span: Span,
}

impl RunContext {
    /// Build the context for a freshly dequeued item. When the run
    /// carries a timeout, a deadline watcher is armed that fires the
    /// cancel token and marks the run timed out.
    pub fn new(queue_item: QueueItem, hostname: &str) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));

        let timeout_ms = queue_item.run.settings.timeout_ms;
        if timeout_ms > 0 {
            let token = cancel.clone();
            let flag = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                        flag.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                }
            });
        }

        let sub = &queue_item.run.task.submission;
        let span = info_span!(
            "run",
            hostname = %hostname,
            queue = %queue_item.queue_name,
            run_id = queue_item.run_id(),
            task_id = queue_item.run.task.id,
            parent = %sub.base_ref.repository.name,
            repository = %sub.head_ref.repository.name,
            sha = %sub.head_ref.sha,
        );

        Arc::new(Self {
            queue_item,
            start: Instant::now(),
            cancel,
            timed_out,
            span,
        })
    }

    pub fn queue_item(&self) -> &QueueItem {
        &self.queue_item
    }

    pub fn run_id(&self) -> i64 {
        self.queue_item.run_id()
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    /// A clone of the run's cancel token, for anything that needs to
    /// observe or race against cancellation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fire the run's cancel token. Idempotent.
    pub fn trigger_cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the deadline watcher (as opposed to a signal or the
    /// queue) is what fired the token.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// The logging span carrying this run's fingerprint fields.
    pub fn span(&self) -> &Span {
        &self.span
    }
}
