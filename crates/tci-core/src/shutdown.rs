use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tci_client::{ClientError, QueueClient};

use crate::record::RunRecord;
use crate::retry::RetryPolicy;

/// The two shutdown shapes a signal can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// HANGUP: stop dequeueing, let active runs finish, then exit.
    GracefulDrain,
    /// INTERRUPT/TERMINATE: cancel everything, wait for teardown,
    /// exit.
    HardStop,
}

/// Process-wide shutdown state: the terminate flag plus the table of
/// active runs. Exactly one of these exists per runner process.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    terminate: RwLock<bool>,
    record: RunRecord,
}

impl ShutdownCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_terminate(&self) {
        *self.terminate.write().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn is_terminate(&self) -> bool {
        *self.terminate.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn active_runs(&self) -> usize {
        self.record.len()
    }
}

/// Consume process signals and dispatch shutdown behavior.
///
/// HANGUP drains; INTERRUPT and TERMINATE hard-stop and then exit the
/// process with code 0 once the teardown window has passed.
pub fn spawn_signal_listener(
    coordinator: Arc<ShutdownCoordinator>,
    queue: Arc<dyn QueueClient>,
    teardown: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "could not install HANGUP handler");
                return;
            }
        };
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "could not install INTERRUPT handler");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "could not install TERMINATE handler");
                return;
            }
        };

        loop {
            let request = tokio::select! {
                _ = hangup.recv() => ShutdownSignal::GracefulDrain,
                _ = interrupt.recv() => ShutdownSignal::HardStop,
                _ = terminate.recv() => ShutdownSignal::HardStop,
            };

            match request {
                ShutdownSignal::GracefulDrain => {
                    info!("graceful restart requested; waiting for active runs to finish");
                    coordinator.set_terminate();
                }
                ShutdownSignal::HardStop => {
                    hard_stop(&coordinator, queue.as_ref(), teardown).await;
                    info!("shutting down runner");
                    std::process::exit(0);
                }
            }
        }
    })
}

/// Cancel every active run, report the cancellations to the queue, and
/// wait up to `teardown` for the run table to drain.
///
/// The per-run work fans out in parallel; a run that the queue already
/// knows is cancelled only has its token fired.
pub async fn hard_stop(
    coordinator: &ShutdownCoordinator,
    queue: &dyn QueueClient,
    teardown: Duration,
) {
    coordinator.set_terminate();

    let active = coordinator.record().snapshot();
    warn!(active = active.len(), "hard stop requested; cancelling active runs");

    let cancels = active.into_iter().map(|(name, run)| async move {
        let known = queue.get_cancel(run.run_id).await.unwrap_or(false);
        if !known {
            let report = RetryPolicy::attempts(5, Duration::from_secs(1));
            let res = report
                .run(|| queue.set_cancel(run.run_id), ClientError::is_retryable)
                .await;
            if let Err(e) = res {
                error!(run = %name, error = %e, "could not report cancellation to queue");
            }
        }

        run.cancel.cancel();
    });
    futures::future::join_all(cancels).await;

    let deadline = Instant::now() + teardown;
    while coordinator.active_runs() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ActiveRun;
    use crate::testutil::MockQueue;
    use tokio_util::sync::CancellationToken;

    fn insert_run(coordinator: &ShutdownCoordinator, name: &str, run_id: i64) -> CancellationToken {
        let token = CancellationToken::new();
        coordinator.record().insert(
            name,
            ActiveRun {
                run_id,
                cancel: token.clone(),
            },
        );
        token
    }

    #[test]
    fn terminate_flag_flips_once() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_terminate());

        coordinator.set_terminate();
        coordinator.set_terminate();
        assert!(coordinator.is_terminate());
    }

    #[tokio::test(start_paused = true)]
    async fn hard_stop_cancels_every_active_run_and_reports() {
        let coordinator = ShutdownCoordinator::new();
        let queue = MockQueue::with_items(Vec::new());

        let first = insert_run(&coordinator, "default.1", 1);
        let second = insert_run(&coordinator, "default.2", 2);

        // runs leave the table as their tokens fire
        let drained = coordinator.clone();
        tokio::spawn(async move {
            first.cancelled().await;
            drained.record().remove("default.1");
            drained.record().remove("default.2");
        });

        hard_stop(&coordinator, queue.as_ref(), Duration::from_secs(5)).await;

        assert!(coordinator.is_terminate());
        assert!(second.is_cancelled());
        let mut cancels = queue.set_cancels();
        cancels.sort_unstable();
        assert_eq!(cancels, vec![1, 2]);
        assert_eq!(coordinator.active_runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_stop_skips_cancel_report_when_queue_already_knows() {
        let coordinator = ShutdownCoordinator::new();
        let queue = MockQueue::with_items(Vec::new());
        queue.mark_cancelled(3);

        let token = insert_run(&coordinator, "default.3", 3);
        let drained = coordinator.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            drained.record().remove("default.3");
        });

        hard_stop(&coordinator, queue.as_ref(), Duration::from_secs(5)).await;

        assert!(queue.set_cancels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hard_stop_gives_up_after_the_teardown_window() {
        let coordinator = ShutdownCoordinator::new();
        let queue = MockQueue::with_items(Vec::new());

        // this run never leaves the table
        insert_run(&coordinator, "default.4", 4);

        let started = tokio::time::Instant::now();
        hard_stop(&coordinator, queue.as_ref(), Duration::from_secs(2)).await;

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(coordinator.active_runs(), 1);
    }
}
