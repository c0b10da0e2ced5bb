use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn, Instrument};

use tci_client::{ClientError, QueueClient};

use crate::cancel::spawn_cancel_poller;
use crate::context::RunContext;
use crate::error::FrameworkError;
use crate::record::ActiveRun;
use crate::retry::RetryPolicy;
use crate::runner::{Run, Runner};
use crate::shutdown::{spawn_signal_listener, ShutdownCoordinator};

/// How long the loop idles when there is nothing to do: empty queue,
/// not-ready runner, transient queue errors, drain wait.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Boot-time description of a runner process: the runner to drive plus
/// the clients and teardown window the framework needs.
pub struct Entrypoint {
    pub runner: Arc<dyn Runner>,
    pub queue: Arc<dyn QueueClient>,
    /// How long a hard stop waits for active runs to tear down before
    /// the process exits.
    pub teardown: Duration,
}

impl Entrypoint {
    pub fn new(runner: Arc<dyn Runner>, queue: Arc<dyn QueueClient>) -> Self {
        Self {
            runner,
            queue,
            teardown: Duration::from_secs(10),
        }
    }

    pub fn with_teardown(mut self, teardown: Duration) -> Self {
        self.teardown = teardown;
        self
    }
}

/// Run the given entrypoint. On error you can assume the only safe
/// option is to exit.
pub async fn run(entry: Entrypoint) -> Result<(), FrameworkError> {
    let coordinator = ShutdownCoordinator::new();
    let listener = spawn_signal_listener(coordinator.clone(), entry.queue.clone(), entry.teardown);

    let result = run_loop(&entry, &coordinator).await;
    listener.abort();
    result
}

/// The lifecycle loop: poll the queue, build a run context, dispatch,
/// and let the per-run task finalize. Single-threaded by design; the
/// runner's `ready` gate is the only concurrency throttle.
pub(crate) async fn run_loop(
    entry: &Entrypoint,
    coordinator: &Arc<ShutdownCoordinator>,
) -> Result<(), FrameworkError> {
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<FrameworkError>(1);

    info!("initializing runner");

    loop {
        if let Ok(err) = fatal_rx.try_recv() {
            return Err(err);
        }

        if coordinator.is_terminate() {
            if coordinator.active_runs() == 0 {
                info!("no active runs remain; leaving the lifecycle loop");
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        if !entry.runner.ready() {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        let item = match entry
            .queue
            .next_queue_item(entry.runner.queue_name(), entry.runner.hostname())
            .await
        {
            Ok(item) => item,
            Err(ClientError::NotFound) => {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            Err(ClientError::Cancelled) => {
                coordinator.set_terminate();
                continue;
            }
            Err(e) => {
                error!(error = %e, "error reading from queue");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        let ctx = RunContext::new(item, entry.runner.hostname());
        let run_name = format!("{}.{}", ctx.queue_item().queue_name, ctx.run_id());

        coordinator.record().insert(
            &run_name,
            ActiveRun {
                run_id: ctx.run_id(),
                cancel: ctx.cancel_token(),
            },
        );

        let run = match entry.runner.make_run(&run_name, ctx.clone()).await {
            Ok(run) => run,
            Err(e) => {
                coordinator.record().remove(&run_name);
                return Err(e);
            }
        };

        spawn_cancel_poller(entry.queue.clone(), ctx.clone());

        let span = ctx.span().clone();
        tokio::spawn(
            drive_run(
                run,
                ctx,
                run_name,
                entry.runner.clone(),
                entry.queue.clone(),
                coordinator.clone(),
                fatal_tx.clone(),
            )
            .instrument(span),
        );
    }
}

/// Execute one run end to end: hooks in order, then finalization.
/// The finalizer always runs, and the run leaves the record table
/// only after the runner's after-run hook had its chance.
async fn drive_run(
    mut run: Box<dyn Run>,
    ctx: Arc<RunContext>,
    run_name: String,
    runner: Arc<dyn Runner>,
    queue: Arc<dyn QueueClient>,
    coordinator: Arc<ShutdownCoordinator>,
    fatal_tx: mpsc::Sender<FrameworkError>,
) {
    info!("received run data; commencing with test");

    let outcome: Result<bool, FrameworkError> = async {
        run.before_run().await?;
        let status = run.run().await?;
        if let Err(e) = run.after_run().await {
            warn!(error = %e, "after-run cleanup failed");
        }
        Ok(status)
    }
    .await;

    match outcome {
        Ok(status) => finalize(queue.as_ref(), &ctx, status).await,
        Err(e) => {
            error!(error = %e, "run concluded with fatal error");
            let _ = fatal_tx.try_send(e);
        }
    }

    // reap the deadline watcher and cancel poller
    ctx.trigger_cancel();

    coordinator.record().remove(&run_name);
    runner.after_run(&run_name, &ctx).await;

    info!(elapsed = ?ctx.start().elapsed(), "run finished");
}

/// Report the run's outcome to the queue.
///
/// A timed-out run the queue does not yet know about becomes a cancel;
/// an already-cancelled run is reported by nobody; everything else is
/// a status. Reports retry without bound on transient errors, and a
/// "status already set" answer counts as done.
async fn finalize(queue: &dyn QueueClient, ctx: &RunContext, status: bool) {
    let run_id = ctx.run_id();

    let did_cancel = match queue.get_cancel(run_id).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "cannot retrieve cancel state of current job");
            tokio::time::sleep(POLL_INTERVAL).await;
            false
        }
    };

    let report = RetryPolicy::unbounded(POLL_INTERVAL);

    if ctx.timed_out() && !did_cancel {
        let res = report
            .run(
                || async {
                    match queue.set_cancel(run_id).await {
                        Err(ClientError::StatusAlreadySet) => Ok(()),
                        other => other,
                    }
                },
                ClientError::is_retryable,
            )
            .await;
        if let Err(e) = res {
            error!(error = %e, "cannot cancel current job");
        }
        return;
    }

    if !did_cancel {
        let res = report
            .run(
                || async {
                    match queue.set_status(run_id, status).await {
                        Err(ClientError::StatusAlreadySet) => Ok(()),
                        other => other,
                    }
                },
                ClientError::is_retryable,
            )
            .await;
        if let Err(e) = res {
            error!(error = %e, "status report resulted in error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{queue_item, MockQueue, RunScript, TestRunner};
    use std::sync::atomic::Ordering;

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn entry(runner: Arc<TestRunner>, queue: Arc<MockQueue>) -> Entrypoint {
        Entrypoint::new(runner, queue).with_teardown(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_reports_pass() {
        let queue = MockQueue::with_items(vec![queue_item(42, 0)]);
        let runner = TestRunner::new(RunScript::Sleep(Duration::from_millis(50), true));
        let coordinator = ShutdownCoordinator::new();

        let entry = entry(runner, queue.clone());
        let loop_coordinator = coordinator.clone();
        let handle = tokio::spawn(async move { run_loop(&entry, &loop_coordinator).await });

        wait_for(|| !queue.statuses().is_empty()).await;
        coordinator.set_terminate();
        handle.await.unwrap().expect("loop exits cleanly");

        assert_eq!(queue.statuses(), vec![(42, true)]);
        assert!(queue.set_cancels().is_empty());
        assert_eq!(coordinator.active_runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_zero_exit_reports_fail_without_cancel() {
        let queue = MockQueue::with_items(vec![queue_item(42, 0)]);
        let runner = TestRunner::new(RunScript::Sleep(Duration::from_millis(50), false));
        let coordinator = ShutdownCoordinator::new();

        let entry = entry(runner, queue.clone());
        let loop_coordinator = coordinator.clone();
        let handle = tokio::spawn(async move { run_loop(&entry, &loop_coordinator).await });

        wait_for(|| !queue.statuses().is_empty()).await;
        coordinator.set_terminate();
        handle.await.unwrap().expect("loop exits cleanly");

        assert_eq!(queue.statuses(), vec![(42, false)]);
        assert!(queue.set_cancels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_becomes_a_queue_cancel() {
        // 100ms deadline, job would sleep a minute
        let queue = MockQueue::with_items(vec![queue_item(42, 100)]);
        let runner = TestRunner::new(RunScript::Sleep(Duration::from_secs(60), true));
        let coordinator = ShutdownCoordinator::new();

        let entry = entry(runner, queue.clone());
        let loop_coordinator = coordinator.clone();
        let handle = tokio::spawn(async move { run_loop(&entry, &loop_coordinator).await });

        wait_for(|| !queue.set_cancels().is_empty()).await;
        coordinator.set_terminate();
        handle.await.unwrap().expect("loop exits cleanly");

        assert_eq!(queue.set_cancels(), vec![42]);
        assert!(queue.statuses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn operator_cancel_reports_nothing() {
        let queue = MockQueue::with_items(vec![queue_item(42, 0)]);
        let runner = TestRunner::new(RunScript::Sleep(Duration::from_secs(60), true));
        let coordinator = ShutdownCoordinator::new();

        let entry = entry(runner.clone(), queue.clone());
        let loop_coordinator = coordinator.clone();
        let handle = tokio::spawn(async move { run_loop(&entry, &loop_coordinator).await });

        wait_for(|| runner.runs_started.load(Ordering::SeqCst) > 0).await;
        queue.mark_cancelled(42);

        // the poller notices within about a second and the run winds down
        wait_for(|| coordinator.active_runs() == 0).await;
        coordinator.set_terminate();
        handle.await.unwrap().expect("loop exits cleanly");

        assert!(queue.statuses().is_empty());
        assert!(queue.set_cancels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn status_report_retries_through_transient_errors() {
        let queue = MockQueue::with_items(vec![queue_item(42, 0)]);
        queue.status_failures.store(2, Ordering::SeqCst);
        let runner = TestRunner::new(RunScript::Sleep(Duration::from_millis(10), true));
        let coordinator = ShutdownCoordinator::new();

        let entry = entry(runner, queue.clone());
        let loop_coordinator = coordinator.clone();
        let handle = tokio::spawn(async move { run_loop(&entry, &loop_coordinator).await });

        wait_for(|| !queue.statuses().is_empty()).await;
        coordinator.set_terminate();
        handle.await.unwrap().expect("loop exits cleanly");

        assert_eq!(queue.statuses(), vec![(42, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn hangup_blocks_dequeues_and_exits_after_the_run() {
        let queue = MockQueue::with_items(vec![queue_item(42, 0), queue_item(43, 0)]);
        let runner = TestRunner::new(RunScript::Sleep(Duration::from_secs(5), true));
        let coordinator = ShutdownCoordinator::new();

        let entry = entry(runner.clone(), queue.clone());
        let loop_coordinator = coordinator.clone();
        let handle = tokio::spawn(async move { run_loop(&entry, &loop_coordinator).await });

        wait_for(|| runner.runs_started.load(Ordering::SeqCst) == 1).await;
        coordinator.set_terminate();
        let dequeues_at_hangup = queue.dequeues.load(Ordering::SeqCst);

        handle.await.unwrap().expect("loop exits cleanly");

        // the in-flight run finished normally, the second item stayed put
        assert_eq!(queue.statuses(), vec![(42, true)]);
        assert_eq!(queue.dequeues.load(Ordering::SeqCst), dequeues_at_hangup);
        assert_eq!(queue.items.lock().unwrap().len(), 1);
        assert_eq!(coordinator.active_runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_runner_is_never_asked_for_work() {
        let queue = MockQueue::with_items(vec![queue_item(42, 0)]);
        let runner = TestRunner::new(RunScript::Sleep(Duration::from_millis(10), true));
        runner.ready.store(false, Ordering::SeqCst);
        let coordinator = ShutdownCoordinator::new();

        let entry = entry(runner.clone(), queue.clone());
        let loop_coordinator = coordinator.clone();
        let handle = tokio::spawn(async move { run_loop(&entry, &loop_coordinator).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(queue.dequeues.load(Ordering::SeqCst), 0);

        runner.ready.store(true, Ordering::SeqCst);
        wait_for(|| !queue.statuses().is_empty()).await;
        coordinator.set_terminate();
        handle.await.unwrap().expect("loop exits cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_dequeue_sets_terminate() {
        let queue = MockQueue::with_items(Vec::new());
        queue.cancelled_dequeue.store(true, Ordering::SeqCst);
        let runner = TestRunner::new(RunScript::Sleep(Duration::from_millis(10), true));
        let coordinator = ShutdownCoordinator::new();

        let entry = entry(runner, queue.clone());
        let loop_coordinator = coordinator.clone();
        let handle = tokio::spawn(async move { run_loop(&entry, &loop_coordinator).await });

        handle.await.unwrap().expect("loop exits after terminate");
        assert!(coordinator.is_terminate());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_run_error_exits_the_loop() {
        let queue = MockQueue::with_items(vec![queue_item(42, 0)]);
        let runner = TestRunner::new(RunScript::Fatal("exploded"));
        let coordinator = ShutdownCoordinator::new();

        let entry = entry(runner, queue.clone());
        let loop_coordinator = coordinator.clone();
        let handle = tokio::spawn(async move { run_loop(&entry, &loop_coordinator).await });

        let err = handle.await.unwrap().expect_err("fatal error surfaces");
        assert!(matches!(err, FrameworkError::Fatal(_)));
        assert!(queue.statuses().is_empty());
        assert_eq!(coordinator.active_runs(), 0);
    }
}
