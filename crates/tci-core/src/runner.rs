use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::FrameworkError;

/// The interface a runner must implement to leverage the framework.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    /// Name of the queue to pull runs off of.
    fn queue_name(&self) -> &str;

    /// Tag identifying this host to the queue service. Ornamental, not
    /// authenticated.
    fn hostname(&self) -> &str;

    /// Gate for new dequeues: the lifecycle loop only asks the queue
    /// for work while this returns true. A single-container runner
    /// reports `!busy`; a concurrent one compares its run count
    /// against its cap.
    fn ready(&self) -> bool;

    /// Build the [`Run`] for a dequeued item. `name` is the stable
    /// `{queue}.{run_id}` handle the framework tracks the run under.
    ///
    /// An error here is fatal to the runner process.
    async fn make_run(
        &self,
        name: &str,
        ctx: Arc<RunContext>,
    ) -> Result<Box<dyn Run>, FrameworkError>;

    /// Called once per run after its record is removed; the place to
    /// release capacity claimed in [`Runner::make_run`].
    async fn after_run(&self, name: &str, ctx: &RunContext);
}

/// A single run as driven by the framework.
///
/// Hooks are invoked strictly in order: `before_run`, `run`,
/// `after_run`, and then the framework reports status or cancellation
/// to the queue.
#[async_trait]
pub trait Run: Send {
    fn name(&self) -> &str;

    /// Set up the run without executing it.
    async fn before_run(&mut self) -> Result<(), FrameworkError>;

    /// Execute the job. The returned boolean is the pass/fail status;
    /// an `Err` is a non-recoverable framework error, not a job
    /// failure. Cancellation is expected to surface as `Ok(false)`
    /// with the queue's cancel state explaining the rest.
    async fn run(&mut self) -> Result<bool, FrameworkError>;

    /// Per-run cleanup, always attempted after `run`.
    async fn after_run(&mut self) -> Result<(), FrameworkError>;
}
