//! Shared fixtures for framework tests: a scriptable queue client and
//! a configurable runner.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tci_client::{ClientError, ClientResult, QueueClient};
use tci_model::QueueItem;

use crate::context::RunContext;
use crate::error::FrameworkError;
use crate::runner::{Run, Runner};

/// Build a queue item fixture for run `run_id` with the given timeout.
pub(crate) fn queue_item(run_id: i64, timeout_ms: u64) -> QueueItem {
    let json = serde_json::json!({
        "id": 1,
        "queue_name": "default",
        "run": {
            "id": run_id,
            "settings": {"timeout": timeout_ms, "image": "alpine", "command": ["true"]},
            "task": {
                "id": 9,
                "settings": {"workdir": "/build", "mountpoint": "/build"},
                "submission": {
                    "base_ref": {"repository": {"name": "erikh/foo"}, "ref_name": "heads/main"},
                    "head_ref": {"repository": {"name": "other/foo"}, "ref_name": "heads/fix", "sha": "abc"}
                }
            }
        }
    });
    serde_json::from_value(json).expect("fixture queue item")
}

/// In-memory queue service. Items are handed out in order; cancel and
/// status calls are recorded for assertions.
#[derive(Default)]
pub(crate) struct MockQueue {
    pub items: Mutex<VecDeque<QueueItem>>,
    pub cancel_state: Mutex<HashMap<i64, bool>>,
    pub set_cancels: Mutex<Vec<i64>>,
    pub statuses: Mutex<Vec<(i64, bool)>>,
    pub dequeues: AtomicUsize,
    /// Number of leading `set_status` calls to fail with a transport
    /// error before accepting one.
    pub status_failures: AtomicUsize,
    /// When set, the next dequeue reports client-side cancellation.
    pub cancelled_dequeue: AtomicBool,
}

impl MockQueue {
    pub fn with_items(items: Vec<QueueItem>) -> Arc<Self> {
        let queue = Self::default();
        *queue.items.lock().unwrap() = items.into();
        Arc::new(queue)
    }

    pub fn mark_cancelled(&self, run_id: i64) {
        self.cancel_state.lock().unwrap().insert(run_id, true);
    }

    pub fn statuses(&self) -> Vec<(i64, bool)> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn set_cancels(&self) -> Vec<i64> {
        self.set_cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueClient for MockQueue {
    async fn next_queue_item(&self, _queue: &str, _hostname: &str) -> ClientResult<QueueItem> {
        if self.cancelled_dequeue.swap(false, Ordering::SeqCst) {
            return Err(ClientError::Cancelled);
        }

        self.dequeues.fetch_add(1, Ordering::SeqCst);
        self.items
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ClientError::NotFound)
    }

    async fn get_cancel(&self, run_id: i64) -> ClientResult<bool> {
        Ok(*self
            .cancel_state
            .lock()
            .unwrap()
            .get(&run_id)
            .unwrap_or(&false))
    }

    async fn set_cancel(&self, run_id: i64) -> ClientResult<()> {
        self.cancel_state.lock().unwrap().insert(run_id, true);
        self.set_cancels.lock().unwrap().push(run_id);
        Ok(())
    }

    async fn set_status(&self, run_id: i64, status: bool) -> ClientResult<()> {
        let failures = self.status_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.status_failures.store(failures - 1, Ordering::SeqCst);
            return Err(ClientError::Transport("queue flaked".to_string()));
        }

        self.statuses.lock().unwrap().push((run_id, status));
        Ok(())
    }
}

/// What a [`TestRunner`]'s runs should do.
#[derive(Debug, Clone)]
pub(crate) enum RunScript {
    /// Sleep for the duration (respecting cancellation), then report
    /// the given status. Cancellation reports `false`.
    Sleep(Duration, bool),
    /// Fail the run fatally.
    Fatal(&'static str),
}

/// One-run-at-a-time runner, the same readiness shape as the docker
/// executor.
pub(crate) struct TestRunner {
    script: RunScript,
    pub ready: AtomicBool,
    pub busy: AtomicBool,
    pub runs_started: AtomicUsize,
}

impl TestRunner {
    pub fn new(script: RunScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            ready: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            runs_started: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Runner for TestRunner {
    fn queue_name(&self) -> &str {
        "default"
    }

    fn hostname(&self) -> &str {
        "testhost"
    }

    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.busy.load(Ordering::SeqCst)
    }

    async fn make_run(
        &self,
        name: &str,
        ctx: Arc<RunContext>,
    ) -> Result<Box<dyn Run>, FrameworkError> {
        self.busy.store(true, Ordering::SeqCst);
        self.runs_started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestRun {
            name: name.to_string(),
            ctx,
            script: self.script.clone(),
        }))
    }

    async fn after_run(&self, _name: &str, _ctx: &RunContext) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct TestRun {
    name: String,
    ctx: Arc<RunContext>,
    script: RunScript,
}

#[async_trait]
impl Run for TestRun {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_run(&mut self) -> Result<(), FrameworkError> {
        Ok(())
    }

    async fn run(&mut self) -> Result<bool, FrameworkError> {
        match &self.script {
            RunScript::Sleep(duration, status) => {
                let token = self.ctx.cancel_token();
                tokio::select! {
                    _ = tokio::time::sleep(*duration) => Ok(*status),
                    _ = token.cancelled() => Ok(false),
                }
            }
            RunScript::Fatal(msg) => Err(FrameworkError::Fatal((*msg).to_string())),
        }
    }

    async fn after_run(&mut self) -> Result<(), FrameworkError> {
        Ok(())
    }
}
