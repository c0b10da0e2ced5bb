//! The null runner: accepts every run and reports a coin flip.
//!
//! Useful for exercising a queue deployment end to end without
//! touching docker, git, or a cluster.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use tci_core::{Config, FrameworkError, Run, RunContext, Runner};

/// Always-ready runner whose runs succeed or fail at random.
pub struct NullRunner {
    config: Config,
    next_state: Arc<AtomicBool>,
}

impl NullRunner {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            next_state: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl Runner for NullRunner {
    fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    fn hostname(&self) -> &str {
        &self.config.hostname
    }

    fn ready(&self) -> bool {
        true
    }

    async fn make_run(
        &self,
        name: &str,
        _ctx: Arc<RunContext>,
    ) -> Result<Box<dyn Run>, FrameworkError> {
        Ok(Box::new(NullRun {
            name: name.to_string(),
            next_state: self.next_state.clone(),
        }))
    }

    async fn after_run(&self, _name: &str, _ctx: &RunContext) {}
}

struct NullRun {
    name: String,
    next_state: Arc<AtomicBool>,
}

#[async_trait]
impl Run for NullRun {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_run(&mut self) -> Result<(), FrameworkError> {
        let state = rand::random();
        self.next_state.store(state, Ordering::SeqCst);
        info!(state, "run commencing: rolling the dice");
        Ok(())
    }

    async fn run(&mut self) -> Result<bool, FrameworkError> {
        Ok(self.next_state.load(Ordering::SeqCst))
    }

    async fn after_run(&mut self) -> Result<(), FrameworkError> {
        Ok(())
    }
}
