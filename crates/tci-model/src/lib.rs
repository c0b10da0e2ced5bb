//! Data model for items coming off the tinyCI queue service.
//!
//! Everything in here is read-only to the runner framework: the queue
//! service owns the shape of a run and the runner merely interprets it.
mod error;
mod queue;
mod repo;
mod resources;

pub use error::{ModelError, ModelResult};
pub use queue::{
    MergeOptions, Owner, QueueItem, RefSpec, Repository, Run, RunSettings, Submission, Task,
    TaskConfig, TaskSettings,
};
pub use repo::{default_branch, OAuthToken, RepoName};
pub use resources::Resources;
