use serde::{Deserialize, Serialize};

use crate::resources::Resources;

/// One unit of work handed out by the queue service.
///
/// The item wraps the [`Run`] to execute together with the name of the
/// queue it was pulled from; `{queue_name}.{run.id}` is the stable name
/// the framework uses to track the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub queue_name: String,
    pub run: Run,
}

impl QueueItem {
    /// Identifier of the run carried by this item.
    pub fn run_id(&self) -> i64 {
        self.run.id
    }
}

/// A single execution of a CI job against one head ref.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    #[serde(default)]
    pub settings: RunSettings,
    pub task: Task,
}

/// Run-level execution settings supplied by the submitter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSettings {
    /// Hard deadline for the run in milliseconds. Zero means no timeout.
    #[serde(rename = "timeout", default)]
    pub timeout_ms: u64,
    /// Container image reference, possibly a short ref like `alpine`.
    #[serde(default)]
    pub image: String,
    /// Command executed inside the container.
    #[serde(default)]
    pub command: Vec<String>,
    /// Run-level environment, `KEY=value` entries appended after the
    /// task-level environment.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub resources: Resources,
}

/// The task a run belongs to; carries the source submission and the
/// task-level workspace settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub settings: TaskSettings,
    pub submission: Submission,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Working directory inside the container.
    #[serde(default)]
    pub workdir: String,
    /// Where the checked-out tree is bind-mounted inside the container.
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub config: TaskConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub merge_options: MergeOptions,
}

/// Controls whether the checked-out head is merged with the base
/// branch before the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeOptions {
    #[serde(default)]
    pub do_not_merge: bool,
    /// Head ref names that skip the merge even when merging is on.
    #[serde(default)]
    pub ignore_refs: Vec<String>,
}

impl MergeOptions {
    /// True when the given head ref should be merged with the base.
    pub fn should_merge(&self, head_ref_name: &str) -> bool {
        !self.do_not_merge && !self.ignore_refs.iter().any(|r| r == head_ref_name)
    }
}

/// The submission pair: the base the task targets and the head under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub base_ref: RefSpec,
    pub head_ref: RefSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefSpec {
    pub repository: Repository,
    #[serde(default)]
    pub ref_name: String,
    #[serde(default)]
    pub sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// `owner/repo` form; validated by [`crate::RepoName::parse`]
    /// before any filesystem work happens.
    pub name: String,
    #[serde(default)]
    pub owner: Option<Owner>,
}

/// Repository owner as reported by the queue service. The token is an
/// opaque JSON document round-tripped into [`crate::OAuthToken`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: serde_json::Value,
}
