use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use bytes::Bytes;
use nix::pty::openpty;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tci_core::LogSink;
use tci_model::{default_branch, OAuthToken, QueueItem, RepoName};

use crate::config::GitConfig;
use crate::error::GitError;
use crate::script::LoginScript;

const DEFAULT_REMOTE_BASE: &str = "https://github.com";
const DEFAULT_GIT_USER_NAME: &str = "tinyci runner";
const DEFAULT_GIT_EMAIL: &str = "no-reply@example.org";

/// Manages the cached clone for one parent repository and its fork.
///
/// All operations block until the underlying git subprocess finishes;
/// their combined console output lands in the provided log sink.
pub struct RepoManager {
    config: GitConfig,
    sink: LogSink,
    access_token: String,
    env: Vec<(String, String)>,
    remote_base: String,

    repo_name: RepoName,
    fork_repo_name: RepoName,
    fork_remote: String,
    repo_path: PathBuf,
}

impl RepoManager {
    /// Validate names, compute paths, derive the fork remote. Must
    /// succeed before any other operation makes sense.
    pub fn new(
        mut config: GitConfig,
        sink: LogSink,
        parent: &str,
        fork: &str,
        access_token: &str,
    ) -> Result<Self, GitError> {
        config.validate()?;

        let repo_name = RepoName::parse(parent)?;
        let fork_repo_name = RepoName::parse(fork)?;
        let fork_remote = fork_repo_name.owner().to_string();
        let repo_path = config.base_repo_path.join(repo_name.to_string());

        Ok(Self {
            config,
            sink,
            access_token: access_token.to_string(),
            env: Vec::new(),
            remote_base: DEFAULT_REMOTE_BASE.to_string(),
            repo_name,
            fork_repo_name,
            fork_remote,
            repo_path,
        })
    }

    /// Extra environment appended to every git call.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Override the HTTPS base the clone URLs are built from. Tests
    /// point this at `file://` fixtures.
    pub fn with_remote_base(mut self, base: &str) -> Self {
        self.remote_base = base.trim_end_matches('/').to_string();
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn fork_remote(&self) -> &str {
        &self.fork_remote
    }

    fn remote_url(&self, name: &RepoName) -> String {
        format!("{}/{name}", self.remote_base)
    }

    /// Either clone a new repository, or bring the existing clone back
    /// to a pristine `default_branch` tracking origin.
    pub async fn clone_or_fetch(
        &self,
        cancel: &CancellationToken,
        default_branch: &str,
    ) -> Result<(), GitError> {
        let meta = tokio::fs::metadata(&self.repo_path).await;

        match meta {
            Err(_) => {
                info!(repo = %self.repo_name, "new repository; cloning fresh");
                self.clone_repo(cancel).await
            }
            Ok(m) if !m.is_dir() => {
                warn!(repo = %self.repo_name, "repository path is a file; removing and re-cloning");
                tokio::fs::remove_file(&self.repo_path).await?;
                self.clone_repo(cancel).await
            }
            Ok(_) => {
                self.run_git(cancel, &["clean", "-fdx"]).await?;
                self.run_git(cancel, &["reset", "--hard", "HEAD"]).await?;
                self.checkout(cancel, default_branch).await?;
                self.run_git(cancel, &["fetch", "origin"]).await?;
                self.rebase(cancel, &format!("origin/{default_branch}"))
                    .await
            }
        }
    }

    async fn clone_repo(&self, cancel: &CancellationToken) -> Result<(), GitError> {
        tokio::fs::create_dir_all(&self.repo_path).await?;
        self.run_git(cancel, &["clone", &self.remote_url(&self.repo_name), "."])
            .await
    }

    /// Make sure the fork is a remote of the parent clone, then fetch
    /// its contents.
    pub async fn add_or_fetch_fork(&self, cancel: &CancellationToken) -> Result<(), GitError> {
        // plain capture, we need the output rather than the log
        let out = Command::new("git")
            .args(["remote", "show"])
            .current_dir(&self.repo_path)
            .output()
            .await?;
        if !out.status.success() {
            return Err(GitError::CommandFailed {
                command: "git remote show".to_string(),
                code: out.status.code(),
            });
        }

        let present = String::from_utf8_lossy(&out.stdout)
            .lines()
            .any(|line| line.trim() == self.fork_remote);

        if !present {
            let url = self.remote_url(&self.fork_repo_name);
            self.run_git(cancel, &["remote", "add", &self.fork_remote, &url])
                .await?;
        }

        self.run_git(cancel, &["fetch", &self.fork_remote]).await
    }

    /// Set the working copy to the ref provided, submodules included.
    pub async fn checkout(&self, cancel: &CancellationToken, refspec: &str) -> Result<(), GitError> {
        self.run_git(cancel, &["checkout", refspec]).await?;
        self.run_git(cancel, &["submodule", "update", "--init", "--recursive"])
            .await
    }

    /// Merge `refspec` into the currently checked out ref; rolls the
    /// merge back on failure and surfaces the original error.
    pub async fn merge(&self, cancel: &CancellationToken, refspec: &str) -> Result<(), GitError> {
        let res = self
            .run_git(cancel, &["merge", "--no-ff", "-m", "CI merge", refspec])
            .await;

        if res.is_err() {
            self.sink.write_str("merge error; trying to roll back\n").await;
            if let Err(abort) = self.run_git(cancel, &["merge", "--abort"]).await {
                self.sink
                    .write_str(&format!("while attempting to roll back: {abort}\n"))
                    .await;
            }
        }

        res
    }

    /// Rebase onto `refspec` with the same rollback shape as
    /// [`RepoManager::merge`].
    pub async fn rebase(&self, cancel: &CancellationToken, refspec: &str) -> Result<(), GitError> {
        let res = self.run_git(cancel, &["rebase", refspec]).await;

        if res.is_err() {
            self.sink.write_str("rebase error; trying to roll back\n").await;
            if let Err(abort) = self.run_git(cancel, &["rebase", "--abort"]).await {
                self.sink
                    .write_str(&format!("while attempting to roll back: {abort}\n"))
                    .await;
            }
        }

        res
    }

    /// Run one git command attached to a pseudo-terminal, with the
    /// login script bracketing the subprocess and both output streams
    /// copied into the log sink as a single stream.
    async fn run_git(&self, cancel: &CancellationToken, args: &[&str]) -> Result<(), GitError> {
        debug!(repo = %self.repo_name, command = ?args, "running git");

        let _script = LoginScript::create(&self.config.login_script_path, &self.access_token)?;

        let pty = openpty(None, None)?;
        let stdin = Stdio::from(pty.slave.try_clone()?);
        let stdout = Stdio::from(pty.slave.try_clone()?);
        let stderr = Stdio::from(pty.slave);

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.repo_path)
            .env("GIT_ASKPASS", &self.config.login_script_path)
            .env("EDITOR", "/bin/true")
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        let sink = self.sink.clone();
        let pump = tokio::task::spawn_blocking(move || {
            let mut master = std::fs::File::from(pty.master);
            let mut buf = [0u8; 4096];
            loop {
                match master.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if !sink.blocking_write(Bytes::copy_from_slice(&buf[..n])) {
                            break;
                        }
                    }
                    // EIO once the child side is fully closed
                    Err(_) => break,
                }
            }
        });

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let Some(status) = waited else {
            let _ = child.kill().await;
            let _ = pump.await;
            return Err(GitError::Cancelled);
        };
        let status = status?;

        let _ = pump.await;

        if !status.success() {
            return Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                code: status.code(),
            });
        }

        Ok(())
    }
}

/// Populate a global git identity when the host has none, so merge
/// commits can be created.
pub async fn ensure_identity() -> Result<(), GitError> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| GitError::Config("could not determine home directory".to_string()))?;

    if tokio::fs::metadata(Path::new(&home).join(".gitconfig"))
        .await
        .is_ok()
    {
        return Ok(());
    }

    info!("gitconfig not populated with merge information: populating it now");

    for (key, value) in [
        ("user.name", DEFAULT_GIT_USER_NAME),
        ("user.email", DEFAULT_GIT_EMAIL),
    ] {
        let status = Command::new("git")
            .args(["config", "--global", "--add", key, value])
            .status()
            .await;
        if !matches!(status, Ok(s) if s.success()) {
            warn!(key, "while updating git configuration");
        }
    }

    Ok(())
}

impl RepoManager {
    /// Build the manager for a queue item's submission: parent from the
    /// base ref, fork from the head ref, access token parsed (JSON
    /// round-trip) out of the base repository's owner.
    pub fn for_item(config: GitConfig, sink: LogSink, item: &QueueItem) -> Result<Self, GitError> {
        let sub = &item.run.task.submission;

        let owner = sub
            .base_ref
            .repository
            .owner
            .as_ref()
            .ok_or(GitError::MissingToken)?;
        let token = OAuthToken::from_value(&owner.token)?;

        Self::new(
            config,
            sink,
            &sub.base_ref.repository.name,
            &sub.head_ref.repository.name,
            &token.token,
        )
    }

    /// Composite pull used by the container executors: materialize the
    /// submission's head in the cache, merged with the base branch
    /// unless the task opts out or lists the head ref as ignored.
    pub async fn pull(
        &self,
        cancel: &CancellationToken,
        item: &QueueItem,
    ) -> Result<(), GitError> {
        ensure_identity().await?;

        let sub = &item.run.task.submission;
        let branch = default_branch(&sub.base_ref.ref_name);

        self.clone_or_fetch(cancel, branch).await?;
        self.add_or_fetch_fork(cancel).await?;
        self.checkout(cancel, &sub.head_ref.sha).await?;

        let merge_options = &item.run.task.settings.config.merge_options;
        if merge_options.should_merge(&sub.head_ref.ref_name) {
            self.merge(cancel, &format!("origin/{branch}")).await?;
        }

        Ok(())
    }
}
