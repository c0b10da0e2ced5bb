//! Git cache management for tinyCI runners.
//!
//! Each parent repository gets one long-lived clone under the
//! configured base path; forks are remotes inside that clone, never
//! clones of their own. This keeps the filesystem footprint simple and
//! gives every fork a reliable cache.
//!
//! Clones go over HTTPS with a throwaway `GIT_ASKPASS` script that
//! echoes the token handed to us by the queue service. The script
//! exists on disk only while a git subprocess is live.
mod config;
mod error;
mod manager;
mod script;

pub use config::GitConfig;
pub use error::GitError;
pub use manager::{ensure_identity, RepoManager};
