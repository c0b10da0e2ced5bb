use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// A validated `owner/repo` github-style repository name.
///
/// The framework refuses to touch the filesystem for anything that does
/// not match: exactly one `/` between owner and repository, and no `..`
/// segment anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoName {
    owner: String,
    repo: String,
}

impl RepoName {
    /// Validate and split a raw repository name.
    pub fn parse(name: &str) -> ModelResult<Self> {
        let Some((owner, repo)) = name.split_once('/') else {
            return Err(ModelError::RepoNameFormat(name.to_string()));
        };

        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(ModelError::RepoNameFormat(name.to_string()));
        }

        if name.contains("..") {
            return Err(ModelError::RepoNamePath(name.to_string()));
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// The owner (organization or user) part.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The bare repository part.
    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Github access token round-tripped out of the queue item's owner
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub token: String,
    #[serde(default)]
    pub username: String,
}

impl OAuthToken {
    /// Decode the opaque token document carried on the queue item.
    pub fn from_value(value: &serde_json::Value) -> ModelResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| ModelError::Token(e.to_string()))
    }
}

/// Derive the branch name to track from a base ref name by stripping
/// the `heads/` or `tags/` prefix.
pub fn default_branch(ref_name: &str) -> &str {
    ref_name
        .strip_prefix("heads/")
        .or_else(|| ref_name.strip_prefix("tags/"))
        .unwrap_or(ref_name)
}
