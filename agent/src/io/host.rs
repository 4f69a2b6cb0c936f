//! Repository host abstraction.
//!
//! The [`RepoHost`] trait decouples the tool surface and the finalizer from the
//! concrete host API (currently GitHub, see [`crate::io::github`]). Tests use
//! an in-memory host that records calls without touching the network.
//!
//! Lookups that can legitimately find nothing (`get_branch`, `get_file`) return
//! `Ok(None)` rather than an error, so callers can tell "absent" apart from
//! "the host failed".

use anyhow::Result;
use async_trait::async_trait;

use crate::core::types::RepoId;

/// Kind of a directory listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks and submodules; listed but never traversed.
    Other,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub path: String,
    pub kind: EntryKind,
}

impl ContentEntry {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Dir,
        }
    }
}

/// File content at a given ref, with the blob sha used for optimistic updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub sha: String,
    pub content: Vec<u8>,
}

/// Branch reference (owned by the host).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub head_sha: String,
}

/// Create-or-update request for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMutation {
    pub path: String,
    pub new_content: String,
    pub commit_message: String,
    pub branch: String,
}

/// Pull request to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// Opened pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

/// Read/write primitives of the repository host.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Name of the repository's default branch.
    async fn default_branch(&self, repo: &RepoId) -> Result<String>;

    /// Look up a branch; `Ok(None)` when it does not exist.
    async fn get_branch(&self, repo: &RepoId, name: &str) -> Result<Option<Branch>>;

    /// Create `refs/heads/<name>` pointing at `sha`.
    async fn create_branch(&self, repo: &RepoId, name: &str, sha: &str) -> Result<()>;

    /// List a directory (root when `path` is empty) on the default branch.
    ///
    /// A file path yields a single file entry.
    async fn list_dir(&self, repo: &RepoId, path: &str) -> Result<Vec<ContentEntry>>;

    /// Read a file at `git_ref` (default branch when `None`); `Ok(None)` when absent.
    async fn get_file(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Option<RemoteFile>>;

    /// Commit `mutation`. `sha` must be the current blob sha when updating and
    /// `None` when creating.
    async fn put_file(&self, repo: &RepoId, mutation: &FileMutation, sha: Option<&str>)
    -> Result<()>;

    async fn create_pull_request(
        &self,
        repo: &RepoId,
        draft: &PullRequestDraft,
    ) -> Result<PullRequest>;
}
