//! Test doubles for the repository host and the model.
//!
//! [`FakeHost`] is an in-memory repository host with per-operation call
//! counters and failure injection. [`ScriptedModel`] replays queued replies and
//! records every history it was asked to complete.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;

use crate::core::types::{Message, RepoId, ToolCall};
use crate::io::host::{
    Branch, ContentEntry, FileMutation, PullRequest, PullRequestDraft, RemoteFile, RepoHost,
};
use crate::io::model::{ModelClient, ModelError, ToolSpec};

/// Host operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    DefaultBranch,
    GetBranch,
    CreateBranch,
    ListDir,
    GetFile,
    PutFile,
    CreatePullRequest,
}

#[derive(Debug, Clone)]
struct FakeFile {
    content: Vec<u8>,
    sha: String,
}

#[derive(Debug)]
struct FakeState {
    default_branch: String,
    /// branch name -> head sha
    branches: BTreeMap<String, String>,
    /// branch name -> path -> file
    files: BTreeMap<String, BTreeMap<String, FakeFile>>,
    pulls: Vec<PullRequestDraft>,
    commits: Vec<FileMutation>,
    calls: HashMap<HostOp, usize>,
    failures: HashMap<HostOp, String>,
    delays: HashMap<HostOp, Duration>,
    next_id: u64,
}

impl FakeState {
    fn next_sha(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-memory repository host.
#[derive(Debug)]
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    /// Empty repository whose default branch is `default_branch`.
    pub fn new(default_branch: &str) -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(default_branch.to_string(), "commit-0".to_string());
        let mut files = BTreeMap::new();
        files.insert(default_branch.to_string(), BTreeMap::new());
        Self {
            state: Mutex::new(FakeState {
                default_branch: default_branch.to_string(),
                branches,
                files,
                pulls: Vec::new(),
                commits: Vec::new(),
                calls: HashMap::new(),
                failures: HashMap::new(),
                delays: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Seed a file on the default branch.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        {
            let mut state = self.lock();
            let sha = state.next_sha("blob");
            let default = state.default_branch.clone();
            state.files.entry(default).or_default().insert(
                path.to_string(),
                FakeFile {
                    content: content.as_bytes().to_vec(),
                    sha,
                },
            );
        }
        self
    }

    /// Seed raw bytes on the default branch.
    pub fn with_bytes(self, path: &str, content: &[u8]) -> Self {
        {
            let mut state = self.lock();
            let sha = state.next_sha("blob");
            let default = state.default_branch.clone();
            state.files.entry(default).or_default().insert(
                path.to_string(),
                FakeFile {
                    content: content.to_vec(),
                    sha,
                },
            );
        }
        self
    }

    /// Make every subsequent call of `op` fail with `message`.
    pub fn fail_on(&self, op: HostOp, message: &str) {
        self.lock().failures.insert(op, message.to_string());
    }

    /// Make every subsequent call of `op` take at least `delay`.
    pub fn delay_on(&self, op: HostOp, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    pub fn clear_failure(&self, op: HostOp) {
        self.lock().failures.remove(&op);
    }

    pub fn calls(&self, op: HostOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn branch_sha(&self, name: &str) -> Option<String> {
        self.lock().branches.get(name).cloned()
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        self.lock()
            .files
            .get(branch)
            .and_then(|files| files.get(path))
            .map(|file| String::from_utf8_lossy(&file.content).to_string())
    }

    pub fn pulls(&self) -> Vec<PullRequestDraft> {
        self.lock().pulls.clone()
    }

    pub fn commits(&self) -> Vec<FileMutation> {
        self.lock().commits.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn enter(&self, op: HostOp) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        let delay = self.lock().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(message) = state.failures.get(&op) {
            return Err(anyhow!("{message}"));
        }
        Ok(state)
    }
}

#[async_trait]
impl RepoHost for FakeHost {
    async fn default_branch(&self, _repo: &RepoId) -> Result<String> {
        let state = self.enter(HostOp::DefaultBranch).await?;
        Ok(state.default_branch.clone())
    }

    async fn get_branch(&self, _repo: &RepoId, name: &str) -> Result<Option<Branch>> {
        let state = self.enter(HostOp::GetBranch).await?;
        Ok(state.branches.get(name).map(|sha| Branch {
            name: name.to_string(),
            head_sha: sha.clone(),
        }))
    }

    async fn create_branch(&self, _repo: &RepoId, name: &str, sha: &str) -> Result<()> {
        let mut state = self.enter(HostOp::CreateBranch).await?;
        if state.branches.contains_key(name) {
            bail!("422 Reference already exists");
        }
        let source = state
            .branches
            .iter()
            .find(|(_, head)| head.as_str() == sha)
            .map(|(branch, _)| branch.clone())
            .ok_or_else(|| anyhow!("422 Object does not exist"))?;
        let files = state.files.get(&source).cloned().unwrap_or_default();
        state.branches.insert(name.to_string(), sha.to_string());
        state.files.insert(name.to_string(), files);
        Ok(())
    }

    async fn list_dir(&self, _repo: &RepoId, path: &str) -> Result<Vec<ContentEntry>> {
        let state = self.enter(HostOp::ListDir).await?;
        let files = state
            .files
            .get(&state.default_branch)
            .cloned()
            .unwrap_or_default();
        let path = path.trim_matches('/');
        if files.contains_key(path) {
            return Ok(vec![ContentEntry::file(path)]);
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for file in files.keys() {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(format!("{prefix}{dir}"));
                }
                None => entries.push(ContentEntry::file(file.clone())),
            }
        }
        if dirs.is_empty() && entries.is_empty() && !path.is_empty() {
            bail!("404 Not Found: {path}");
        }
        let mut listing: Vec<ContentEntry> = dirs.into_iter().map(ContentEntry::dir).collect();
        listing.extend(entries);
        listing.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listing)
    }

    async fn get_file(
        &self,
        _repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Option<RemoteFile>> {
        let state = self.enter(HostOp::GetFile).await?;
        let branch = git_ref.unwrap_or(&state.default_branch);
        let Some(files) = state.files.get(branch) else {
            return Ok(None);
        };
        if let Some(file) = files.get(path) {
            return Ok(Some(RemoteFile {
                path: path.to_string(),
                sha: file.sha.clone(),
                content: file.content.clone(),
            }));
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        if files.keys().any(|file| file.starts_with(&prefix)) {
            bail!("'{path}' is a directory");
        }
        Ok(None)
    }

    async fn put_file(
        &self,
        _repo: &RepoId,
        mutation: &FileMutation,
        sha: Option<&str>,
    ) -> Result<()> {
        let mut state = self.enter(HostOp::PutFile).await?;
        if !state.branches.contains_key(&mutation.branch) {
            bail!("404 Branch {} not found", mutation.branch);
        }
        let current = state
            .files
            .get(&mutation.branch)
            .and_then(|files| files.get(&mutation.path))
            .map(|file| file.sha.clone());
        match (current.as_deref(), sha) {
            (Some(current), Some(sha)) if current != sha => {
                bail!("409 {} does not match {sha}", mutation.path)
            }
            (Some(_), None) => bail!("422 \"sha\" wasn't supplied"),
            (None, Some(_)) => bail!("404 {} not found", mutation.path),
            _ => {}
        }
        let blob = state.next_sha("blob");
        let commit = state.next_sha("commit");
        state.files.entry(mutation.branch.clone()).or_default().insert(
            mutation.path.clone(),
            FakeFile {
                content: mutation.new_content.as_bytes().to_vec(),
                sha: blob,
            },
        );
        state.branches.insert(mutation.branch.clone(), commit);
        state.commits.push(mutation.clone());
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &RepoId,
        draft: &PullRequestDraft,
    ) -> Result<PullRequest> {
        let mut state = self.enter(HostOp::CreatePullRequest).await?;
        if !state.branches.contains_key(&draft.head) {
            bail!("422 Validation Failed: head {} does not exist", draft.head);
        }
        if state.pulls.iter().any(|pr| pr.head == draft.head) {
            bail!(
                "422 Validation Failed: A pull request already exists for {}:{}.",
                repo.owner(),
                draft.head
            );
        }
        state.pulls.push(draft.clone());
        let number = state.pulls.len() as u64;
        Ok(PullRequest {
            number,
            url: format!("https://github.com/{repo}/pull/{number}"),
        })
    }
}

/// Canned model reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Message(Message),
    Error(String),
    /// Never answers within `Duration`.
    Stall(Duration),
}

/// Model that replays queued replies in order.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Histories received, one per call.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        let remaining = self
            .replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len();
        if remaining > 0 {
            bail!("scripted model has {remaining} unused replies");
        }
        Ok(())
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<Message, ModelError> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(messages.to_vec());
        let next = self
            .replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        match next {
            Some(ScriptedReply::Message(message)) => Ok(message),
            Some(ScriptedReply::Error(message)) => Err(ModelError::Request(message)),
            Some(ScriptedReply::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Err(ModelError::Request("stalled reply finished".to_string()))
            }
            None => Err(ModelError::Request("scripted model exhausted".to_string())),
        }
    }
}

/// Build a tool call.
pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Assistant reply requesting `calls`.
pub fn calls_reply(calls: Vec<ToolCall>) -> ScriptedReply {
    ScriptedReply::Message(Message::assistant("", calls))
}

/// Assistant reply without tool calls.
pub fn text_reply(text: &str) -> ScriptedReply {
    ScriptedReply::Message(Message::assistant(text, Vec::new()))
}

pub fn repo(slug: &str) -> RepoId {
    RepoId::parse(slug).expect("valid test repo id")
}
