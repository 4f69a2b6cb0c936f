//! Tool surface exposed to the model.
//!
//! Every tool returns a plain string. Host failures become `Error ...` strings
//! that the model reads as the tool result; nothing here fails the run.

use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::branch::ensure_branch;
use crate::core::types::{RepoId, ToolCall};
use crate::io::host::{EntryKind, FileMutation, RepoHost};
use crate::io::model::ToolSpec;

/// Maximum number of paths returned by `list_files`.
pub const LIST_FILES_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ListFiles,
    ReadFile,
    UpsertFile,
}

const TOOLS: [(&str, Tool); 3] = [
    ("list_files", Tool::ListFiles),
    ("read_file", Tool::ReadFile),
    ("upsert_file", Tool::UpsertFile),
];

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::ListFiles => "list_files",
            Tool::ReadFile => "read_file",
            Tool::UpsertFile => "upsert_file",
        }
    }

    pub fn lookup(name: &str) -> Option<Tool> {
        TOOLS
            .iter()
            .find(|(tool_name, _)| *tool_name == name)
            .map(|(_, tool)| *tool)
    }

    pub fn spec(self) -> ToolSpec {
        let (description, parameters) = match self {
            Tool::ListFiles => (
                "List file paths in the repository, walking subdirectories breadth-first. \
                 Returns at most 50 paths, one per line.",
                json!({
                    "type": "object",
                    "properties": {
                        "repoId": {"type": "string", "description": "Repository as owner/name."},
                        "path": {"type": "string", "description": "Directory to start from. Empty for the root."}
                    },
                    "required": ["repoId"]
                }),
            ),
            Tool::ReadFile => (
                "Read a file from the repository's default branch as UTF-8 text.",
                json!({
                    "type": "object",
                    "properties": {
                        "repoId": {"type": "string", "description": "Repository as owner/name."},
                        "path": {"type": "string", "description": "File path relative to the repository root."}
                    },
                    "required": ["repoId", "path"]
                }),
            ),
            Tool::UpsertFile => (
                "Create or replace a file on the working branch with a single commit. \
                 The branch is created from the default branch if needed.",
                json!({
                    "type": "object",
                    "properties": {
                        "repoId": {"type": "string", "description": "Repository as owner/name."},
                        "path": {"type": "string", "description": "File path relative to the repository root."},
                        "new_content": {"type": "string", "description": "Complete new file content."},
                        "commit_message": {"type": "string"},
                        "branch": {"type": "string", "description": "Working branch to commit to."}
                    },
                    "required": ["repoId", "path", "new_content", "commit_message", "branch"]
                }),
            ),
        };
        ToolSpec {
            name: self.name().to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Specs for every tool, in a stable order.
pub fn catalog() -> Vec<ToolSpec> {
    TOOLS.iter().map(|(_, tool)| tool.spec()).collect()
}

#[derive(Debug, Deserialize)]
struct ListFilesArgs {
    #[serde(rename = "repoId", alias = "repo_id", alias = "repo_full_name")]
    repo_id: String,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    #[serde(rename = "repoId", alias = "repo_id", alias = "repo_full_name")]
    repo_id: String,
    #[serde(alias = "file_path")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct UpsertFileArgs {
    #[serde(rename = "repoId", alias = "repo_id", alias = "repo_full_name")]
    repo_id: String,
    #[serde(alias = "file_path")]
    path: String,
    new_content: String,
    commit_message: String,
    branch: String,
}

trait RepoScoped {
    fn repo_id(&self) -> &str;
}

impl RepoScoped for ListFilesArgs {
    fn repo_id(&self) -> &str {
        &self.repo_id
    }
}

impl RepoScoped for ReadFileArgs {
    fn repo_id(&self) -> &str {
        &self.repo_id
    }
}

impl RepoScoped for UpsertFileArgs {
    fn repo_id(&self) -> &str {
        &self.repo_id
    }
}

/// Execute one tool call against `repo`, the repository the run is bound to.
#[instrument(skip(host, call), fields(tool = %call.name, call_id = %call.id))]
pub async fn invoke<H>(host: &H, repo: &RepoId, call: &ToolCall) -> String
where
    H: RepoHost + ?Sized,
{
    let Some(tool) = Tool::lookup(&call.name) else {
        warn!("model requested an unknown tool");
        return format!("Error: unknown tool '{}'", call.name);
    };

    let output = match tool {
        Tool::ListFiles => match parse_args::<ListFilesArgs>(&call.arguments, repo) {
            Ok(args) => list_files(host, repo, &args.path).await,
            Err(err) => invocation_error(tool, &err),
        },
        Tool::ReadFile => match parse_args::<ReadFileArgs>(&call.arguments, repo) {
            Ok(args) => read_file(host, repo, &args.path).await,
            Err(err) => invocation_error(tool, &err),
        },
        Tool::UpsertFile => {
            match parse_args::<UpsertFileArgs>(&call.arguments, repo) {
                Ok(args) => {
                    let mutation = FileMutation {
                        path: args.path,
                        new_content: args.new_content,
                        commit_message: args.commit_message,
                        branch: args.branch,
                    };
                    upsert_file(host, repo, &mutation).await
                }
                Err(err) => invocation_error(tool, &err),
            }
        }
    };
    debug!(bytes = output.len(), "tool finished");
    output
}

fn invocation_error(tool: Tool, err: &anyhow::Error) -> String {
    warn!(error = %err, "rejected tool arguments");
    format!("Error invoking {}: {err}", tool.name())
}

/// Decode arguments and confine the call to the run's repository.
fn parse_args<T>(arguments: &Value, run_repo: &RepoId) -> Result<T>
where
    T: DeserializeOwned + RepoScoped,
{
    let args: T = serde_json::from_value(arguments.clone())
        .map_err(|e| anyhow!("invalid arguments: {e}"))?;
    let requested = RepoId::parse(args.repo_id())?;
    if &requested != run_repo {
        return Err(anyhow!(
            "repository '{requested}' is outside this run (expected '{run_repo}')"
        ));
    }
    Ok(args)
}

/// Breadth-first listing of file paths under `path` on the default branch,
/// stopping once [`LIST_FILES_LIMIT`] paths are collected.
pub async fn list_files<H>(host: &H, repo: &RepoId, path: &str) -> String
where
    H: RepoHost + ?Sized,
{
    match collect_files(host, repo, path).await {
        Ok(files) => files.join("\n"),
        Err(err) => format!("Error listing files: {err:#}"),
    }
}

async fn collect_files<H>(host: &H, repo: &RepoId, path: &str) -> Result<Vec<String>>
where
    H: RepoHost + ?Sized,
{
    let mut queue: VecDeque<_> = host.list_dir(repo, path).await?.into();
    let mut files = Vec::new();
    while let Some(entry) = queue.pop_front() {
        if files.len() >= LIST_FILES_LIMIT {
            break;
        }
        match entry.kind {
            EntryKind::Dir => queue.extend(host.list_dir(repo, &entry.path).await?),
            EntryKind::File | EntryKind::Other => files.push(entry.path),
        }
    }
    Ok(files)
}

/// Full UTF-8 content of `path` on the default branch.
pub async fn read_file<H>(host: &H, repo: &RepoId, path: &str) -> String
where
    H: RepoHost + ?Sized,
{
    match host.get_file(repo, path, None).await {
        Ok(Some(file)) => match String::from_utf8(file.content) {
            Ok(text) => text,
            Err(_) => format!("Error reading file: '{path}' is not valid UTF-8"),
        },
        Ok(None) => format!("Error reading file: '{path}' not found"),
        Err(err) => format!("Error reading file: {err:#}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpsertKind {
    Created,
    Updated,
}

/// Create or replace a file on `mutation.branch`, creating the branch first
/// if it does not exist.
pub async fn upsert_file<H>(host: &H, repo: &RepoId, mutation: &FileMutation) -> String
where
    H: RepoHost + ?Sized,
{
    match try_upsert(host, repo, mutation).await {
        Ok(UpsertKind::Updated) => format!("Updated {} on {}", mutation.path, mutation.branch),
        Ok(UpsertKind::Created) => format!("Created {} on {}", mutation.path, mutation.branch),
        Err(err) => format!("Error committing to file: {err:#}"),
    }
}

async fn try_upsert<H>(host: &H, repo: &RepoId, mutation: &FileMutation) -> Result<UpsertKind>
where
    H: RepoHost + ?Sized,
{
    ensure_branch(host, repo, &mutation.branch).await?;
    match host
        .get_file(repo, &mutation.path, Some(&mutation.branch))
        .await?
    {
        Some(existing) => {
            host.put_file(repo, mutation, Some(&existing.sha)).await?;
            Ok(UpsertKind::Updated)
        }
        None => {
            host.put_file(repo, mutation, None).await?;
            Ok(UpsertKind::Created)
        }
    }
}
