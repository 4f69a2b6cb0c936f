//! GitHub REST adapter implementing [`RepoHost`].
//!
//! Every request goes through [`GithubClient::execute`], which retries
//! transient failures per [`RetryPolicy`] and turns everything else into a
//! [`GithubError`] carrying GitHub's own error message. Writes are replayed
//! only after rate limiting or a failed connect; see [`RequestKind`].

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::types::RepoId;
use crate::io::config::GithubConfig;
use crate::io::host::{
    Branch, ContentEntry, EntryKind, FileMutation, PullRequest, PullRequestDraft, RemoteFile,
    RepoHost,
};
use crate::io::retry::{
    RequestKind, RetryPolicy, is_retryable_status, is_retryable_transport_error, parse_retry_after,
    truncate_for_error,
};

/// Header carrying the zero-based attempt number of a request.
pub const ATTEMPT_HEADER: &str = "x-agent-attempt";

/// Failed GitHub API call.
#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("github api {operation} failed with status {status}: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
    },
    #[error("github api {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
}

impl GithubError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<GithubError>()
        .is_some_and(GithubError::is_not_found)
}

/// GitHub API client shared by every run of the process.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: Url,
    retry: RetryPolicy,
}

impl GithubClient {
    pub fn new(config: &GithubConfig, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("issue-agent"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .context("invalid github authorization header")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .context("create github http client")?;
        let api_base = Url::parse(config.api_base.trim_end_matches('/'))
            .with_context(|| format!("parse github api base '{}'", config.api_base))?;
        Ok(Self {
            http,
            api_base,
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay_ms),
        })
    }

    /// Build `<api_base>/repos/<owner>/<name>/<segments...>`, percent-encoding each segment.
    fn repo_url<'a>(
        &self,
        repo: &RepoId,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("github api base cannot be a base url"))?
            .pop_if_empty()
            .extend(["repos", repo.owner(), repo.name()])
            .extend(segments.into_iter().filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    /// Send a request, retrying transient failures. Non-2xx responses become
    /// [`GithubError::Status`].
    async fn execute<F>(
        &self,
        operation: &str,
        kind: RequestKind,
        build: F,
    ) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let sent = build()
                .header(ATTEMPT_HEADER, (attempt - 1).to_string())
                .send()
                .await;
            match sent {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retryable = is_retryable_status(status, response.headers(), kind);
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if retryable && self.retry.can_retry(attempt) {
                        let delay = self.retry.delay(attempt, retry_after);
                        warn!(operation, status, attempt, delay_ms = delay.as_millis() as u64, "retrying github request");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(GithubError::Status {
                        operation: operation.to_string(),
                        status,
                        message: error_message(&body),
                    }
                    .into());
                }
                Err(source) => {
                    if is_retryable_transport_error(&source, kind) && self.retry.can_retry(attempt) {
                        let delay = self.retry.delay(attempt, None);
                        warn!(operation, attempt, err = %source, "retrying github request after transport error");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(GithubError::Transport {
                        operation: operation.to_string(),
                        source,
                    }
                    .into());
                }
            }
        }
    }

    async fn execute_json<T, F>(
        &self,
        operation: &str,
        kind: RequestKind,
        build: F,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let response = self.execute(operation, kind, build).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("decode github {operation} response"))
    }

    async fn get_contents(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Option<ContentsResponse>> {
        let mut url = self.repo_url(repo, std::iter::once("contents").chain(path.split('/')))?;
        if let Some(git_ref) = git_ref {
            url.query_pairs_mut().append_pair("ref", git_ref);
        }
        match self
            .execute_json("get contents", RequestKind::Read, || self.http.get(url.clone()))
            .await
        {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Fetch a blob by sha; used for files too large for the contents API.
    async fn get_blob(&self, repo: &RepoId, sha: &str) -> Result<Vec<u8>> {
        let url = self.repo_url(repo, ["git", "blobs", sha])?;
        let blob: BlobResponse = self
            .execute_json("get blob", RequestKind::Read, || self.http.get(url.clone()))
            .await?;
        decode_base64(&blob.content)
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

impl ContentItem {
    fn entry_kind(&self) -> EntryKind {
        match self.kind.as_str() {
            "file" => EntryKind::File,
            "dir" => EntryKind::Dir,
            _ => EntryKind::Other,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Listing(Vec<ContentItem>),
    Single(ContentItem),
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
}

/// Extract GitHub's `message` (plus validation details) from an error body.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return truncate_for_error(body, 800);
    };
    let Some(message) = value.get("message").and_then(Value::as_str) else {
        return truncate_for_error(body, 800);
    };
    let details: Vec<&str> = value
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|err| err.get("message").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if details.is_empty() {
        message.to_string()
    } else {
        format!("{message}: {}", details.join("; "))
    }
}

/// GitHub wraps base64 payloads at 60 columns.
fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .context("decode base64 file content")
}

#[async_trait]
impl RepoHost for GithubClient {
    #[instrument(skip_all, fields(repo = %repo))]
    async fn default_branch(&self, repo: &RepoId) -> Result<String> {
        let url = self.repo_url(repo, std::iter::empty())?;
        let info: RepositoryResponse = self
            .execute_json("get repository", RequestKind::Read, || self.http.get(url.clone()))
            .await?;
        debug!(default_branch = %info.default_branch, "resolved default branch");
        Ok(info.default_branch)
    }

    #[instrument(skip_all, fields(repo = %repo, branch = name))]
    async fn get_branch(&self, repo: &RepoId, name: &str) -> Result<Option<Branch>> {
        let url = self.repo_url(repo, ["git", "ref", "heads"].into_iter().chain(name.split('/')))?;
        match self
            .execute_json::<RefResponse, _>("get branch", RequestKind::Read, || {
                self.http.get(url.clone())
            })
            .await
        {
            Ok(found) => Ok(Some(Branch {
                name: name.to_string(),
                head_sha: found.object.sha,
            })),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip_all, fields(repo = %repo, branch = name))]
    async fn create_branch(&self, repo: &RepoId, name: &str, sha: &str) -> Result<()> {
        let url = self.repo_url(repo, ["git", "refs"])?;
        let payload = json!({ "ref": format!("refs/heads/{name}"), "sha": sha });
        self.execute("create branch", RequestKind::Write, || {
            self.http.post(url.clone()).json(&payload)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(repo = %repo, path = %path))]
    async fn list_dir(&self, repo: &RepoId, path: &str) -> Result<Vec<ContentEntry>> {
        let contents = self
            .get_contents(repo, path, None)
            .await?
            .ok_or_else(|| anyhow!("path '{path}' not found"))?;
        let items = match contents {
            ContentsResponse::Listing(items) => items,
            ContentsResponse::Single(item) => vec![item],
        };
        Ok(items
            .into_iter()
            .map(|item| ContentEntry {
                kind: item.entry_kind(),
                path: item.path,
            })
            .collect())
    }

    #[instrument(skip_all, fields(repo = %repo, path = %path, git_ref = ?git_ref))]
    async fn get_file(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Option<RemoteFile>> {
        let Some(contents) = self.get_contents(repo, path, git_ref).await? else {
            return Ok(None);
        };
        let item = match contents {
            ContentsResponse::Single(item) if item.entry_kind() == EntryKind::File => item,
            ContentsResponse::Single(item) => {
                return Err(anyhow!("'{}' is not a regular file ({})", item.path, item.kind));
            }
            ContentsResponse::Listing(_) => return Err(anyhow!("'{path}' is a directory")),
        };
        let content = match (item.encoding.as_deref(), item.content.as_deref()) {
            (Some("base64"), Some(encoded)) => decode_base64(encoded)?,
            _ => self.get_blob(repo, &item.sha).await?,
        };
        Ok(Some(RemoteFile {
            path: item.path,
            sha: item.sha,
            content,
        }))
    }

    #[instrument(skip_all, fields(repo = %repo, path = %mutation.path, branch = %mutation.branch, update = sha.is_some()))]
    async fn put_file(
        &self,
        repo: &RepoId,
        mutation: &FileMutation,
        sha: Option<&str>,
    ) -> Result<()> {
        let url = self.repo_url(
            repo,
            std::iter::once("contents").chain(mutation.path.split('/')),
        )?;
        let mut payload = json!({
            "message": mutation.commit_message,
            "content": STANDARD.encode(mutation.new_content.as_bytes()),
            "branch": mutation.branch,
        });
        if let Some(sha) = sha {
            payload["sha"] = Value::String(sha.to_string());
        }
        self.execute("put file", RequestKind::Write, || {
            self.http.put(url.clone()).json(&payload)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(repo = %repo, head = %draft.head, base = %draft.base))]
    async fn create_pull_request(
        &self,
        repo: &RepoId,
        draft: &PullRequestDraft,
    ) -> Result<PullRequest> {
        let url = self.repo_url(repo, ["pulls"])?;
        let payload = json!({
            "title": draft.title,
            "body": draft.body,
            "head": draft.head,
            "base": draft.base,
        });
        let created: PullResponse = self
            .execute_json("create pull request", RequestKind::Write, || {
                self.http.post(url.clone()).json(&payload)
            })
            .await?;
        Ok(PullRequest {
            number: created.number,
            url: created.html_url,
        })
    }
}
