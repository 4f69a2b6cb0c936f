//! Pull request finalization.
//!
//! Failures are reported in the outcome string; [`finalize`] never errors.

use tracing::{info, instrument, warn};

use crate::core::types::RepoId;
use crate::io::host::{PullRequest, PullRequestDraft, RepoHost};

/// Result of the finalization step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// `PR Created: <url>` or `PR Failed: <detail>`.
    pub result: String,
    pub pull_request: Option<PullRequest>,
}

impl FinalizeOutcome {
    pub fn created(pull_request: PullRequest) -> Self {
        Self {
            result: format!("PR Created: {}", pull_request.url),
            pull_request: Some(pull_request),
        }
    }

    pub fn failed(detail: impl std::fmt::Display) -> Self {
        Self {
            result: format!("PR Failed: {detail}"),
            pull_request: None,
        }
    }

    pub fn is_created(&self) -> bool {
        self.pull_request.is_some()
    }
}

pub fn pr_title(issue_title: &str) -> String {
    format!("Fix: {}", issue_title.trim())
}

/// Body linking the issue description, followed by the model's closing
/// summary and any stop note.
pub fn pr_body(issue_description: &str, summary: Option<&str>, note: Option<&str>) -> String {
    let mut body = format!("Automated PR for: {}", issue_description.trim());
    if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
        body.push_str("\n\n");
        body.push_str(summary);
    }
    if let Some(note) = note {
        body.push_str("\n\n_");
        body.push_str(note);
        body.push('_');
    }
    body
}

/// Open a pull request from `head` into the repository's default branch.
#[instrument(skip(host, title, body), fields(repo = %repo))]
pub async fn finalize<H>(host: &H, repo: &RepoId, title: &str, body: &str, head: &str) -> FinalizeOutcome
where
    H: RepoHost + ?Sized,
{
    let base = match host.default_branch(repo).await {
        Ok(base) => base,
        Err(err) => {
            warn!(error = %err, "could not resolve base branch");
            return FinalizeOutcome::failed(format!("resolve default branch: {err:#}"));
        }
    };

    let draft = PullRequestDraft {
        title: title.to_string(),
        body: body.to_string(),
        head: head.to_string(),
        base,
    };
    match host.create_pull_request(repo, &draft).await {
        Ok(pull_request) => {
            info!(number = pull_request.number, url = %pull_request.url, "pull request opened");
            FinalizeOutcome::created(pull_request)
        }
        Err(err) => {
            warn!(error = %err, "pull request creation failed");
            FinalizeOutcome::failed(format!("{err:#}"))
        }
    }
}
