//! Working-branch resolution.

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::RepoId;
use crate::io::host::RepoHost;

/// How [`ensure_branch`] satisfied the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchResolution {
    Existing,
    Created { from: String, sha: String },
}

/// Make sure `name` exists on `repo`, branching from the default branch head
/// when it does not.
///
/// An existing branch costs one lookup and nothing else. If creation races
/// with another writer, the branch is re-checked and treated as existing.
#[instrument(skip(host), fields(repo = %repo))]
pub async fn ensure_branch<H>(host: &H, repo: &RepoId, name: &str) -> Result<BranchResolution>
where
    H: RepoHost + ?Sized,
{
    if host
        .get_branch(repo, name)
        .await
        .with_context(|| format!("look up branch '{name}'"))?
        .is_some()
    {
        debug!("branch already exists");
        return Ok(BranchResolution::Existing);
    }

    let base = host
        .default_branch(repo)
        .await
        .context("resolve default branch")?;
    let source = host
        .get_branch(repo, &base)
        .await
        .with_context(|| format!("look up default branch '{base}'"))?
        .ok_or_else(|| anyhow!("default branch '{base}' not found"))?;

    if let Err(err) = host.create_branch(repo, name, &source.head_sha).await {
        if host.get_branch(repo, name).await.ok().flatten().is_some() {
            warn!(error = %err, "branch appeared concurrently");
            return Ok(BranchResolution::Existing);
        }
        return Err(err.context(format!("create branch '{name}' from '{base}'")));
    }

    info!(from = %base, sha = %source.head_sha, "created working branch");
    Ok(BranchResolution::Created {
        from: base,
        sha: source.head_sha,
    })
}
