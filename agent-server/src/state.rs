//! Shared application state for the webhook server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use agent::core::branch::working_branch_name;
use agent::core::types::RepoId;
use agent::io::config::AgentConfig;
use agent::io::host::RepoHost;
use agent::io::model::ModelClient;
use agent::io::run_store::RunStore;
use agent::orchestrator::{RunOutcome, RunRequest, run_agent};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Per-key async locks. Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
pub struct RunLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RunLocks {
    fn acquire(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn release(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    /// Keys currently held or awaited.
    pub fn active(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub model: Arc<dyn ModelClient>,
    pub host: Arc<dyn RepoHost>,
    pub store: Arc<dyn RunStore>,
    /// Verification is skipped when unset.
    pub webhook_secret: Option<Arc<str>>,
    pub locks: Arc<RunLocks>,
}

impl AppState {
    pub fn new(
        config: AgentConfig,
        model: Arc<dyn ModelClient>,
        host: Arc<dyn RepoHost>,
        store: Arc<dyn RunStore>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            model,
            host,
            store,
            webhook_secret: webhook_secret.map(Arc::from),
            locks: Arc::new(RunLocks::default()),
        }
    }

    /// Whether runs may target `repo`. An empty allow-list admits any repository.
    pub fn allows(&self, repo: &RepoId) -> bool {
        let allowed = &self.config.server.repositories;
        allowed.is_empty()
            || allowed
                .iter()
                .any(|slug| slug.eq_ignore_ascii_case(&repo.to_string()))
    }

    pub fn working_branch(&self, request: &RunRequest) -> String {
        working_branch_name(
            &self.config.branch_prefix,
            &request.issue_title,
            self.config.branch_slug_max_chars,
        )
    }

    pub fn spawn_run(&self, request: RunRequest) -> JoinHandle<Option<RunOutcome>> {
        let state = self.clone();
        tokio::spawn(async move { state.run(request).await })
    }

    /// Run one issue, serialized with other runs on the same repository and
    /// working branch. Failures are logged, not returned.
    pub async fn run(&self, request: RunRequest) -> Option<RunOutcome> {
        let key = format!("{}#{}", request.repo, self.working_branch(&request));
        let lock = self.locks.acquire(&key);
        let outcome = {
            let _guard = lock.lock().await;
            run_agent(
                self.model.as_ref(),
                self.host.as_ref(),
                self.store.as_ref(),
                &self.config,
                request,
            )
            .await
        };
        drop(lock);
        self.locks.release(&key);
        debug!(active = self.locks.active(), "released run lock");

        match outcome {
            Ok(outcome) => {
                info!(
                    run_id = %outcome.run_id,
                    branch = %outcome.working_branch,
                    result = %outcome.result,
                    "webhook run finished"
                );
                Some(outcome)
            }
            Err(err) => {
                error!(key = %key, error = %format!("{err:#}"), "webhook run failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use agent::io::run_store::InMemoryRunStore;
    use agent::test_support::{FakeHost, ScriptedModel, ScriptedReply, repo, text_reply};

    use super::*;

    fn state_with(model: ScriptedModel, host: Arc<FakeHost>, secret: Option<&str>) -> AppState {
        AppState::new(
            AgentConfig::default(),
            Arc::new(model),
            host,
            Arc::new(InMemoryRunStore::new()),
            secret.map(str::to_string),
        )
    }

    fn request(title: &str) -> RunRequest {
        RunRequest {
            repo: repo("acme/widgets"),
            issue_title: title.to_string(),
            issue_description: String::new(),
        }
    }

    #[test]
    fn allow_list_is_case_insensitive_and_empty_means_any() {
        let mut state = state_with(ScriptedModel::default(), Arc::new(FakeHost::new("main")), None);
        assert!(state.allows(&repo("anyone/anything")));

        let mut config = AgentConfig::default();
        config.server.repositories = vec!["Acme/Widgets".to_string()];
        state.config = Arc::new(config);
        assert!(state.allows(&repo("acme/widgets")));
        assert!(!state.allows(&repo("acme/gadgets")));
    }

    #[tokio::test]
    async fn same_key_shares_one_lock_until_released() {
        let locks = RunLocks::default();
        let first = locks.acquire("acme/widgets#agent/fix-x");
        let held = first.lock().await;

        let same = locks.acquire("acme/widgets#agent/fix-x");
        assert!(same.try_lock().is_err());
        let other = locks.acquire("acme/widgets#agent/fix-y");
        assert!(other.try_lock().is_ok());
        assert_eq!(locks.active(), 2);

        drop(held);
        drop((first, same, other));
        locks.release("acme/widgets#agent/fix-x");
        locks.release("acme/widgets#agent/fix-y");
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn completed_run_returns_outcome() {
        let state = state_with(
            ScriptedModel::new(vec![text_reply("done")]),
            Arc::new(FakeHost::new("main")),
            None,
        );

        let outcome = state
            .spawn_run(request("Fix bug"))
            .await
            .expect("join")
            .expect("outcome");

        assert_eq!(outcome.working_branch, "agent/fix-fix-bug");
        assert!(outcome.result.starts_with("PR Failed: "));
        assert_eq!(state.locks.active(), 0);
    }

    #[tokio::test]
    async fn failed_run_is_logged_not_propagated() {
        let state = state_with(
            ScriptedModel::new(vec![ScriptedReply::Error("boom".to_string())]),
            Arc::new(FakeHost::new("main")),
            None,
        );

        assert!(state.run(request("Fix bug")).await.is_none());
        assert_eq!(state.locks.active(), 0);
    }
}
