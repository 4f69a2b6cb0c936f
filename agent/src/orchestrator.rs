//! Agent run loop.
//!
//! A run alternates between asking the model for the next turn and
//! dispatching the tool calls it requested, until the model answers without
//! tool calls or the turn limit is reached. The working branch is then
//! finalized into a pull request.
//!
//! Tool and pull request failures are data: they surface as strings in the
//! conversation or in [`RunOutcome::result`]. Only model failures, the run
//! deadline and broken invariants end a run with an error.

use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::branch::working_branch_name;
use crate::core::budget::{RunDeadlineExceeded, call_timeout, remaining_budget};
use crate::core::conversation::{Conversation, RunPhase};
use crate::core::types::{Message, RepoId};
use crate::finalize::{FinalizeOutcome, finalize, pr_body, pr_title};
use crate::io::config::AgentConfig;
use crate::io::host::{PullRequest, RepoHost};
use crate::io::model::{ModelClient, ModelError, ToolSpec};
use crate::io::prompt::{KICKOFF_MESSAGE, PromptEngine, PromptInputs};
use crate::io::run_store::{Checkpoint, RunStore};
use crate::tools;

/// Issue to work on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub repo: RepoId,
    pub issue_title: String,
    pub issue_description: String,
}

/// Reason the tool loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// The model answered without requesting tools.
    Completed,
    /// The model used every allowed turn.
    TurnLimit { max_turns: u32 },
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: String,
    pub working_branch: String,
    pub turns: u32,
    pub stop: RunStop,
    /// `PR Created: <url>` or `PR Failed: <detail>`.
    pub result: String,
    pub pull_request: Option<PullRequest>,
}

/// Mutable state of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub request: RunRequest,
    pub working_branch: String,
    pub conversation: Conversation,
    pub phase: RunPhase,
    pub turns: u32,
}

impl RunContext {
    pub fn new(request: RunRequest, config: &AgentConfig, prompts: &PromptEngine) -> Result<Self> {
        let working_branch = working_branch_name(
            &config.branch_prefix,
            &request.issue_title,
            config.branch_slug_max_chars,
        );
        let repo = request.repo.to_string();
        let system_prompt = prompts
            .render_system(&PromptInputs {
                repo: &repo,
                title: &request.issue_title,
                description: &request.issue_description,
                branch: &working_branch,
            })
            .context("render system prompt")?;
        Ok(Self {
            run_id: format!("run-{}", Uuid::new_v4().simple()),
            request,
            working_branch,
            conversation: Conversation::new(system_prompt, KICKOFF_MESSAGE),
            phase: RunPhase::AwaitingModel,
            turns: 0,
        })
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            run_id: self.run_id.clone(),
            repo: self.request.repo.to_string(),
            working_branch: self.working_branch.clone(),
            phase: self.phase,
            turns: self.turns,
            conversation: self.conversation.clone(),
        }
    }
}

/// Run the agent on one issue until a pull request is attempted.
///
/// The checkpoint in `store` is updated after every step and discarded when
/// the run ends, successfully or not.
#[instrument(skip_all, fields(repo = %request.repo, model = model.model_id()))]
pub async fn run_agent<M, H>(
    model: &M,
    host: &H,
    store: &dyn RunStore,
    config: &AgentConfig,
    request: RunRequest,
) -> Result<RunOutcome>
where
    M: ModelClient + ?Sized,
    H: RepoHost + ?Sized,
{
    config.validate()?;
    let deadline = Instant::now() + config.run_timeout();
    let mut ctx = RunContext::new(request, config, &PromptEngine::new())?;
    info!(
        run_id = %ctx.run_id,
        branch = %ctx.working_branch,
        max_turns = config.max_turns,
        "agent run started"
    );

    let result = drive(model, host, store, config, &mut ctx, deadline).await;
    store.discard(&ctx.run_id);
    match &result {
        Ok(outcome) => info!(
            run_id = %outcome.run_id,
            turns = outcome.turns,
            stop = ?outcome.stop,
            result = %outcome.result,
            "agent run finished"
        ),
        Err(err) => warn!(run_id = %ctx.run_id, turns = ctx.turns, error = %format!("{err:#}"), "agent run failed"),
    }
    result
}

async fn drive<M, H>(
    model: &M,
    host: &H,
    store: &dyn RunStore,
    config: &AgentConfig,
    ctx: &mut RunContext,
    deadline: Instant,
) -> Result<RunOutcome>
where
    M: ModelClient + ?Sized,
    H: RepoHost + ?Sized,
{
    let catalog = tools::catalog();
    let mut stop = RunStop::Completed;
    loop {
        store.save(&ctx.checkpoint());
        match ctx.phase {
            RunPhase::AwaitingModel => {
                let reply = model_turn(model, config, &catalog, ctx.conversation.messages(), deadline)
                    .await
                    .with_context(|| format!("model turn {}", ctx.turns + 1))?;
                ctx.turns += 1;
                info!(
                    turn = ctx.turns,
                    tool_calls = reply.tool_calls.len(),
                    "model turn complete"
                );
                ctx.phase = ctx.conversation.push_assistant(reply)?;
            }
            RunPhase::DispatchingTools => {
                dispatch_pending(host, ctx, deadline).await?;
                if ctx.turns >= config.max_turns {
                    warn!(max_turns = config.max_turns, "turn limit reached");
                    stop = RunStop::TurnLimit {
                        max_turns: config.max_turns,
                    };
                    ctx.phase = RunPhase::Finalizing;
                } else {
                    ctx.phase = RunPhase::AwaitingModel;
                }
            }
            RunPhase::Finalizing => {
                let outcome = finalize_run(host, ctx, &stop).await;
                ctx.phase = RunPhase::Terminated;
                store.save(&ctx.checkpoint());
                return Ok(RunOutcome {
                    run_id: ctx.run_id.clone(),
                    working_branch: ctx.working_branch.clone(),
                    turns: ctx.turns,
                    stop,
                    result: outcome.result,
                    pull_request: outcome.pull_request,
                });
            }
            RunPhase::Terminated => return Err(anyhow!("run {} already terminated", ctx.run_id)),
        }
    }
}

/// One model call, bounded by the per-call timeout and the run deadline.
async fn model_turn<M>(
    model: &M,
    config: &AgentConfig,
    catalog: &[ToolSpec],
    history: &[Message],
    deadline: Instant,
) -> Result<Message>
where
    M: ModelClient + ?Sized,
{
    let timeout = call_timeout(config.model_timeout(), deadline)?;
    debug!(messages = history.len(), timeout_ms = timeout.as_millis() as u64, "calling model");
    match tokio::time::timeout(timeout, model.complete(history, catalog)).await {
        Ok(reply) => Ok(reply?),
        Err(_) if timeout < config.model_timeout() => Err(RunDeadlineExceeded.into()),
        Err(_) => Err(ModelError::Timeout(timeout).into()),
    }
}

/// Execute the pending calls of the latest assistant turn, in order.
///
/// The run deadline is checked before each call; a call already in flight is
/// allowed to finish.
async fn dispatch_pending<H>(host: &H, ctx: &mut RunContext, deadline: Instant) -> Result<()>
where
    H: RepoHost + ?Sized,
{
    let calls = ctx.conversation.pending_tool_calls().to_vec();
    for call in &calls {
        remaining_budget(deadline).with_context(|| format!("before tool call {}", call.id))?;
        let output = tools::invoke(host, &ctx.request.repo, call).await;
        if output.starts_with("Error") {
            warn!(tool = %call.name, output = %output, "tool call failed");
        } else {
            debug!(tool = %call.name, "tool call succeeded");
        }
        ctx.conversation.push_tool_result(&call.id, output)?;
    }
    Ok(())
}

async fn finalize_run<H>(host: &H, ctx: &RunContext, stop: &RunStop) -> FinalizeOutcome
where
    H: RepoHost + ?Sized,
{
    let note = match stop {
        RunStop::Completed => None,
        RunStop::TurnLimit { max_turns } => Some(format!(
            "The agent stopped after reaching its limit of {max_turns} model turns."
        )),
    };
    let body = pr_body(
        &ctx.request.issue_description,
        ctx.conversation.final_answer(),
        note.as_deref(),
    );
    finalize(
        host,
        &ctx.request.repo,
        &pr_title(&ctx.request.issue_title),
        &body,
        &ctx.working_branch,
    )
    .await
}
