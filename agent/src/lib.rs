//! Autonomous repository agent.
//!
//! Given a repository and an issue, the agent runs a bounded, tool-using
//! conversation with a language model, commits the model's edits to a working
//! branch and opens a pull request. The crate is split the same way as most of
//! its callers think about it:
//!
//! - **[`core`]**: Pure logic (identifiers, conversation state machine, branch
//!   naming, time budgets). No I/O.
//! - **[`io`]**: Side-effecting adapters (configuration, GitHub, the model
//!   provider, prompt rendering, run checkpoints). Hidden behind traits so
//!   tests can substitute in-memory doubles.
//!
//! Orchestration modules ([`tools`], [`branch`], [`finalize`],
//! [`orchestrator`]) combine the two into a single run.

pub mod branch;
pub mod core;
pub mod exit_codes;
pub mod finalize;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
