//! Side-effecting adapters: configuration, host and model clients, prompts,
//! run checkpoints.

pub mod config;
pub mod github;
pub mod host;
pub mod model;
pub mod openai;
pub mod prompt;
pub mod retry;
pub mod run_store;
