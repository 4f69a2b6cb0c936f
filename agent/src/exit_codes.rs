//! Stable exit codes for the `agent` CLI.

/// Command succeeded; for `agent run`, a pull request was opened.
pub const OK: i32 = 0;
/// Invalid config, missing credentials, model failure or other fatal error.
pub const FATAL: i32 = 1;
/// The run finished but the pull request could not be opened.
pub const PR_FAILED: i32 = 2;
