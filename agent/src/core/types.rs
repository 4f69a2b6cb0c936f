//! Shared deterministic types for the agent core.
//!
//! These types define the contracts between the conversation state machine,
//! the tool surface and the model adapter. They carry no I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error returned when a repository identifier is not `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid repository id '{0}', expected owner/name")]
pub struct RepoIdError(pub String);

/// Stable repository identifier (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId {
    owner: String,
    name: String,
}

impl RepoId {
    pub fn parse(raw: &str) -> Result<Self, RepoIdError> {
        let trimmed = raw.trim();
        let Some((owner, name)) = trimmed.split_once('/') else {
            return Err(RepoIdError(raw.to_string()));
        };
        let (owner, name) = (owner.trim(), name.trim());
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(RepoIdError(raw.to_string()));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = RepoIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RepoId {
    type Error = RepoIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepoId> for String {
    fn from(value: RepoId) -> Self {
        value.to_string()
    }
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

/// A model-requested tool invocation.
///
/// `name` is kept as the raw wire string; it is resolved against the closed
/// tool set at dispatch time so unknown names can be reported back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One entry of the run's message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by the model (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Id of the call this message answers (tool results only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::ToolResult,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_and_name() {
        let repo = RepoId::parse(" acme/widgets ").expect("parse");
        assert_eq!(repo.owner(), "acme");
        assert_eq!(repo.name(), "widgets");
        assert_eq!(repo.to_string(), "acme/widgets");
    }

    #[test]
    fn rejects_malformed_repo_ids() {
        for raw in ["", "acme", "/widgets", "acme/", "acme/widgets/extra"] {
            assert!(RepoId::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn repo_id_serializes_as_slug() {
        let repo = RepoId::parse("acme/widgets").expect("parse");
        let json = serde_json::to_string(&repo).expect("serialize");
        assert_eq!(json, "\"acme/widgets\"");
        let back: RepoId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, repo);
    }

    #[test]
    fn tool_result_omits_tool_calls_when_serialized() {
        let msg = Message::tool_result("call-1", "ok");
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["role"], "tool_result");
        assert_eq!(value["tool_call_id"], "call-1");
        assert!(value.get("tool_calls").is_none());
    }
}
