//! Conversation state machine.
//!
//! A run alternates between asking the model for its next turn and dispatching
//! the tool calls that turn requested. [`decide`] is the only transition rule:
//! the presence of tool calls on the assistant message, never its text.
//!
//! [`Conversation`] owns the append-only message history and rejects appends
//! that would break its invariants:
//!
//! - the first message is the single system message;
//! - tool results answer the pending calls of the latest assistant message,
//!   one each, in call order;
//! - a new user or assistant message cannot be appended while calls are pending.

use serde::{Deserialize, Serialize};

use crate::core::types::{Message, Role, ToolCall};

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    AwaitingModel,
    DispatchingTools,
    Finalizing,
    Terminated,
}

/// Transition taken after the model produced `message`.
pub fn decide(message: &Message) -> RunPhase {
    if message.has_tool_calls() {
        RunPhase::DispatchingTools
    } else {
        RunPhase::Finalizing
    }
}

/// Rejected append.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("system message may only appear first")]
    SystemMessage,
    #[error("expected an assistant message, got {0:?}")]
    NotAssistant(Role),
    #[error("{pending} tool call(s) still awaiting results")]
    PendingToolCalls { pending: usize },
    #[error("tool result for '{got}' does not answer the next pending call {expected:?}")]
    UnexpectedToolResult {
        got: String,
        expected: Option<String>,
    },
}

/// Append-only message history for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Seed the history with the system prompt and the opening user message.
    pub fn new(system_prompt: impl Into<String>, kickoff: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(kickoff)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> Result<(), ConversationError> {
        self.ensure_no_pending()?;
        self.messages.push(Message::user(content));
        Ok(())
    }

    /// Append a model turn. Returns the phase [`decide`] picks for it.
    pub fn push_assistant(&mut self, message: Message) -> Result<RunPhase, ConversationError> {
        match message.role {
            Role::Assistant => {}
            Role::System => return Err(ConversationError::SystemMessage),
            other => return Err(ConversationError::NotAssistant(other)),
        }
        self.ensure_no_pending()?;
        let phase = decide(&message);
        self.messages.push(message);
        Ok(phase)
    }

    /// Answer the next pending tool call.
    pub fn push_tool_result(
        &mut self,
        tool_call_id: &str,
        content: impl Into<String>,
    ) -> Result<(), ConversationError> {
        let expected = self.pending_tool_calls().first().map(|call| call.id.clone());
        if expected.as_deref() != Some(tool_call_id) {
            return Err(ConversationError::UnexpectedToolResult {
                got: tool_call_id.to_string(),
                expected,
            });
        }
        self.messages
            .push(Message::tool_result(tool_call_id, content));
        Ok(())
    }

    /// Calls of the latest assistant message that have no result yet.
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        let Some(idx) = self
            .messages
            .iter()
            .rposition(|msg| msg.role == Role::Assistant)
        else {
            return &[];
        };
        let answered = self.messages.len() - idx - 1;
        let calls = &self.messages[idx].tool_calls;
        &calls[answered.min(calls.len())..]
    }

    /// Text of the latest assistant message when it ended the tool loop.
    pub fn final_answer(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|msg| msg.role == Role::Assistant && !msg.has_tool_calls())
            .map(|msg| msg.content.trim())
            .filter(|text| !text.is_empty())
    }

    /// Number of assistant turns recorded so far.
    pub fn model_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|msg| msg.role == Role::Assistant)
            .count()
    }

    fn ensure_no_pending(&self) -> Result<(), ConversationError> {
        let pending = self.pending_tool_calls().len();
        if pending > 0 {
            return Err(ConversationError::PendingToolCalls { pending });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "read_file".to_string(),
            arguments: json!({"path": "README.md"}),
        }
    }

    fn assert_single_system_first(conv: &Conversation) {
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(
            conv.messages()
                .iter()
                .filter(|msg| msg.role == Role::System)
                .count(),
            1
        );
    }

    #[test]
    fn decide_is_structural() {
        let with_calls = Message::assistant("READY_FOR_PR", vec![call("a")]);
        assert_eq!(decide(&with_calls), RunPhase::DispatchingTools);
        let without = Message::assistant("still thinking", Vec::new());
        assert_eq!(decide(&without), RunPhase::Finalizing);
    }

    #[test]
    fn new_conversation_is_seeded() {
        let conv = Conversation::new("sys", "go");
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages()[1].role, Role::User);
        assert_single_system_first(&conv);
    }

    #[test]
    fn rejects_second_system_message() {
        let mut conv = Conversation::new("sys", "go");
        let err = conv
            .push_assistant(Message::system("again"))
            .expect_err("system rejected");
        assert_eq!(err, ConversationError::SystemMessage);
        assert_single_system_first(&conv);
    }

    #[test]
    fn tool_results_must_follow_call_order() {
        let mut conv = Conversation::new("sys", "go");
        let phase = conv
            .push_assistant(Message::assistant("", vec![call("a"), call("b")]))
            .expect("assistant");
        assert_eq!(phase, RunPhase::DispatchingTools);

        let err = conv.push_tool_result("b", "out of order").unwrap_err();
        assert!(matches!(err, ConversationError::UnexpectedToolResult { .. }));

        conv.push_tool_result("a", "first").expect("a");
        assert_eq!(conv.pending_tool_calls().len(), 1);
        conv.push_tool_result("b", "second").expect("b");
        assert!(conv.pending_tool_calls().is_empty());

        let err = conv.push_tool_result("c", "extra").unwrap_err();
        assert_eq!(
            err,
            ConversationError::UnexpectedToolResult {
                got: "c".to_string(),
                expected: None
            }
        );
        assert_single_system_first(&conv);
    }

    #[test]
    fn blocks_new_turns_while_calls_are_pending() {
        let mut conv = Conversation::new("sys", "go");
        conv.push_assistant(Message::assistant("", vec![call("a")]))
            .expect("assistant");
        let err = conv
            .push_assistant(Message::assistant("done", Vec::new()))
            .unwrap_err();
        assert_eq!(err, ConversationError::PendingToolCalls { pending: 1 });
        assert!(conv.push_user("hello").is_err());
    }

    #[test]
    fn final_answer_only_without_tool_calls() {
        let mut conv = Conversation::new("sys", "go");
        assert_eq!(conv.final_answer(), None);
        conv.push_assistant(Message::assistant("", vec![call("a")]))
            .expect("assistant");
        conv.push_tool_result("a", "ok").expect("result");
        conv.push_assistant(Message::assistant("  Patched the parser.  ", Vec::new()))
            .expect("assistant");
        assert_eq!(conv.final_answer(), Some("Patched the parser."));
        assert_eq!(conv.model_turns(), 2);
    }
}
