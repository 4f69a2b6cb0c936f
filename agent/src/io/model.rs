//! Inference provider abstraction.
//!
//! The orchestrator only needs one capability from a model: given the message
//! history and the tool catalog, produce the next assistant message. Whether
//! that message carries tool calls is what drives the run forward.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::types::Message;

/// Function-style tool descriptor advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// Model invocation failure. Always fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
}

/// Core trait for inference providers.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn model_id(&self) -> &str;

    /// Return the next assistant message (role `Assistant`).
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec])
    -> Result<Message, ModelError>;
}
