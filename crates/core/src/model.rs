//! LanguageModel trait — the abstraction over LLM backends.
//!
//! The engine hands the backend a system prompt, the trimmed history window,
//! and the serialized tool subset; the backend answers with either final text
//! or one fully assembled tool call. Streaming backends assemble internally —
//! the engine only consumes complete replies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::history::HistoryEntry;
use crate::tool::{ToolCall, ToolSchema};

/// Everything a backend needs for one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g. "gpt-4o", "anthropic/claude-sonnet-4")
    pub model: String,

    /// The assembled system prompt
    pub system_prompt: String,

    /// The trimmed history window, oldest first
    pub history: Vec<HistoryEntry>,

    /// Tools the model may call on this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
}

/// A completed model reply: exactly one of plain text or a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelReply {
    /// The model answered with text; the turn is done.
    Text(String),

    /// The model wants a tool executed before answering.
    ToolCall(ToolCall),
}

/// The model backend trait.
///
/// Implementations live with the host (OpenAI, Anthropic, local inference).
/// The engine calls `generate` without knowing which backend is behind it.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Send a request and get a fully assembled reply.
    async fn generate(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<ModelReply, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_is_text_or_call_never_both() {
        let text = ModelReply::Text("hello".into());
        let call = ModelReply::ToolCall(ToolCall {
            id: "call_1".into(),
            name: "weather".into(),
            arguments: "{}".into(),
        });
        assert!(matches!(text, ModelReply::Text(_)));
        assert!(matches!(call, ModelReply::ToolCall(_)));
    }

    #[test]
    fn request_serialization_skips_empty_tools() {
        let req = ModelRequest {
            model: "gpt-4o".into(),
            system_prompt: "You are helpful.".into(),
            history: vec![],
            tools: vec![],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"tools\""));
    }
}
