//! History entry domain types.
//!
//! A conversation is an ordered log of entries: what the user said, what the
//! assistant answered, which tool calls were issued and what they returned.
//! The engine's history store owns the log; these are the value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of an entry in the conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant (plain text or a tool call request)
    Assistant,
    /// A tool execution result
    Tool,
}

/// A single entry in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique entry ID
    pub id: String,

    /// Who produced this entry
    pub role: Role,

    /// The text content
    pub content: String,

    /// If the assistant requested a tool call, its call ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// The tool this entry refers to (call request or result)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Set when the content carries a binary attachment (e.g. an image).
    /// Trimming replaces such content with a placeholder instead of
    /// truncating it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_attachment: bool,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Create a new user entry.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            has_attachment: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a user entry carrying an attachment (image, etc.).
    pub fn user_with_attachment(content: impl Into<String>) -> Self {
        Self {
            has_attachment: true,
            ..Self::user(content)
        }
    }

    /// Create a new assistant text entry.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            has_attachment: false,
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant entry recording an issued tool call.
    pub fn tool_call(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: arguments.into(),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            has_attachment: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a tool result entry answering a previous call.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            has_attachment: false,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_entry() {
        let entry = HistoryEntry::user("Hello, assistant!");
        assert_eq!(entry.role, Role::User);
        assert_eq!(entry.content, "Hello, assistant!");
        assert!(entry.tool_call_id.is_none());
        assert!(!entry.has_attachment);
    }

    #[test]
    fn tool_result_links_to_call() {
        let entry = HistoryEntry::tool_result("call_1", "weather", "sunny, 22C");
        assert_eq!(entry.role, Role::Tool);
        assert_eq!(entry.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(entry.tool_name.as_deref(), Some("weather"));
    }

    #[test]
    fn entry_serialization_roundtrip() {
        let entry = HistoryEntry::assistant("Certainly.");
        let json = serde_json::to_string(&entry).unwrap();
        let back: HistoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "Certainly.");
        assert_eq!(back.role, Role::Assistant);
    }

    #[test]
    fn attachment_flag_is_skipped_when_false() {
        let entry = HistoryEntry::user("plain");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("has_attachment"));

        let entry = HistoryEntry::user_with_attachment("see image");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("has_attachment"));
    }
}
