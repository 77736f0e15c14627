//! Message domain types.
//!
//! These are the value objects that make up a run's transcript:
//! system prompt → history → current turn → assistant replies ↔ tool results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (agent attributes)
    System,
    /// Tool execution result
    Tool,
}

/// An inline image sent alongside a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/png`
    pub mime_type: String,

    /// Base64-encoded bytes (no data-URL prefix)
    pub data_base64: String,
}

impl ImageAttachment {
    pub fn new(mime_type: impl Into<String>, data_base64: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data_base64: data_base64.into(),
        }
    }

    /// Render as a `data:` URL suitable for multi-part chat content.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data_base64)
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Images merged into this message as extra content parts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a user message carrying an optional image as a second part.
    pub fn user_with_image(content: impl Into<String>, image: Option<ImageAttachment>) -> Self {
        let mut msg = Self::user(content);
        msg.images.extend(image);
        msg
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Whether this message must be sent as multi-part content.
    pub fn is_multipart(&self) -> bool {
        !self.images.is_empty()
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

impl MessageToolCall {
    /// Parse the argument string. Empty or malformed input yields `{}`.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        if self.arguments.trim().is_empty() {
            return serde_json::Value::Object(Default::default());
        }
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
        assert!(!msg.is_multipart());
    }

    #[test]
    fn user_message_with_image_is_multipart() {
        let msg = Message::user_with_image("what is this?", Some(ImageAttachment::new("image/png", "AAAA")));
        assert!(msg.is_multipart());
        assert_eq!(msg.images[0].data_url(), "data:image/png;base64,AAAA");

        let plain = Message::user_with_image("hi", None);
        assert!(!plain.is_multipart());
    }

    #[test]
    fn tool_result_links_call_id() {
        let msg = Message::tool_result("call_9", "{\"ok\":true}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
    }

    #[test]
    fn malformed_tool_arguments_become_empty_object() {
        let call = MessageToolCall {
            id: "c1".into(),
            name: "calculate".into(),
            arguments: "{not json".into(),
        };
        assert_eq!(call.parsed_arguments(), serde_json::json!({}));

        let call = MessageToolCall {
            arguments: r#"{"expression":"2+2"}"#.into(),
            ..call
        };
        assert_eq!(call.parsed_arguments()["expression"], "2+2");
    }
}
