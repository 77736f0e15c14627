//! Agent profile and per-run conversation inputs.

use serde::{Deserialize, Serialize};
use crate::message::{ImageAttachment, Role};

/// Stored configuration of one agent.
///
/// The seven prompt attributes are concatenated into the system prompt in
/// declaration order. Generation overrides are kept as strings, exactly as
/// the admin store holds them, and parsed per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentProfile {
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub policies: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub constraints: String,

    /// Per-agent model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<String>,

    /// Knowledge base searched by the retrieval tool, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<String>,
}

/// One prior exchange in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Immutable inputs to one orchestrator run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    /// The message being answered
    pub message: String,

    /// Optional image sent with the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,

    /// Prior turns, oldest first, excluding the current one
    #[serde(default)]
    pub history: Vec<ConversationTurn>,

    /// Chat target for user-routed tool output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_target: Option<String>,
}

impl ConversationContext {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_reply_target(mut self, target: impl Into<String>) -> Self {
        self.reply_target = Some(target.into());
        self
    }

    /// The last `window` prior turns, oldest first.
    pub fn recent_history(&self, window: usize) -> &[ConversationTurn] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }
}
