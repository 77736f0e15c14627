//! System prompt and transcript assembly.

use switchyard_config::GenerationConfig;
use switchyard_core::agent::{AgentProfile, ConversationContext};
use switchyard_core::message::{Message, Role};

pub const FALLBACK_MODEL: &str = "google/gemini-2.0-flash-001";
pub const FALLBACK_TEMPERATURE: f32 = 0.7;
pub const FALLBACK_MAX_TOKENS: u32 = 2000;
pub const FALLBACK_TOP_P: f32 = 1.0;

/// The seven agent attributes, one line each, in a fixed order.
pub fn system_prompt(profile: &AgentProfile) -> String {
    format!(
        "You are: {}.\nGoal: {}.\nPolicies: {}.\nTask: {}.\nExplicit objective: {}.\nAudience: {}.\nConstraints: {}.",
        profile.role,
        profile.goal,
        profile.policies,
        profile.task,
        profile.objective,
        profile.audience,
        profile.constraints,
    )
}

/// System prompt, the last `history_window` prior turns, then the current
/// turn with its image (if any) as a second content part.
pub fn build_messages(profile: &AgentProfile, context: &ConversationContext, history_window: usize) -> Vec<Message> {
    let history = context.recent_history(history_window);
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt(profile)));
    for turn in history {
        match turn.role {
            Role::User => messages.push(Message::user(turn.content.as_str())),
            Role::Assistant => messages.push(Message::assistant(turn.content.as_str())),
            // Stored history only carries the visible exchange
            Role::System | Role::Tool => {}
        }
    }
    messages.push(Message::user_with_image(context.message.as_str(), context.image.clone()));
    messages
}

/// Generation parameters for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl GenerationParams {
    /// Agent override, then global default, then the hardcoded fallback.
    /// A value that does not parse counts as absent.
    pub fn resolve(profile: &AgentProfile, global: &GenerationConfig) -> Self {
        let model = [profile.model.as_deref(), Some(global.model.as_str())]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|m| !m.is_empty())
            .unwrap_or(FALLBACK_MODEL)
            .to_string();

        Self {
            model,
            temperature: pick(profile.temperature.as_deref(), &global.temperature, FALLBACK_TEMPERATURE),
            max_tokens: pick(profile.max_tokens.as_deref(), &global.max_tokens, FALLBACK_MAX_TOKENS),
            top_p: pick(profile.top_p.as_deref(), &global.top_p, FALLBACK_TOP_P),
        }
    }
}

fn pick<T: std::str::FromStr>(agent: Option<&str>, global: &str, fallback: T) -> T {
    agent
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| global.trim().parse().ok())
        .unwrap_or(fallback)
}
