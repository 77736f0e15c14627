//! The conversation orchestrator: the root of a Switchyard run.
//!
//! A run follows an **Assemble → Call → Dispatch** cycle:
//!
//! 1. **Assemble** the system prompt from the agent profile, the history
//!    window and the current turn
//! 2. **Compose** the tool catalog from local descriptors, the agent's
//!    external sessions and the retrieval tool
//! 3. **Call** the model through the gateway
//! 4. **If tool calls**: dispatch them, append one result per call, loop
//! 5. **If text**: that is the final answer
//!
//! The loop is capped by an iteration ceiling and can be cancelled.

pub mod catalog;
pub mod intent;
pub mod orchestrator;
pub mod prompt;

pub use catalog::ToolCatalog;
pub use intent::IntentClassifier;
pub use orchestrator::ConversationOrchestrator;
pub use prompt::{GenerationParams, build_messages, system_prompt};
