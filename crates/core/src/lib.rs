//! # Switchyard Core
//!
//! Domain types, traits, and error definitions for the Switchyard
//! tool-orchestration engine. Every other crate depends inward on this one.
//!
//! ## Design Philosophy
//!
//! Collaborators the engine talks to but does not implement (LLM backends,
//! the messaging transport, knowledge-base search) are traits here.
//! Implementations and test doubles live in the crates that need them.

pub mod error;
pub mod message;
pub mod provider;
pub mod delivery;
pub mod tool;
pub mod retrieval;
pub mod agent;
pub mod trace;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{DeliveryError, Error, ErrorClass, ProtocolError, ProviderError, Result, ToolError};
pub use message::{ImageAttachment, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use delivery::{Messenger, OutboundPayload};
pub use tool::{
    DeliveryChannel, NativeTool, OutputPolicy, ParamSpec, Routing, ToolCall, ToolDescriptor, ToolKind,
    ToolOutcome, ToolRegistry, ToolScope, ToolVariable,
};
pub use retrieval::{RetrievedChunk, Retriever};
pub use agent::{AgentProfile, ConversationContext, ConversationTurn};
pub use trace::{ExecutionTrace, RetrievalStats, RunFailure, RunReport, ToolCallRecord};
pub use event::{DomainEvent, EventBus};
