//! Tool execution for Switchyard.
//!
//! Stored tools come in two kinds: Web tools hold a curl-style HTTP
//! template, Code tools hold a Lua script run in a sandbox. Both go through
//! variable substitution first, may chain into a successor tool, and end in
//! output routing, which decides whether the model, the end user or both
//! see the result.
//!
//! [`ToolExecutor`] ties these together. Tools implemented natively (such as
//! knowledge-base retrieval) plug in through
//! [`NativeTool`](switchyard_core::tool::NativeTool).

pub mod builtins;
pub mod executor;
pub mod retrieval;
pub mod routing;
pub mod sandbox;
pub mod substitution;
pub mod template;
pub mod web;

pub use executor::{ToolExecutor, load_registry};
pub use retrieval::{InMemoryRetriever, SEARCH_KNOWLEDGE_BASE, SearchKnowledgeBaseTool};
pub use routing::{OutputRouter, format_text, is_error_result};
pub use sandbox::{Sandbox, SandboxHelper, SandboxPolicy};
pub use substitution::{extract_placeholders, substitute};
pub use template::{HttpTemplate, RequestBody, parse_curl, validate_curl};
pub use web::WebRunner;
