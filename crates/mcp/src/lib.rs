//! External tool-server sessions for Switchyard.
//!
//! Agents can use tools hosted by third-party servers speaking JSON-RPC
//! over a subprocess pipe, a legacy SSE stream, or streamable HTTP. Each
//! server gets a long-lived session owned by its own actor task; the
//! [`SessionManager`] keeps the id → actor map, exposes the discovered
//! tools to the model as `mcp_{session}_{tool}`, and routes calls back.

pub mod import;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sse;
pub mod store;
pub mod transport;

pub use import::{ImportOptions, Preset, PresetInput, apply_preset, import_one_click, preset, presets};
pub use manager::{SessionManager, TOOL_PREFIX, qualified_name};
pub use server::{ServerSpec, SessionState, SessionStatus, TransportKind};
pub use session::{SessionHandle, SessionSettings};
pub use store::{ExternalTool, ExternalToolStore, InMemoryToolStore, SyncReport};
pub use transport::{DefaultTransportFactory, McpTransport, TransportFactory};
