//! SessionManager: the process-wide registry of external sessions.
//!
//! The manager maps session ids to actor handles and never touches a
//! transport itself, so calls into different sessions run independently
//! while calls into the same session queue on its actor.

use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use switchyard_config::McpConfig;
use switchyard_core::error::{Error, ProtocolError, Result, ToolError};
use switchyard_core::event::{DomainEvent, EventBus};
use switchyard_core::provider::ToolDefinition;
use switchyard_core::tool::ToolOutcome;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::server::{ServerSpec, SessionState, SessionStatus};
use crate::session::{SessionHandle, SessionSettings};
use crate::store::{ExternalTool, ExternalToolStore, InMemoryToolStore, SyncReport};
use crate::transport::{DefaultTransportFactory, TransportFactory, http_client};

/// Prefix of every model-visible external tool name.
pub const TOOL_PREFIX: &str = "mcp_";

/// Model-visible name of `tool` on session `session_id`.
pub fn qualified_name(session_id: &str, tool: &str) -> String {
    format!("{TOOL_PREFIX}{session_id}_{tool}")
}

struct Entry {
    spec: ServerSpec,
    handle: SessionHandle,
}

pub struct SessionManager {
    settings: SessionSettings,
    max_sessions_per_agent: usize,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn ExternalToolStore>,
    event_bus: Option<EventBus>,
    sessions: RwLock<BTreeMap<String, Entry>>,
}

impl SessionManager {
    /// A manager opening real transports.
    pub fn new(config: &McpConfig) -> std::result::Result<Self, ProtocolError> {
        let client = http_client(std::time::Duration::from_secs(config.connect_timeout_secs))?;
        Ok(Self::with_factory(config, Arc::new(DefaultTransportFactory::new(client))))
    }

    pub fn with_factory(config: &McpConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            settings: SessionSettings::from_config(config),
            max_sessions_per_agent: config.max_sessions_per_agent,
            factory,
            store: Arc::new(InMemoryToolStore::new()),
            event_bus: None,
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Use a different tool store. Only affects sessions registered later.
    pub fn with_store(mut self, store: Arc<dyn ExternalToolStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn store(&self) -> &Arc<dyn ExternalToolStore> {
        &self.store
    }

    /// Declare a server. Its actor starts disconnected.
    pub async fn register(&self, spec: ServerSpec) -> Result<()> {
        validate_session_id(&spec.id)?;
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&spec.id) {
            return Err(Error::validation(format!("external server '{}' is already registered", spec.id)));
        }
        let owned = sessions.values().filter(|e| e.spec.agent == spec.agent).count();
        if owned >= self.max_sessions_per_agent {
            return Err(Error::validation(format!(
                "an agent can have at most {} external servers",
                self.max_sessions_per_agent
            )));
        }

        info!(session = %spec.id, agent = %spec.agent, transport = %spec.transport, "External server registered");
        let handle = SessionHandle::spawn(
            spec.clone(),
            self.settings.clone(),
            self.factory.clone(),
            self.store.clone(),
            self.event_bus.clone(),
        );
        sessions.insert(spec.id.clone(), Entry { spec, handle });
        Ok(())
    }

    /// Disconnect a server and forget it along with its tools.
    pub async fn remove(&self, id: &str) -> bool {
        let Some(entry) = self.sessions.write().await.remove(id) else {
            return false;
        };
        if let Err(e) = entry.handle.disconnect().await {
            warn!(session = %id, error = %e, "Disconnect during removal failed");
        }
        self.store.remove_session(id);
        info!(session = %id, "External server removed");
        true
    }

    async fn handle(&self, id: &str) -> std::result::Result<SessionHandle, ProtocolError> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|e| e.handle.clone())
            .ok_or_else(|| ProtocolError::UnknownSession(id.to_string()))
    }

    pub async fn spec(&self, id: &str) -> Option<ServerSpec> {
        self.sessions.read().await.get(id).map(|e| e.spec.clone())
    }

    pub async fn connect(&self, id: &str) -> std::result::Result<SessionStatus, ProtocolError> {
        self.handle(id).await?.connect().await
    }

    /// Connect every enabled server concurrently.
    pub async fn connect_all(&self) -> Vec<(String, std::result::Result<SessionStatus, ProtocolError>)> {
        let handles: Vec<SessionHandle> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|e| e.spec.enabled)
            .map(|e| e.handle.clone())
            .collect();
        join_all(handles.into_iter().map(|handle| async move {
            let result = handle.connect().await;
            (handle.id().to_string(), result)
        }))
        .await
    }

    pub async fn sync(&self, id: &str) -> std::result::Result<SyncReport, ProtocolError> {
        self.handle(id).await?.sync().await
    }

    pub async fn disconnect(&self, id: &str) -> std::result::Result<SessionStatus, ProtocolError> {
        self.handle(id).await?.disconnect().await
    }

    pub async fn status(&self, id: &str) -> std::result::Result<SessionStatus, ProtocolError> {
        self.handle(id).await?.status().await
    }

    pub async fn statuses(&self) -> Vec<SessionStatus> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().map(|e| e.handle.clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(status) = handle.status().await {
                out.push(status);
            }
        }
        out
    }

    /// Tools last synced for a session.
    pub fn tools(&self, id: &str) -> Vec<ExternalTool> {
        self.store.tools(id)
    }

    /// Call `tool` on session `id`.
    pub async fn call(&self, id: &str, tool: &str, arguments: Value) -> std::result::Result<Value, ProtocolError> {
        self.handle(id).await?.call(tool, arguments).await
    }

    /// Model-visible definitions of every active tool on enabled, connected
    /// servers, optionally limited to one agent's servers.
    pub async fn definitions(&self, agent: Option<&str>) -> Vec<ToolDefinition> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|e| e.spec.enabled && e.handle.state() == SessionState::Connected)
            .filter(|e| agent.is_none_or(|a| e.spec.agent == a))
            .flat_map(|e| {
                self.store
                    .tools(&e.spec.id)
                    .into_iter()
                    .filter(|t| t.active)
                    .map(move |t| ToolDefinition {
                        name: qualified_name(&e.spec.id, &t.name),
                        description: format!("[MCP: {}] {}", e.spec.name, t.description),
                        parameters: t.input_schema,
                    })
            })
            .collect()
    }

    /// Map a model-visible name back to `(session id, tool name)`.
    ///
    /// Sessions that were disconnected on purpose, or never connected, own
    /// no names. A session in `Error` still does, so a call into it gets the
    /// reconnect-and-retry.
    pub async fn resolve(&self, qualified: &str) -> Option<(String, String)> {
        let rest = qualified.strip_prefix(TOOL_PREFIX)?;
        let sessions = self.sessions.read().await;
        // Longest id first so "a_b" wins over "a" for "mcp_a_b_tool"
        let mut ids: Vec<&String> = sessions
            .iter()
            .filter(|(_, e)| e.spec.enabled && e.handle.state() != SessionState::Disconnected)
            .map(|(id, _)| id)
            .collect();
        ids.sort_by_key(|id| std::cmp::Reverse(id.len()));
        ids.into_iter().find_map(|id| {
            let tool = rest.strip_prefix(id.as_str())?.strip_prefix('_')?;
            self.store
                .tools(id)
                .iter()
                .any(|t| t.name == tool)
                .then(|| (id.clone(), tool.to_string()))
        })
    }

    pub async fn owns(&self, qualified: &str) -> bool {
        self.resolve(qualified).await.is_some()
    }

    /// Run a model-requested external tool and fold the result into a
    /// [`ToolOutcome`] routed to the model. Never fails.
    pub async fn execute(&self, qualified: &str, arguments: Value) -> ToolOutcome {
        let started = Instant::now();
        let result = match self.resolve(qualified).await {
            Some((session, tool)) => self.call(&session, &tool, arguments).await,
            None => Err(ProtocolError::UnknownTool(qualified.to_string())),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(value) => {
                info!(tool = %qualified, duration_ms, "External tool call finished");
                ToolOutcome::for_model(value)
            }
            Err(e) => {
                warn!(tool = %qualified, duration_ms, error = %e, "External tool call failed");
                ToolOutcome::failure(&ToolError::Protocol(e))
            }
        };
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: qualified.to_string(),
                success: !outcome.is_error(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
        }
        outcome
    }

    /// Disconnect every session.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().map(|e| e.handle.clone()).collect();
        join_all(handles.iter().map(|h| h.disconnect())).await;
    }
}

/// Session ids become part of tool names, which models restrict to
/// `[A-Za-z0-9_-]`.
fn validate_session_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::validation("external server id must not be empty"));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(Error::validation(format!(
            "external server id '{id}' may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}
