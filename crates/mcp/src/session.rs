//! One actor task per external session.
//!
//! The actor owns the transport outright and handles its mailbox one
//! command at a time, so the mailbox is the session's lock: concurrent
//! callers queue, and every exit path (success, timeout, error) returns
//! control to the loop before the next command is read. A call that finds
//! the session down reconnects once inside the actor and retries.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::error::ProtocolError;
use switchyard_core::event::{DomainEvent, EventBus};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::protocol::{
    CallToolResult, InitializeResult, JsonRpcNotification, JsonRpcRequest, ListToolsResult, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, RemoteTool, call_tool_params, initialize_params,
    list_tools_params,
};
use crate::server::{ServerSpec, SessionState, SessionStatus};
use crate::store::{ExternalTool, ExternalToolStore, SyncReport};
use crate::transport::{McpTransport, TransportFactory};

const MAILBOX_CAPACITY: usize = 32;

/// Upper bound on `tools/list` pages followed in one sync.
const MAX_LIST_PAGES: usize = 100;

type Reply<T> = oneshot::Sender<Result<T, ProtocolError>>;

enum Command {
    Connect(Reply<SessionStatus>),
    Sync(Reply<SyncReport>),
    Call {
        tool: String,
        arguments: Value,
        reply: Reply<Value>,
    },
    Disconnect(oneshot::Sender<SessionStatus>),
    Status(oneshot::Sender<SessionStatus>),
}

/// Timeouts and handshake parameters shared by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub protocol_version: String,
}

impl SessionSettings {
    pub fn from_config(config: &switchyard_config::McpConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            protocol_version: config.protocol_version.clone(),
        }
    }
}

/// Cheap, cloneable address of a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Start the actor for `spec`. The session begins disconnected.
    pub fn spawn(
        spec: ServerSpec,
        settings: SessionSettings,
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn ExternalToolStore>,
        event_bus: Option<EventBus>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (state_tx, state) = watch::channel(SessionState::Disconnected);
        let handle = Self {
            id: spec.id.clone(),
            tx,
            state,
        };
        let actor = SessionActor {
            status: SessionStatus::new(&spec),
            spec,
            settings,
            factory,
            store,
            event_bus,
            transport: None,
            state_tx,
            next_id: 0,
        };
        tokio::spawn(actor.run(rx));
        handle
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state, read without queueing on the mailbox.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub async fn connect(&self) -> Result<SessionStatus, ProtocolError> {
        self.ask(Command::Connect).await
    }

    pub async fn sync(&self) -> Result<SyncReport, ProtocolError> {
        self.ask(Command::Sync).await
    }

    pub async fn call(&self, tool: &str, arguments: Value) -> Result<Value, ProtocolError> {
        let tool = tool.to_string();
        self.ask(|reply| Command::Call { tool, arguments, reply }).await
    }

    pub async fn disconnect(&self) -> Result<SessionStatus, ProtocolError> {
        self.tell(Command::Disconnect).await
    }

    pub async fn status(&self) -> Result<SessionStatus, ProtocolError> {
        self.tell(Command::Status).await
    }

    async fn ask<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, ProtocolError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ProtocolError::SessionClosed(self.id.clone()))?;
        rx.await.map_err(|_| ProtocolError::SessionClosed(self.id.clone()))?
    }

    async fn tell<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ProtocolError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ProtocolError::SessionClosed(self.id.clone()))?;
        rx.await.map_err(|_| ProtocolError::SessionClosed(self.id.clone()))
    }
}

struct SessionActor {
    spec: ServerSpec,
    settings: SessionSettings,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn ExternalToolStore>,
    event_bus: Option<EventBus>,
    transport: Option<Box<dyn McpTransport>>,
    status: SessionStatus,
    state_tx: watch::Sender<SessionState>,
    next_id: u64,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Connect(reply) => {
                    let result = self.connect().await;
                    let _ = reply.send(result);
                }
                Command::Sync(reply) => {
                    let result = if self.transport.is_some() {
                        self.sync().await
                    } else {
                        Err(ProtocolError::NotConnected(self.spec.id.clone()))
                    };
                    let _ = reply.send(result);
                }
                Command::Call { tool, arguments, reply } => {
                    let result = self.call(&tool, arguments).await;
                    let _ = reply.send(result);
                }
                Command::Disconnect(reply) => {
                    self.disconnect(None).await;
                    let _ = reply.send(self.status.clone());
                }
                Command::Status(reply) => {
                    let _ = reply.send(self.status.clone());
                }
            }
        }
        // Every handle dropped
        self.disconnect(None).await;
        debug!(session = %self.spec.id, "Session actor stopped");
    }

    fn request(&mut self, method: &str, params: Option<Value>) -> JsonRpcRequest {
        self.next_id += 1;
        JsonRpcRequest::new(self.next_id, method, params)
    }

    /// Open the transport, handshake, then sync the tool list.
    async fn connect(&mut self) -> Result<SessionStatus, ProtocolError> {
        if self.transport.is_some() {
            debug!(session = %self.spec.id, "Already connected");
            return Ok(self.status.clone());
        }
        self.set_state(SessionState::Connecting);
        info!(
            session = %self.spec.id,
            transport = %self.spec.transport,
            endpoint = %self.spec.endpoint(),
            "Connecting to tool server"
        );

        let secs = self.settings.connect_timeout.as_secs();
        let opened = tokio::time::timeout(self.settings.connect_timeout, self.open_and_handshake()).await;
        let (transport, init) = match opened {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => {
                return Err(self.fail(ProtocolError::Timeout {
                    operation: "connect".into(),
                    secs,
                }));
            }
        };

        let server_name = init.server_info.as_ref().map(|s| s.name.clone());
        self.transport = Some(transport);
        self.set_state(SessionState::Connected);
        self.status.last_error = None;
        self.status.connected_at = Some(Utc::now());
        self.status.server_version = init.server_info.and_then(|s| s.version);
        self.status.server_name = server_name.clone();
        self.status.protocol_version = init.protocol_version;
        self.status.capabilities = Some(init.capabilities).filter(|c| !c.is_null());

        info!(
            session = %self.spec.id,
            server = server_name.as_deref().unwrap_or("unknown"),
            version = self.status.server_version.as_deref().unwrap_or("unknown"),
            "Tool server connected"
        );
        self.publish(DomainEvent::SessionConnected {
            session_id: self.spec.id.clone(),
            server_name: server_name.unwrap_or_default(),
            timestamp: Utc::now(),
        });

        if let Err(e) = self.sync().await {
            // Drop the half-open transport so the next connect starts over
            if let Some(mut transport) = self.transport.take() {
                transport.close().await;
            }
            return Err(self.fail(e));
        }
        Ok(self.status.clone())
    }

    async fn open_and_handshake(&mut self) -> Result<(Box<dyn McpTransport>, InitializeResult), ProtocolError> {
        let mut transport = self.factory.open(&self.spec).await?;
        let request = self.request(METHOD_INITIALIZE, Some(initialize_params(&self.settings.protocol_version)));
        let init: InitializeResult = match transport.request(request).await {
            Ok(response) => response
                .decode(METHOD_INITIALIZE)
                .map_err(|e| ProtocolError::Handshake(e.to_string()))?,
            Err(e) => {
                transport.close().await;
                return Err(ProtocolError::Handshake(e.to_string()));
            }
        };
        transport.notify(JsonRpcNotification::new(METHOD_INITIALIZED)).await?;
        Ok((transport, init))
    }

    /// Page through `tools/list` and reconcile the store.
    async fn sync(&mut self) -> Result<SyncReport, ProtocolError> {
        let secs = self.settings.call_timeout.as_secs();
        let listed = tokio::time::timeout(self.settings.call_timeout, self.list_all_tools()).await;
        let tools = match listed {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => return Err(self.fail_if_broken(e).await),
            Err(_) => {
                return Err(ProtocolError::Timeout {
                    operation: METHOD_TOOLS_LIST.into(),
                    secs,
                });
            }
        };

        let now = Utc::now();
        let reported = tools
            .into_iter()
            .map(|t| ExternalTool::from_remote(&self.spec.id, t, now))
            .collect();
        let report = self.store.reconcile(&self.spec.id, reported);
        self.status.synced_at = Some(now);
        self.status.tool_count = report.total();

        info!(
            session = %self.spec.id,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Tool list synced"
        );
        self.publish(DomainEvent::SessionSynced {
            session_id: self.spec.id.clone(),
            inserted: report.inserted,
            updated: report.updated,
            deleted: report.deleted,
            timestamp: now,
        });
        Ok(report)
    }

    async fn list_all_tools(&mut self) -> Result<Vec<RemoteTool>, ProtocolError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let request = self.request(METHOD_TOOLS_LIST, list_tools_params(cursor.as_deref()));
            let transport = self
                .transport
                .as_mut()
                .ok_or_else(|| ProtocolError::NotConnected(self.spec.id.clone()))?;
            let page: ListToolsResult = transport.request(request).await?.decode(METHOD_TOOLS_LIST)?;
            tools.extend(page.tools);
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }
        warn!(session = %self.spec.id, pages = MAX_LIST_PAGES, "Tool list pagination cut short");
        Ok(tools)
    }

    /// Run a call, reconnecting once if the session is down or dies mid-call.
    async fn call(&mut self, tool: &str, arguments: Value) -> Result<Value, ProtocolError> {
        if self.transport.is_none() {
            info!(session = %self.spec.id, tool, "No live session, reconnecting");
            self.connect()
                .await
                .map_err(|e| ProtocolError::ReconnectFailed(e.to_string()))?;
            return self.call_once(tool, arguments).await;
        }

        match self.call_once(tool, arguments.clone()).await {
            Err(ProtocolError::Transport(reason)) => {
                warn!(session = %self.spec.id, tool, reason = %reason, "Session died mid-call, reconnecting");
                self.connect()
                    .await
                    .map_err(|e| ProtocolError::ReconnectFailed(e.to_string()))?;
                self.call_once(tool, arguments).await
            }
            other => other,
        }
    }

    async fn call_once(&mut self, tool: &str, arguments: Value) -> Result<Value, ProtocolError> {
        let request = self.request(METHOD_TOOLS_CALL, Some(call_tool_params(tool, arguments)));
        let secs = self.settings.call_timeout.as_secs();
        let timeout = self.settings.call_timeout;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| ProtocolError::NotConnected(self.spec.id.clone()))?;

        debug!(session = %self.spec.id, tool, "Calling external tool");
        let response = match tokio::time::timeout(timeout, transport.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(self.fail_if_broken(e).await),
            Err(_) => {
                warn!(session = %self.spec.id, tool, secs, "External tool call timed out");
                return Err(ProtocolError::Timeout {
                    operation: format!("tool '{tool}'"),
                    secs,
                });
            }
        };
        let result: CallToolResult = response.decode(METHOD_TOOLS_CALL)?;
        result.normalize()
    }

    /// A transport failure leaves the stream unusable; drop it so the next
    /// call reconnects.
    async fn fail_if_broken(&mut self, error: ProtocolError) -> ProtocolError {
        if matches!(error, ProtocolError::Transport(_)) {
            self.disconnect(Some(error.to_string())).await;
            self.set_state(SessionState::Error);
            self.status.last_error = Some(error.to_string());
        }
        error
    }

    fn fail(&mut self, error: ProtocolError) -> ProtocolError {
        warn!(session = %self.spec.id, error = %error, "Tool server connection failed");
        self.transport = None;
        self.set_state(SessionState::Error);
        self.status.last_error = Some(error.to_string());
        error
    }

    async fn disconnect(&mut self, reason: Option<String>) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        transport.close().await;
        self.set_state(SessionState::Disconnected);
        info!(session = %self.spec.id, reason = reason.as_deref().unwrap_or("requested"), "Tool server disconnected");
        self.publish(DomainEvent::SessionDisconnected {
            session_id: self.spec.id.clone(),
            reason,
            timestamp: Utc::now(),
        });
    }

    fn set_state(&mut self, state: SessionState) {
        self.status.state = state;
        self.state_tx.send_replace(state);
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}
