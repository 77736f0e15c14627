//! Declared external tool servers and their observable session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// How a session reaches its server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Launch a subprocess and speak newline-delimited JSON over its pipes
    #[default]
    Stdio,
    /// Legacy HTTP+SSE: a GET event stream plus a POST endpoint it announces
    Sse,
    /// Single POST endpoint answering with JSON or an SSE stream
    StreamableHttp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        };
        f.write_str(s)
    }
}

/// One external server an agent may use.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Stable session id; also part of the model-visible tool names
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Owning agent
    #[serde(default)]
    pub agent: String,

    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Preset this server was created from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServerSpec {
    pub fn stdio(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            agent: String::new(),
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args,
            env: BTreeMap::new(),
            url: None,
            headers: BTreeMap::new(),
            preset: None,
            enabled: true,
        }
    }

    pub fn http(id: impl Into<String>, transport: TransportKind, url: impl Into<String>) -> Self {
        let mut spec = Self::stdio(id, "", Vec::new());
        spec.command = None;
        spec.transport = transport;
        spec.url = Some(url.into());
        spec
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    /// Human-readable endpoint for logs (no env or header values).
    pub fn endpoint(&self) -> String {
        match self.transport {
            TransportKind::Stdio => {
                let mut line = self.command.clone().unwrap_or_default();
                for arg in &self.args {
                    line.push(' ');
                    line.push_str(arg);
                }
                line
            }
            _ => self.url.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for ServerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("agent", &self.agent)
            .field("transport", &self.transport)
            .field("endpoint", &self.endpoint())
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatus {
    pub id: String,
    pub name: String,
    pub transport: TransportKind,
    pub state: SessionState,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub protocol_version: Option<String>,
    pub capabilities: Option<Value>,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    pub tool_count: usize,
}

impl SessionStatus {
    pub fn new(spec: &ServerSpec) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            transport: spec.transport,
            ..Self::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_names_round_trip_through_toml() {
        let spec: ServerSpec = toml::from_str(
            r#"
id = "wiki"
name = "DeepWiki"
transport = "streamable-http"
url = "https://mcp.deepwiki.com/mcp"
"#,
        )
        .unwrap();
        assert_eq!(spec.transport, TransportKind::StreamableHttp);
        assert!(spec.enabled);
        assert_eq!(spec.transport.to_string(), "streamable-http");
    }

    #[test]
    fn debug_hides_secret_values() {
        let mut spec = ServerSpec::stdio("search", "npx", vec!["-y".into(), "firecrawl-mcp".into()]);
        spec.env.insert("FIRECRAWL_API_KEY".into(), "fc-secret".into());
        let debug = format!("{spec:?}");
        assert!(debug.contains("FIRECRAWL_API_KEY"));
        assert!(!debug.contains("fc-secret"));
        assert_eq!(spec.endpoint(), "npx -y firecrawl-mcp");
    }
}
