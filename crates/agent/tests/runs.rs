//! Full runs through the gateway and an external tool session.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use switchyard_agent::ConversationOrchestrator;
use switchyard_config::{AppConfig, McpConfig};
use switchyard_core::agent::{AgentProfile, ConversationContext};
use switchyard_core::error::{ProtocolError, ProviderError};
use switchyard_core::message::{Message, MessageToolCall};
use switchyard_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use switchyard_mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use switchyard_mcp::{McpTransport, ServerSpec, SessionManager, TransportFactory};
use switchyard_providers::{Backend, LlmGateway};
use switchyard_tools::{ToolExecutor, load_registry};

struct Scripted {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl Scripted {
    fn new(mut responses: Vec<ProviderResponse>) -> Arc<Self> {
        responses.reverse();
        Arc::new(Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| ProviderError::InvalidResponse("script exhausted".into()))
    }
}

struct Down;

#[async_trait]
impl Provider for Down {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

fn reply(content: &str, calls: &[(&str, &str, Value)]) -> ProviderResponse {
    let mut message = Message::assistant(content);
    message.tool_calls = calls
        .iter()
        .map(|(id, name, args)| MessageToolCall {
            id: (*id).into(),
            name: (*name).into(),
            arguments: args.to_string(),
        })
        .collect();
    ProviderResponse {
        message,
        usage: Usage {
            input_tokens: Some(100),
            output_tokens: Some(20),
        },
        model: "scripted".into(),
        finish_reason: None,
        provider_used: String::new(),
        fallback_error: None,
    }
}

fn profile() -> AgentProfile {
    AgentProfile {
        id: "agent-1".into(),
        name: "docs".into(),
        role: "a documentation assistant".into(),
        model: Some("llama3".into()),
        ..AgentProfile::default()
    }
}

fn executor(config: &AppConfig) -> Arc<ToolExecutor> {
    let registry = load_registry(switchyard_tools::builtins::all(), 20).unwrap();
    Arc::new(ToolExecutor::new(Arc::new(registry), config).unwrap())
}

/// A wiki server with one `lookup` tool.
struct WikiFactory;

struct WikiTransport;

#[async_trait]
impl TransportFactory for WikiFactory {
    async fn open(&self, _spec: &ServerSpec) -> Result<Box<dyn McpTransport>, ProtocolError> {
        Ok(Box::new(WikiTransport))
    }
}

#[async_trait]
impl McpTransport for WikiTransport {
    async fn request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse, ProtocolError> {
        let params = request.params.clone().unwrap_or(Value::Null);
        let result = match request.method.as_str() {
            "initialize" => json!({"protocolVersion": "2024-11-05", "capabilities": {}, "serverInfo": {"name": "wiki"}}),
            "tools/list" => json!({"tools": [{
                "name": "lookup",
                "description": "Look up a wiki page",
                "inputSchema": {"type": "object", "properties": {"page": {"type": "string"}}}
            }]}),
            _ => json!({"content": [{"type": "text", "text": format!("page {}", params["arguments"]["page"].as_str().unwrap_or("?"))}]}),
        };
        Ok(JsonRpcResponse {
            id: Some(request.id),
            result: Some(result),
            error: None,
        })
    }

    async fn notify(&mut self, _notification: JsonRpcNotification) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn close(&mut self) {}
}

#[tokio::test]
async fn local_failure_falls_back_to_aggregator() {
    let config = AppConfig::default();
    let aggregator = Scripted::new(vec![reply("Hi from the aggregator", &[])]);
    let gateway = LlmGateway::new(Some(aggregator.clone()))
        .with_local(Arc::new(Down))
        .with_default_backend(Backend::Local);

    let orch = ConversationOrchestrator::new(profile(), Arc::new(gateway), executor(&config), &config);
    let report = orch.run(&ConversationContext::new("hello")).await;

    assert_eq!(report.answer(), Some("Hi from the aggregator"));
    assert_eq!(report.trace.provider_used, "aggregator_fallback");
    assert_eq!(report.trace.model, "llama3");
    assert_eq!(aggregator.requests()[0].model, "llama3");
}

#[tokio::test]
async fn external_session_tools_join_the_loop() {
    let config = AppConfig::default();
    let sessions = Arc::new(SessionManager::with_factory(&McpConfig::default(), Arc::new(WikiFactory)));
    sessions
        .register(ServerSpec::stdio("wiki", "wiki-server", Vec::new()).with_agent("agent-1"))
        .await
        .unwrap();
    sessions.connect("wiki").await.unwrap();

    let provider = Scripted::new(vec![
        reply("", &[("c1", "mcp_wiki_lookup", json!({"page": "Rust"}))]),
        reply("The Rust page says hello.", &[]),
    ]);
    let orch = ConversationOrchestrator::new(profile(), provider.clone(), executor(&config), &config)
        .with_sessions(sessions.clone());

    let catalog = orch.catalog().await.unwrap();
    assert_eq!(catalog.names(), vec!["current_datetime", "calculate", "mcp_wiki_lookup"]);

    let report = orch.run(&ConversationContext::new("what does the Rust page say?")).await;
    assert!(report.is_success(), "{:?}", report.outcome);
    assert_eq!(report.trace.input_tokens, Some(200));

    let requests = provider.requests();
    let external = requests[0].tools.iter().find(|t| t.name == "mcp_wiki_lookup").unwrap();
    assert!(external.description.starts_with("[MCP: "));
    let tool_message = requests[1].messages.last().unwrap();
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(tool_message.content, r#"{"answer":"page Rust"}"#);
}

#[tokio::test]
async fn other_agents_do_not_see_the_session() {
    let config = AppConfig::default();
    let sessions = Arc::new(SessionManager::with_factory(&McpConfig::default(), Arc::new(WikiFactory)));
    sessions
        .register(ServerSpec::stdio("wiki", "wiki-server", Vec::new()).with_agent("someone-else"))
        .await
        .unwrap();
    sessions.connect("wiki").await.unwrap();

    let orch = ConversationOrchestrator::new(profile(), Scripted::new(Vec::new()), executor(&config), &config)
        .with_sessions(sessions);
    let catalog = orch.catalog().await.unwrap();
    assert!(!catalog.names().contains(&"mcp_wiki_lookup"));
}
