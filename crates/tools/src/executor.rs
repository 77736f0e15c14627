//! ToolExecutor: dispatch a call by tool kind, follow chains, route output.
//!
//! `execute` never fails. Every error is folded into a [`ToolOutcome`]
//! whose result is `{"error": ...}` and whose routing targets the model,
//! so the conversation can continue.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchyard_config::AppConfig;
use switchyard_core::delivery::Messenger;
use switchyard_core::error::{Error, Result, ToolError};
use switchyard_core::event::{DomainEvent, EventBus};
use switchyard_core::provider::ToolDefinition;
use switchyard_core::tool::{NativeTool, Routing, ToolDescriptor, ToolKind, ToolOutcome, ToolRegistry};
use tracing::{debug, info, warn};

use crate::routing::{OutputRouter, is_error_result};
use crate::sandbox::{Sandbox, SandboxPolicy};
use crate::template::validate_curl;
use crate::web::WebRunner;

/// Build a registry, additionally checking every Web template.
pub fn load_registry(descriptors: Vec<ToolDescriptor>, max_tools: usize) -> Result<ToolRegistry> {
    for descriptor in descriptors.iter().filter(|d| d.kind == ToolKind::Web) {
        validate_curl(&descriptor.payload)
            .map_err(|e| Error::validation(format!("tool '{}': {e}", descriptor.name)))?;
    }
    ToolRegistry::from_descriptors(descriptors, max_tools)
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    natives: HashMap<String, Arc<dyn NativeTool>>,
    web: WebRunner,
    sandbox: Sandbox,
    router: OutputRouter,
    max_chain_depth: usize,
    event_bus: Option<EventBus>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, config: &AppConfig) -> std::result::Result<Self, ToolError> {
        let web = WebRunner::new(Duration::from_secs(config.http_tools.timeout_secs))?;
        let sandbox = Sandbox::new(SandboxPolicy::from_config(&config.sandbox), web.client().clone());
        let router = OutputRouter::new(web.client().clone(), &config.delivery);
        Ok(Self {
            registry,
            natives: HashMap::new(),
            web,
            sandbox,
            router,
            max_chain_depth: config.orchestrator.max_chain_depth,
            event_bus: None,
        })
    }

    /// Add a tool implemented in code. It takes precedence over a registry
    /// descriptor of the same name.
    pub fn with_native(mut self, tool: Arc<dyn NativeTool>) -> Self {
        self.natives.insert(tool.name().to_string(), tool);
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn Messenger>) -> Self {
        self.router = self.router.with_messenger(messenger);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_sandbox_policy(mut self, policy: SandboxPolicy) -> Self {
        self.sandbox = Sandbox::new(policy, self.web.client().clone());
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Whether `name` is dispatchable here.
    pub fn knows(&self, name: &str) -> bool {
        self.natives.contains_key(name) || self.registry.resolve(name).is_ok()
    }

    /// Principal descriptors followed by native tools.
    pub fn definitions(&self) -> Result<Vec<ToolDefinition>> {
        let mut defs = self.registry.principal_definitions()?;
        let mut natives: Vec<_> = self.natives.values().map(|t| t.to_definition()).collect();
        natives.sort_by(|a, b| a.name.cmp(&b.name));
        defs.extend(natives);
        Ok(defs)
    }

    /// Execute a tool by name, following any chain to its tail.
    pub async fn execute(&self, name: &str, arguments: Value, reply_target: Option<&str>) -> ToolOutcome {
        let started = Instant::now();
        let outcome = self.execute_chain(name, arguments, reply_target).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if outcome.is_error() {
            warn!(tool = %name, duration_ms, error = %outcome.result["error"], "Tool call failed");
        } else {
            info!(
                tool = %name,
                duration_ms,
                policy = ?outcome.routing.policy,
                delivered = outcome.routing.delivered,
                "Tool call finished"
            );
        }
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: name.to_string(),
                success: !outcome.is_error(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
        }
        outcome
    }

    async fn execute_chain(&self, head: &str, mut arguments: Value, reply_target: Option<&str>) -> ToolOutcome {
        if let Some(native) = self.natives.get(head) {
            debug!(tool = %head, "Dispatching native tool");
            return match native.execute(arguments).await {
                Ok(result) if is_error_result(&result) => ToolOutcome {
                    result,
                    routing: Routing {
                        failed: true,
                        ..Routing::default()
                    },
                },
                Ok(result) => ToolOutcome::for_model(result),
                Err(e) => ToolOutcome::failure(&e),
            };
        }

        let mut current = head.to_string();
        let mut depth = 0usize;
        loop {
            let descriptor = match self.registry.resolve(&current) {
                Ok(d) => d,
                Err(e) => return ToolOutcome::failure(&e),
            };
            depth += 1;
            debug!(tool = %descriptor.name, kind = ?descriptor.kind, depth, "Dispatching tool");

            let result = match self.run_descriptor(descriptor, &arguments).await {
                Ok(result) => result,
                Err(e) => return ToolOutcome::failure(&e),
            };

            let next = match &descriptor.next_tool {
                Some(next) if !is_error_result(&result) => next,
                _ => return self.router.route(descriptor, result, reply_target).await,
            };
            if depth >= self.max_chain_depth {
                return ToolOutcome::failure(&ToolError::ChainTooDeep {
                    head: head.to_string(),
                    max_depth: self.max_chain_depth,
                });
            }
            info!(from = %descriptor.name, to = %next, depth, "Chaining tool result");
            arguments = chain_arguments(arguments, result);
            current = next.clone();
        }
    }

    async fn run_descriptor(&self, descriptor: &ToolDescriptor, arguments: &Value) -> std::result::Result<Value, ToolError> {
        match descriptor.kind {
            ToolKind::Web => self.web.run(descriptor, arguments).await,
            ToolKind::Code => self.sandbox.run(descriptor, arguments).await,
        }
    }
}

/// Arguments for the next hop: the previous arguments plus `result`.
fn chain_arguments(arguments: Value, result: Value) -> Value {
    let mut merged = match arguments {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    merged.insert("result".into(), result);
    Value::Object(merged)
}
