//! Tool descriptors and the read-only tool registry.
//!
//! A [`ToolDescriptor`] is stored configuration: a templated HTTP call (Web)
//! or a sandboxed script (Code), with its parameter schema, secret variables,
//! output routing and an optional chained successor. Synthetic tools that are
//! implemented natively (such as knowledge-base retrieval) implement
//! [`NativeTool`] instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use crate::error::{Error, Result, ToolError};
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: Value,
}

/// Execution substrate of a stored tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// `payload` is a curl-style HTTP template
    Web,
    /// `payload` is a sandboxed script body
    Code,
}

/// Whether the model sees the tool directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolScope {
    #[default]
    Principal,
    /// Only reachable as a chain target
    Auxiliary,
}

/// Who receives a successful result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPolicy {
    #[default]
    Model,
    User,
    Both,
}

impl OutputPolicy {
    pub fn includes_model(self) -> bool {
        matches!(self, Self::Model | Self::Both)
    }

    pub fn includes_user(self) -> bool {
        matches!(self, Self::User | Self::Both)
    }
}

/// How a result is rendered when delivered to the end user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl std::fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        };
        f.write_str(s)
    }
}

/// A declared tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    /// Allowed values when `type = "enum"`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    /// Element type when `type = "array"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
}

fn default_param_type() -> String {
    "string".into()
}

const PARAM_TYPES: &[&str] = &["string", "number", "integer", "boolean", "object", "array", "enum"];

impl ParamSpec {
    pub fn new(param_type: &str, description: &str, required: bool) -> Self {
        Self {
            param_type: param_type.into(),
            description: description.into(),
            required,
            options: Vec::new(),
            item_type: None,
        }
    }

    fn to_schema(&self, name: &str) -> Result<Value> {
        if !PARAM_TYPES.contains(&self.param_type.as_str()) {
            return Err(Error::validation(format!(
                "parameter '{name}' has unknown type '{}'",
                self.param_type
            )));
        }
        let mut prop = serde_json::Map::new();
        if self.param_type == "enum" {
            if self.options.is_empty() {
                return Err(Error::validation(format!(
                    "enum parameter '{name}' declares no options"
                )));
            }
            prop.insert("type".into(), json!("string"));
            prop.insert("enum".into(), json!(self.options));
        } else {
            prop.insert("type".into(), json!(self.param_type));
        }
        if self.param_type == "array" {
            let item = self.item_type.as_deref().unwrap_or("string");
            prop.insert("items".into(), json!({ "type": item }));
        }
        if !self.description.is_empty() {
            prop.insert("description".into(), json!(self.description));
        }
        Ok(Value::Object(prop))
    }
}

/// A per-descriptor variable substituted as `{var.KEY}`. Never shown to the model.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolVariable {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub secret: bool,
}

impl std::fmt::Debug for ToolVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value: &dyn std::fmt::Debug = if self.secret { &"***" } else { &self.value };
        f.debug_struct("ToolVariable")
            .field("key", &self.key)
            .field("value", value)
            .field("secret", &self.secret)
            .finish()
    }
}

/// Stored configuration for one Web or Code tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(default = "new_tool_id")]
    pub id: String,

    /// Unique name (also the model-visible function name)
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub kind: ToolKind,

    #[serde(default)]
    pub scope: ToolScope,

    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,

    /// HTTP template (Web) or script body (Code)
    pub payload: String,

    /// Code tools: global read back as the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,

    /// Whether `{token}` substitution runs on the payload
    #[serde(default = "default_true")]
    pub substitute: bool,

    /// Web tools: `source_key -> renamed_key`. Empty keeps the whole response.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub response_map: BTreeMap<String, String>,

    #[serde(default)]
    pub output: OutputPolicy,

    #[serde(default)]
    pub channel: DeliveryChannel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_instruction: Option<String>,

    /// Tool invoked with `{...arguments, result}` instead of returning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_tool: Option<String>,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<ToolVariable>,
}

fn new_tool_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_true() -> bool {
    true
}

impl ToolDescriptor {
    /// A minimal active, principal descriptor routed to the model.
    pub fn new(name: impl Into<String>, kind: ToolKind, payload: impl Into<String>) -> Self {
        Self {
            id: new_tool_id(),
            name: name.into(),
            description: String::new(),
            kind,
            scope: ToolScope::Principal,
            parameters: BTreeMap::new(),
            payload: payload.into(),
            output_variable: None,
            substitute: true,
            response_map: BTreeMap::new(),
            output: OutputPolicy::Model,
            channel: DeliveryChannel::Text,
            post_instruction: None,
            next_tool: None,
            active: true,
            variables: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>, secret: bool) -> Self {
        self.variables.push(ToolVariable {
            key: key.into(),
            value: value.into(),
            secret,
        });
        self
    }

    pub fn with_next_tool(mut self, next: impl Into<String>) -> Self {
        self.next_tool = Some(next.into());
        self
    }

    pub fn with_output(mut self, output: OutputPolicy, channel: DeliveryChannel) -> Self {
        self.output = output;
        self.channel = channel;
        self
    }

    /// Only active Principal descriptors are offered to the model.
    pub fn is_exposed(&self) -> bool {
        self.active && self.scope == ToolScope::Principal
    }

    /// Variables as a lookup map for substitution.
    pub fn variable_map(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|v| (v.key.clone(), v.value.clone()))
            .collect()
    }

    /// Convert the declared parameters into a JSON-schema object.
    pub fn input_schema(&self) -> Result<Value> {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, spec) in &self.parameters {
            properties.insert(name.clone(), spec.to_schema(name)?);
            if spec.required {
                required.push(Value::String(name.clone()));
            }
        }
        Ok(json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }))
    }

    pub fn to_definition(&self) -> Result<ToolDefinition> {
        Ok(ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema()?,
        })
    }
}

/// Read-only catalog of tool descriptors, validated on construction.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
    /// Registration order, so the model sees a stable catalog
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting duplicate names, malformed parameter
    /// schemas and more than `max_tools` descriptors.
    pub fn from_descriptors(descriptors: Vec<ToolDescriptor>, max_tools: usize) -> Result<Self> {
        if descriptors.len() > max_tools {
            return Err(Error::validation(format!(
                "{} tools declared, at most {max_tools} allowed per agent",
                descriptors.len()
            )));
        }
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Register a descriptor. Names must be unique.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if descriptor.name.trim().is_empty() {
            return Err(Error::validation("tool name must not be empty"));
        }
        if self.tools.contains_key(&descriptor.name) {
            return Err(Error::validation(format!(
                "duplicate tool name '{}'",
                descriptor.name
            )));
        }
        descriptor.input_schema()?;
        self.order.push(descriptor.name.clone());
        self.tools.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Get a descriptor by name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Look up an active descriptor, or fail with `NotFound`.
    pub fn resolve(&self, name: &str) -> std::result::Result<&ToolDescriptor, ToolError> {
        self.tools
            .get(name)
            .filter(|d| d.active)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.order.iter().filter_map(|n| self.tools.get(n))
    }

    /// Definitions of active Principal-scope descriptors (for sending to the LLM).
    pub fn principal_definitions(&self) -> Result<Vec<ToolDefinition>> {
        self.descriptors()
            .filter(|d| d.is_exposed())
            .map(ToolDescriptor::to_definition)
            .collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Routing decision recorded for one executed tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    /// Effective policy (errors always route to the model)
    pub policy: OutputPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<DeliveryChannel>,

    #[serde(default)]
    pub delivered: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_instruction: Option<String>,

    /// The result describes a failure
    #[serde(default)]
    pub failed: bool,
}

/// A routed tool result, the unit folded back into the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub result: Value,
    pub routing: Routing,
}

impl ToolOutcome {
    /// A successful result shown only to the model.
    pub fn for_model(result: Value) -> Self {
        Self {
            result,
            routing: Routing::default(),
        }
    }

    /// A failure rendered as `{"error": ...}` and routed to the model.
    pub fn failure(error: &ToolError) -> Self {
        Self {
            result: json!({ "error": error.to_string() }),
            routing: Routing {
                failed: true,
                ..Routing::default()
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.routing.failed
    }

    /// Content of the tool-result message appended to the transcript.
    pub fn transcript_content(&self) -> String {
        if !self.routing.policy.includes_model() {
            return json!({
                "status": "delivered_to_user",
                "message": "The result was delivered directly to the user",
            })
            .to_string();
        }
        let body = self.result.to_string();
        match &self.routing.post_instruction {
            Some(post) if !post.is_empty() => format!("{body}\n\nInstruction: {post}"),
            _ => body,
        }
    }
}

/// A tool implemented in code rather than stored configuration.
#[async_trait]
pub trait NativeTool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}
