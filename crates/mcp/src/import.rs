//! Turning shared server descriptions into [`ServerSpec`]s.
//!
//! Two entry points: a one-click `{"mcpServers": {...}}` document as
//! published by most tool-server READMEs, and a built-in preset catalogue
//! whose templates carry `${input:key}` placeholders filled on apply.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use switchyard_core::error::{Error, Result};

use crate::server::{ServerSpec, TransportKind};

/// Overrides applied on import.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub agent: String,
}

/// Parse a one-click document, taking its first server.
pub fn import_one_click(document: &str, options: ImportOptions) -> Result<ServerSpec> {
    let config: Value =
        serde_json::from_str(document).map_err(|e| Error::validation(format!("invalid JSON: {e}")))?;
    let servers = config
        .get("mcpServers")
        .ok_or_else(|| Error::validation("document must contain 'mcpServers' at the root"))?
        .as_object()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| Error::validation("'mcpServers' must be a non-empty object"))?;

    // Without preserve_order the map is sorted, so "first" is lexicographic
    let (server_name, server) = servers
        .iter()
        .next()
        .ok_or_else(|| Error::validation("'mcpServers' must be a non-empty object"))?;
    let server = server
        .as_object()
        .ok_or_else(|| Error::validation(format!("server '{server_name}' must be an object")))?;

    let text = |key: &str| server.get(key).and_then(Value::as_str).map(str::to_string);
    let (transport, url) = match (text("serverUrl"), text("url"), text("command")) {
        (Some(server_url), _, _) => (TransportKind::Sse, Some(server_url)),
        (None, Some(url), _) if url.contains("/sse") => (TransportKind::Sse, Some(url)),
        (None, Some(url), _) => (TransportKind::StreamableHttp, Some(url)),
        (None, None, Some(_)) => (TransportKind::Stdio, None),
        (None, None, None) => {
            return Err(Error::validation(format!(
                "server '{server_name}' needs 'command', 'url' or 'serverUrl'"
            )));
        }
    };

    let id = options.id.unwrap_or_else(|| slug(server_name));
    Ok(ServerSpec {
        name: options.name.unwrap_or_else(|| server_name.clone()),
        description: options
            .description
            .unwrap_or_else(|| format!("Installed via one-click: {server_name}")),
        agent: options.agent,
        transport,
        command: if transport == TransportKind::Stdio { text("command") } else { None },
        args: string_list(server.get("args")),
        env: string_map(server.get("env")),
        url,
        headers: string_map(server.get("headers")),
        preset: None,
        enabled: true,
        id,
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.as_str().map_or_else(|| v.to_string(), str::to_string)))
                .collect()
        })
        .unwrap_or_default()
}

/// Lowercase id usable inside tool names.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() { "server".into() } else { trimmed.to_string() }
}

// --- presets ---

/// A value the user supplies when applying a preset.
#[derive(Debug, Clone, Serialize)]
pub struct PresetInput {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub secret: bool,
}

/// A ready-made server template.
#[derive(Debug, Clone, Serialize)]
pub struct Preset {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub transport: TransportKind,
    pub command: Option<&'static str>,
    pub args: &'static [&'static str],
    pub url: Option<&'static str>,
    pub env: &'static [(&'static str, &'static str)],
    pub headers: &'static [(&'static str, &'static str)],
    pub documentation_url: Option<&'static str>,
    pub tags: &'static [&'static str],
    pub inputs: &'static [PresetInput],
}

const NO_INPUTS: &[PresetInput] = &[];

static PRESETS: &[Preset] = &[
    Preset {
        key: "deepwiki-sse",
        name: "DeepWiki (SSE)",
        description: "DeepWiki documentation search over the SSE transport.",
        transport: TransportKind::Sse,
        command: None,
        args: &[],
        url: Some("https://mcp.deepwiki.com/sse"),
        env: &[],
        headers: &[],
        documentation_url: Some("https://mcp.deepwiki.com"),
        tags: &["featured", "search", "wiki"],
        inputs: NO_INPUTS,
    },
    Preset {
        key: "deepwiki-http",
        name: "DeepWiki (HTTP)",
        description: "DeepWiki documentation search over streamable HTTP.",
        transport: TransportKind::StreamableHttp,
        command: None,
        args: &[],
        url: Some("https://mcp.deepwiki.com/mcp"),
        env: &[],
        headers: &[],
        documentation_url: Some("https://mcp.deepwiki.com"),
        tags: &["featured", "search", "wiki"],
        inputs: NO_INPUTS,
    },
    Preset {
        key: "github-copilot-pat",
        name: "GitHub Copilot (PAT)",
        description: "GitHub's hosted tool server, authenticated with a personal access token.",
        transport: TransportKind::StreamableHttp,
        command: None,
        args: &[],
        url: Some("https://api.githubcopilot.com/mcp/"),
        env: &[],
        headers: &[("Authorization", "Bearer ${input:github_mcp_pat}")],
        documentation_url: Some("https://docs.github.com/en/copilot"),
        tags: &["featured", "coding", "github"],
        inputs: &[PresetInput {
            id: "github_mcp_pat",
            label: "GitHub Personal Access Token",
            description: "Token with the 'copilot-mcp-server' scope.",
            secret: true,
        }],
    },
    Preset {
        key: "firecrawl",
        name: "Firecrawl",
        description: "Web crawler and page reader.",
        transport: TransportKind::Stdio,
        command: Some("npx"),
        args: &["-y", "firecrawl-mcp"],
        url: None,
        env: &[("FIRECRAWL_API_KEY", "${input:firecrawl_api_key}")],
        headers: &[],
        documentation_url: Some("https://github.com/mendableai/firecrawl"),
        tags: &["web", "crawler"],
        inputs: &[PresetInput {
            id: "firecrawl_api_key",
            label: "Firecrawl API Key",
            description: "Key from https://www.firecrawl.dev/",
            secret: true,
        }],
    },
    Preset {
        key: "brave-search",
        name: "Brave Search",
        description: "Privacy-focused web search through the official container image.",
        transport: TransportKind::Stdio,
        command: Some("docker"),
        args: &["run", "-i", "--rm", "-e", "BRAVE_API_KEY=${input:brave_api_key}", "mcp/brave-search"],
        url: None,
        env: &[],
        headers: &[],
        documentation_url: Some("https://mcp.so/server/brave-search"),
        tags: &["search", "privacy"],
        inputs: &[PresetInput {
            id: "brave_api_key",
            label: "Brave Search API Key",
            description: "Key from https://brave.com/search/api/",
            secret: true,
        }],
    },
    Preset {
        key: "time-server",
        name: "Time Server",
        description: "Current time and timezone conversion.",
        transport: TransportKind::Stdio,
        command: Some("uvx"),
        args: &["mcp-server-time"],
        url: None,
        env: &[],
        headers: &[],
        documentation_url: Some("https://github.com/modelcontextprotocol/servers"),
        tags: &["time", "utility"],
        inputs: NO_INPUTS,
    },
];

/// Every preset, ordered by name.
pub fn presets() -> Vec<&'static Preset> {
    let mut all: Vec<&Preset> = PRESETS.iter().collect();
    all.sort_by_key(|p| p.name.to_lowercase());
    all
}

pub fn preset(key: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.key == key)
}

/// Instantiate a preset, filling its `${input:key}` placeholders.
pub fn apply_preset(key: &str, inputs: &HashMap<String, String>, options: ImportOptions) -> Result<ServerSpec> {
    let preset = preset(key).ok_or_else(|| Error::validation(format!("unknown preset '{key}'")))?;
    for input in preset.inputs {
        if inputs.get(input.id).is_none_or(|v| v.is_empty()) {
            return Err(Error::validation(format!("missing required input: {}", input.label)));
        }
    }

    let fill = |s: &str| fill_inputs(s, inputs);
    Ok(ServerSpec {
        id: options.id.unwrap_or_else(|| preset.key.to_string()),
        name: options.name.unwrap_or_else(|| preset.name.to_string()),
        description: options.description.unwrap_or_else(|| preset.description.to_string()),
        agent: options.agent,
        transport: preset.transport,
        command: preset.command.map(str::to_string),
        args: preset.args.iter().map(|a| fill(*a)).collect(),
        env: preset.env.iter().map(|(k, v)| (k.to_string(), fill(*v))).collect(),
        url: preset.url.map(str::to_string),
        headers: preset.headers.iter().map(|(k, v)| (k.to_string(), fill(*v))).collect(),
        preset: Some(preset.key.to_string()),
        enabled: true,
    })
}

fn fill_inputs(template: &str, inputs: &HashMap<String, String>) -> String {
    inputs.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("${{input:{key}}}"), value)
    })
}
