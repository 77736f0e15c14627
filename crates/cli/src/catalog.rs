//! The agent catalog file: one agent profile plus the tools, external
//! servers and knowledge documents it uses.
//!
//! ```toml
//! [agent]
//! id = "support"
//! name = "Support"
//! role = "a support agent"
//!
//! [[tool]]
//! name = "get_user"
//! kind = "web"
//! payload = "curl https://api.example.com/users?id={id}"
//!
//! [[server]]
//! id = "wiki"
//! name = "DeepWiki"
//! transport = "sse"
//! url = "https://mcp.deepwiki.com/sse"
//!
//! [[document]]
//! content = "Refunds are processed within 5 days."
//! source = "faq.md"
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use switchyard_core::agent::AgentProfile;
use switchyard_core::tool::ToolDescriptor;
use switchyard_mcp::ServerSpec;

/// Knowledge base used when the agent binds none but documents are given.
pub const DEFAULT_KNOWLEDGE_BASE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub agent: AgentProfile,

    /// Include `current_datetime` and `calculate`
    #[serde(default = "default_true")]
    pub builtins: bool,

    #[serde(default, rename = "tool", skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,

    #[serde(default, rename = "server", skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerSpec>,

    #[serde(default, rename = "document", skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<KnowledgeDocument>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub content: String,
    #[serde(default)]
    pub source: String,
}

impl CatalogFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid catalog {}", path.display()))
    }

    /// Parse and normalize: agent id defaults to its name, servers without
    /// an owner belong to the agent, and documents imply a knowledge base.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut catalog: Self = toml::from_str(text)?;
        if catalog.agent.id.is_empty() {
            catalog.agent.id = catalog.agent.name.clone();
        }
        for server in &mut catalog.servers {
            if server.agent.is_empty() {
                server.agent = catalog.agent.id.clone();
            }
        }
        if !catalog.documents.is_empty() && catalog.agent.knowledge_base.is_none() {
            catalog.agent.knowledge_base = Some(DEFAULT_KNOWLEDGE_BASE.into());
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use switchyard_core::tool::ToolKind;
    use switchyard_mcp::TransportKind;

    const SAMPLE: &str = r#"
[agent]
name = "support"
role = "a support agent"
temperature = "0.3"

[[tool]]
name = "get_user"
kind = "web"
payload = "curl https://api.example.com/users?id={id}"

[tool.parameters.id]
type = "integer"
description = "User id"
required = true

[[server]]
id = "wiki"
name = "DeepWiki"
transport = "sse"
url = "https://mcp.deepwiki.com/sse"

[[document]]
content = "Refunds are processed within 5 days."
source = "faq.md"
"#;

    #[test]
    fn sample_catalog_parses_and_normalizes() {
        let catalog = CatalogFile::parse(SAMPLE).unwrap();
        assert_eq!(catalog.agent.id, "support");
        assert_eq!(catalog.agent.temperature.as_deref(), Some("0.3"));
        assert!(catalog.builtins);
        assert_eq!(catalog.tools[0].kind, ToolKind::Web);
        assert!(catalog.tools[0].parameters["id"].required);
        assert_eq!(catalog.servers[0].transport, TransportKind::Sse);
        assert_eq!(catalog.servers[0].agent, "support");
        assert_eq!(catalog.agent.knowledge_base.as_deref(), Some(DEFAULT_KNOWLEDGE_BASE));
    }

    #[test]
    fn load_reports_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent]").unwrap();
        let err = CatalogFile::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("invalid catalog"));
    }
}
