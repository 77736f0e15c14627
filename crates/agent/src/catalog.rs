//! The model-visible tool catalog for one run.

use std::collections::HashSet;
use switchyard_core::error::{Error, Result};
use switchyard_core::provider::ToolDefinition;
use switchyard_core::tool::NativeTool;
use switchyard_mcp::SessionManager;
use switchyard_tools::{SearchKnowledgeBaseTool, ToolExecutor};
use tracing::debug;

/// Principal descriptors, then external session tools, then retrieval.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    definitions: Vec<ToolDefinition>,
}

impl ToolCatalog {
    /// Compose the catalog. Names must be unique across every source.
    pub async fn assemble(
        executor: &ToolExecutor,
        sessions: Option<&SessionManager>,
        agent_id: &str,
        retrieval: Option<&SearchKnowledgeBaseTool>,
    ) -> Result<Self> {
        let mut definitions = executor.definitions()?;
        let local = definitions.len();

        if let Some(sessions) = sessions {
            definitions.extend(sessions.definitions(Some(agent_id)).await);
        }
        let external = definitions.len() - local;

        if let Some(tool) = retrieval {
            definitions.push(tool.to_definition());
        }

        let mut seen = HashSet::new();
        for def in &definitions {
            if !seen.insert(def.name.as_str()) {
                return Err(Error::validation(format!("tool name '{}' is declared twice", def.name)));
            }
        }

        debug!(local, external, retrieval = retrieval.is_some(), "Tool catalog assembled");
        Ok(Self { definitions })
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
