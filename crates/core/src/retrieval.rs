//! Retriever trait: knowledge-base search behind the retrieval tool.
//!
//! Vector storage and embeddings live behind this seam; the engine only
//! asks for the top-k chunks for a query.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ToolError;

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// The passage text
    pub content: String,

    /// Where it came from (document title, URL, file name)
    pub source: String,
}

/// Search a knowledge base for passages relevant to a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return at most `k` chunks from `knowledge_base_id`, best first.
    async fn search(
        &self,
        knowledge_base_id: &str,
        query: &str,
        k: usize,
    ) -> std::result::Result<Vec<RetrievedChunk>, ToolError>;
}
