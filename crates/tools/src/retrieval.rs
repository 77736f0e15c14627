//! Knowledge-base retrieval exposed as a tool.
//!
//! When an agent has a knowledge base bound, the catalog gains a synthetic
//! `search_knowledge_base` tool backed by a [`Retriever`]. Each query is
//! timed and recorded so the run trace can report it.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use switchyard_core::error::ToolError;
use switchyard_core::event::{DomainEvent, EventBus};
use switchyard_core::retrieval::{RetrievedChunk, Retriever};
use switchyard_core::tool::NativeTool;
use switchyard_core::trace::RetrievalStats;
use tracing::{debug, info};

pub const SEARCH_KNOWLEDGE_BASE: &str = "search_knowledge_base";

const DEFAULT_MAX_RESULTS: usize = 3;
const MAX_RESULTS_CAP: usize = 10;

pub struct SearchKnowledgeBaseTool {
    retriever: Arc<dyn Retriever>,
    knowledge_base_id: String,
    event_bus: Option<EventBus>,
    stats: Mutex<Vec<RetrievalStats>>,
}

impl SearchKnowledgeBaseTool {
    pub fn new(retriever: Arc<dyn Retriever>, knowledge_base_id: impl Into<String>) -> Self {
        Self {
            retriever,
            knowledge_base_id: knowledge_base_id.into(),
            event_bus: None,
            stats: Mutex::new(Vec::new()),
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Take the stats recorded since the last call.
    pub fn drain_stats(&self) -> Vec<RetrievalStats> {
        self.stats
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }

    fn record(&self, stats: RetrievalStats) {
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::RetrievalPerformed {
                query: stats.query.clone(),
                returned: stats.returned,
                latency_ms: stats.latency_ms,
                timestamp: chrono::Utc::now(),
            });
        }
        if let Ok(mut all) = self.stats.lock() {
            all.push(stats);
        }
    }
}

#[async_trait]
impl NativeTool for SearchKnowledgeBaseTool {
    fn name(&self) -> &str {
        SEARCH_KNOWLEDGE_BASE
    }

    fn description(&self) -> &str {
        "Search the knowledge base for passages relevant to a question. \
         Use it before answering questions about the documented domain."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of passages to return (default 3)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let requested = arguments["max_results"]
            .as_u64()
            .map_or(DEFAULT_MAX_RESULTS, |n| n as usize)
            .clamp(1, MAX_RESULTS_CAP);

        let started = Instant::now();
        let chunks = self
            .retriever
            .search(&self.knowledge_base_id, query, requested)
            .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        info!(
            knowledge_base = %self.knowledge_base_id,
            requested,
            returned = chunks.len(),
            latency_ms,
            "Knowledge base searched"
        );
        self.record(RetrievalStats {
            query: query.to_string(),
            requested,
            returned: chunks.len(),
            latency_ms,
        });

        Ok(json!({
            "success": true,
            "query": query,
            "total_results": chunks.len(),
            "contexts": chunks,
        }))
    }
}

/// Keyword-overlap retriever over documents held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRetriever {
    bases: HashMap<String, Vec<RetrievedChunk>>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, knowledge_base_id: &str, content: impl Into<String>, source: impl Into<String>) {
        self.bases
            .entry(knowledge_base_id.to_string())
            .or_default()
            .push(RetrievedChunk {
                content: content.into(),
                source: source.into(),
            });
    }

    pub fn with_document(mut self, knowledge_base_id: &str, content: &str, source: &str) -> Self {
        self.add(knowledge_base_id, content, source);
        self
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn search(
        &self,
        knowledge_base_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, ToolError> {
        let Some(chunks) = self.bases.get(knowledge_base_id) else {
            return Err(ToolError::Retrieval(format!(
                "unknown knowledge base '{knowledge_base_id}'"
            )));
        };
        let wanted = terms(query);
        let mut scored: Vec<(usize, &RetrievedChunk)> = chunks
            .iter()
            .map(|chunk| {
                let have = terms(&chunk.content);
                (wanted.iter().filter(|w| have.contains(w)).count(), chunk)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        debug!(knowledge_base = knowledge_base_id, candidates = scored.len(), "Keyword match");
        Ok(scored.into_iter().take(k).map(|(_, c)| c.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retriever() -> Arc<InMemoryRetriever> {
        Arc::new(
            InMemoryRetriever::new()
                .with_document("kb1", "Refunds are processed within 5 business days.", "policy.md")
                .with_document("kb1", "Shipping is free for orders over 50 euros.", "shipping.md")
                .with_document("kb1", "Refunds for digital goods are not available.", "policy.md"),
        )
    }

    #[tokio::test]
    async fn search_returns_contexts_and_records_stats() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let tool = SearchKnowledgeBaseTool::new(retriever(), "kb1").with_event_bus(bus);

        let out = tool
            .execute(json!({"query": "how long do refunds take", "max_results": 1}))
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["total_results"], 1);
        assert_eq!(out["contexts"][0]["source"], "policy.md");

        let stats = tool.drain_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].requested, 1);
        assert_eq!(stats[0].returned, 1);
        assert!(tool.drain_stats().is_empty());

        let event = events.recv().await.unwrap();
        assert!(matches!(&*event, DomainEvent::RetrievalPerformed { returned: 1, .. }));
    }

    #[tokio::test]
    async fn default_limit_is_three() {
        let tool = SearchKnowledgeBaseTool::new(retriever(), "kb1");
        let out = tool.execute(json!({"query": "refunds shipping orders"})).await.unwrap();
        assert_eq!(out["total_results"], 3);
        assert_eq!(tool.drain_stats()[0].requested, 3);
    }

    #[tokio::test]
    async fn missing_query_is_invalid() {
        let tool = SearchKnowledgeBaseTool::new(retriever(), "kb1");
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn unknown_base_is_retrieval_error() {
        let tool = SearchKnowledgeBaseTool::new(retriever(), "nope");
        let err = tool.execute(json!({"query": "refunds"})).await.unwrap_err();
        assert!(matches!(err, ToolError::Retrieval(_)));
    }
}
