//! Per-run execution record and terminal failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::provider::Usage;
use crate::tool::OutputPolicy;

/// One dispatched tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub iteration: u32,
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub success: bool,
    pub policy: OutputPolicy,
    pub delivered_to_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<String>,
    pub duration_ms: u64,
}

/// One knowledge-base query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub query: String,
    pub requested: usize,
    pub returned: usize,
    pub latency_ms: u64,
}

/// Everything observable about one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// Model calls issued
    pub iterations: u32,
    pub model: String,
    /// Backend that answered the last model call
    #[serde(default)]
    pub provider_used: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub retrievals: Vec<RetrievalStats>,
    /// Summed over every model call; `None` if no backend reported a count
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub elapsed_ms: u64,
}

impl ExecutionTrace {
    pub fn new(run_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            iterations: 0,
            model: model.into(),
            provider_used: String::new(),
            tool_calls: Vec::new(),
            retrievals: Vec::new(),
            input_tokens: None,
            output_tokens: None,
            elapsed_ms: 0,
        }
    }

    /// Fold one response's usage into the totals.
    pub fn add_usage(&mut self, usage: &Usage) {
        fn add(total: &mut Option<u64>, part: Option<u32>) {
            if let Some(part) = part {
                *total = Some(total.unwrap_or(0) + u64::from(part));
            }
        }
        add(&mut self.input_tokens, usage.input_tokens);
        add(&mut self.output_tokens, usage.output_tokens);
    }

    pub fn total_tokens(&self) -> Option<u64> {
        match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
        }
    }
}

/// Why a run ended without a final answer.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    #[error("The model did not answer in time: {detail}")]
    GatewayTimeout { detail: String },

    #[error("The model call failed: {detail}")]
    Gateway { detail: String },

    #[error("No final answer after {iterations} iterations")]
    IterationCeiling {
        iterations: u32,
        /// Last non-empty assistant text, if any
        partial: Option<String>,
    },

    #[error("The tool catalog could not be assembled: {detail}")]
    Catalog { detail: String },

    #[error("The run was cancelled")]
    Cancelled,
}

/// Final answer (or failure) plus the trace, which is always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: Result<String, RunFailure>,
    pub trace: ExecutionTrace,
}

impl RunReport {
    pub fn answer(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_totals_stay_null_until_reported() {
        let mut trace = ExecutionTrace::new("run", "m");
        trace.add_usage(&Usage::default());
        assert_eq!(trace.total_tokens(), None);

        trace.add_usage(&Usage {
            input_tokens: Some(10),
            output_tokens: Some(4),
        });
        trace.add_usage(&Usage {
            input_tokens: Some(20),
            output_tokens: None,
        });
        assert_eq!(trace.input_tokens, Some(30));
        assert_eq!(trace.output_tokens, Some(4));
        assert_eq!(trace.total_tokens(), Some(34));
    }

    #[test]
    fn ceiling_failure_is_legible() {
        let failure = RunFailure::IterationCeiling {
            iterations: 10,
            partial: Some("thinking".into()),
        };
        assert_eq!(failure.to_string(), "No final answer after 10 iterations");
    }
}
