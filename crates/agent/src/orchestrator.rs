//! ConversationOrchestrator: the bounded model/tool loop.
//!
//! One run is a small state machine driven by an iteration counter:
//!
//! 1. **Assemble** the system prompt, history window and current turn
//! 2. **Call** the model with the full transcript and tool catalog
//! 3. **Dispatch** every requested tool call concurrently and append one
//!    tool-result message per call, in call order
//! 4. **Repeat** until the model answers without tool calls or the ceiling
//!    is reached
//!
//! A run never returns a raw error. Its [`RunReport`] always carries the
//! trace; the outcome is either the final answer or a typed [`RunFailure`].

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use switchyard_config::{AppConfig, GenerationConfig};
use switchyard_core::agent::{AgentProfile, ConversationContext};
use switchyard_core::error::{ProviderError, ToolError};
use switchyard_core::event::{DomainEvent, EventBus};
use switchyard_core::message::{Message, MessageToolCall};
use switchyard_core::provider::{Provider, ProviderRequest, ProviderResponse};
use switchyard_core::retrieval::Retriever;
use switchyard_core::tool::{NativeTool, ToolOutcome};
use switchyard_core::trace::{ExecutionTrace, RunFailure, RunReport, ToolCallRecord};
use switchyard_mcp::SessionManager;
use switchyard_tools::{SEARCH_KNOWLEDGE_BASE, SearchKnowledgeBaseTool, ToolExecutor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::ToolCatalog;
use crate::prompt::{GenerationParams, build_messages};

pub struct ConversationOrchestrator {
    profile: AgentProfile,
    provider: Arc<dyn Provider>,
    executor: Arc<ToolExecutor>,
    sessions: Option<Arc<SessionManager>>,
    retriever: Option<Arc<dyn Retriever>>,
    generation: GenerationConfig,
    max_iterations: u32,
    history_window: usize,
    event_bus: Option<EventBus>,
}

impl ConversationOrchestrator {
    pub fn new(
        profile: AgentProfile,
        provider: Arc<dyn Provider>,
        executor: Arc<ToolExecutor>,
        config: &AppConfig,
    ) -> Self {
        Self {
            profile,
            provider,
            executor,
            sessions: None,
            retriever: None,
            generation: config.generation.clone(),
            max_iterations: config.orchestrator.max_iterations,
            history_window: config.orchestrator.history_window,
            event_bus: None,
        }
    }

    /// Offer the agent's external session tools.
    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Back the retrieval tool. Only used when the profile binds a knowledge base.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// The catalog a run would offer right now.
    pub async fn catalog(&self) -> switchyard_core::Result<ToolCatalog> {
        let retrieval = self.retrieval_tool();
        ToolCatalog::assemble(
            &self.executor,
            self.sessions.as_deref(),
            &self.profile.id,
            retrieval.as_deref(),
        )
        .await
    }

    pub async fn run(&self, context: &ConversationContext) -> RunReport {
        self.run_with_cancel(context, CancellationToken::new()).await
    }

    /// Run to a final answer, or until `cancel` fires.
    pub async fn run_with_cancel(&self, context: &ConversationContext, cancel: CancellationToken) -> RunReport {
        let started = Instant::now();
        let params = GenerationParams::resolve(&self.profile, &self.generation);
        let mut run = Run {
            trace: ExecutionTrace::new(Uuid::new_v4().to_string(), &params.model),
            retrieval: self.retrieval_tool(),
        };
        info!(
            run_id = %run.trace.run_id,
            agent = %self.profile.name,
            model = %params.model,
            "Run started"
        );

        let outcome = self.drive(&mut run, &params, context, &cancel).await;
        self.finish(run, outcome, started)
    }

    async fn drive(
        &self,
        run: &mut Run,
        params: &GenerationParams,
        context: &ConversationContext,
        cancel: &CancellationToken,
    ) -> Result<String, RunFailure> {
        let catalog = ToolCatalog::assemble(
            &self.executor,
            self.sessions.as_deref(),
            &self.profile.id,
            run.retrieval.as_deref(),
        )
        .await
        .map_err(|e| RunFailure::Catalog { detail: e.to_string() })?;

        let mut messages = build_messages(&self.profile, context, self.history_window);
        let mut partial: Option<String> = None;

        for iteration in 1..=self.max_iterations {
            run.trace.iterations = iteration;
            debug!(run_id = %run.trace.run_id, iteration, messages = messages.len(), "Loop iteration");

            let request = ProviderRequest {
                model: params.model.clone(),
                messages: messages.clone(),
                temperature: params.temperature,
                max_tokens: Some(params.max_tokens),
                top_p: Some(params.top_p),
                tools: catalog.definitions().to_vec(),
                stream: false,
            };
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunFailure::Cancelled),
                response = self.provider.complete(request) => response,
            };
            let response = response.map_err(gateway_failure)?;
            self.record_response(run, &response, iteration);

            if !response.content().trim().is_empty() {
                partial = Some(response.content().to_string());
            }
            if !response.has_tool_calls() {
                info!(run_id = %run.trace.run_id, iteration, "Final answer produced");
                return Ok(response.message.content);
            }

            let calls = response.message.tool_calls.clone();
            messages.push(response.message);
            debug!(run_id = %run.trace.run_id, count = calls.len(), "Dispatching tool calls");

            let batch = join_all(
                calls
                    .iter()
                    .map(|call| self.dispatch(call, context.reply_target.as_deref(), run.retrieval.as_deref())),
            );
            let outcomes = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunFailure::Cancelled),
                outcomes = batch => outcomes,
            };

            for (call, (outcome, duration_ms)) in calls.iter().zip(outcomes) {
                run.trace.tool_calls.push(ToolCallRecord {
                    iteration,
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.parsed_arguments(),
                    success: !outcome.is_error(),
                    policy: outcome.routing.policy,
                    delivered_to_user: outcome.routing.delivered,
                    delivery_error: outcome.routing.delivery_error.clone(),
                    duration_ms,
                });
                messages.push(Message::tool_result(call.id.as_str(), outcome.transcript_content()));
            }
        }

        warn!(
            run_id = %run.trace.run_id,
            iterations = self.max_iterations,
            "Iteration ceiling reached without a final answer"
        );
        Err(RunFailure::IterationCeiling {
            iterations: self.max_iterations,
            partial,
        })
    }

    /// Route one call to retrieval, a local tool, or an external session.
    async fn dispatch(
        &self,
        call: &MessageToolCall,
        reply_target: Option<&str>,
        retrieval: Option<&SearchKnowledgeBaseTool>,
    ) -> (ToolOutcome, u64) {
        let started = Instant::now();
        let arguments = call.parsed_arguments();

        let outcome = match retrieval {
            Some(tool) if call.name == SEARCH_KNOWLEDGE_BASE => match tool.execute(arguments).await {
                Ok(result) => ToolOutcome::for_model(result),
                Err(e) => ToolOutcome::failure(&e),
            },
            _ if self.executor.knows(&call.name) => self.executor.execute(&call.name, arguments, reply_target).await,
            _ => match &self.sessions {
                Some(sessions) if sessions.owns(&call.name).await => sessions.execute(&call.name, arguments).await,
                _ => {
                    warn!(tool = %call.name, "Model requested an unknown tool");
                    ToolOutcome::failure(&ToolError::NotFound(call.name.clone()))
                }
            },
        };
        (outcome, started.elapsed().as_millis() as u64)
    }

    fn retrieval_tool(&self) -> Option<Arc<SearchKnowledgeBaseTool>> {
        let knowledge_base = self.profile.knowledge_base.as_deref()?;
        let retriever = self.retriever.clone()?;
        let mut tool = SearchKnowledgeBaseTool::new(retriever, knowledge_base);
        if let Some(bus) = &self.event_bus {
            tool = tool.with_event_bus(bus.clone());
        }
        Some(Arc::new(tool))
    }

    fn record_response(&self, run: &mut Run, response: &ProviderResponse, iteration: u32) {
        run.trace.add_usage(&response.usage);
        run.trace.provider_used = response.provider_used.clone();
        if let Some(fallback) = &response.fallback_error {
            warn!(run_id = %run.trace.run_id, error = %fallback, "Answered by fallback backend");
        }
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ResponseGenerated {
                run_id: run.trace.run_id.clone(),
                model: response.model.clone(),
                provider: response.provider_used.clone(),
                iteration,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    fn finish(&self, mut run: Run, outcome: Result<String, RunFailure>, started: Instant) -> RunReport {
        if let Some(tool) = &run.retrieval {
            run.trace.retrievals = tool.drain_stats();
        }
        run.trace.elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => info!(
                run_id = %run.trace.run_id,
                iterations = run.trace.iterations,
                tool_calls = run.trace.tool_calls.len(),
                elapsed_ms = run.trace.elapsed_ms,
                "Run finished"
            ),
            Err(failure) => warn!(
                run_id = %run.trace.run_id,
                iterations = run.trace.iterations,
                elapsed_ms = run.trace.elapsed_ms,
                error = %failure,
                "Run failed"
            ),
        }
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::RunFinished {
                run_id: run.trace.run_id.clone(),
                iterations: run.trace.iterations,
                success: outcome.is_ok(),
                elapsed_ms: run.trace.elapsed_ms,
                timestamp: chrono::Utc::now(),
            });
        }
        RunReport {
            outcome,
            trace: run.trace,
        }
    }
}

/// Per-run mutable state.
struct Run {
    trace: ExecutionTrace,
    retrieval: Option<Arc<SearchKnowledgeBaseTool>>,
}

fn gateway_failure(error: ProviderError) -> RunFailure {
    match error {
        ProviderError::Timeout(detail) => RunFailure::GatewayTimeout { detail },
        other if other.is_timeout() => RunFailure::GatewayTimeout {
            detail: other.to_string(),
        },
        other => RunFailure::Gateway {
            detail: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use switchyard_core::provider::Usage;
    use switchyard_core::tool::{DeliveryChannel, OutputPolicy, ToolDescriptor, ToolKind};
    use switchyard_tools::{InMemoryRetriever, builtins, load_registry};

    /// Returns scripted responses in order, then repeats the last one.
    struct ScriptedProvider {
        responses: Vec<ProviderResponse>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ProviderResponse>) -> Self {
            Self {
                responses,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let mut requests = self.requests.lock().unwrap();
            let index = requests.len().min(self.responses.len() - 1);
            requests.push(request);
            Ok(self.responses[index].clone())
        }
    }

    struct FailingProvider(ProviderError);

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(self.0.clone())
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            std::future::pending().await
        }
    }

    fn text(content: &str) -> ProviderResponse {
        ProviderResponse {
            message: Message::assistant(content),
            usage: Usage {
                input_tokens: Some(10),
                output_tokens: Some(5),
            },
            model: "mock-model".into(),
            finish_reason: Some("stop".into()),
            provider_used: "aggregator".into(),
            fallback_error: None,
        }
    }

    fn calls(content: &str, calls: &[(&str, &str, serde_json::Value)]) -> ProviderResponse {
        let mut response = text(content);
        response.finish_reason = Some("tool_calls".into());
        response.message.tool_calls = calls
            .iter()
            .map(|(id, name, args)| MessageToolCall {
                id: (*id).into(),
                name: (*name).into(),
                arguments: args.to_string(),
            })
            .collect();
        response
    }

    fn code(name: &str, body: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, ToolKind::Code, body)
    }

    fn orchestrator(provider: Arc<dyn Provider>, descriptors: Vec<ToolDescriptor>) -> ConversationOrchestrator {
        let config = AppConfig::default();
        let registry = load_registry(descriptors, 20).unwrap();
        let executor = ToolExecutor::new(Arc::new(registry), &config).unwrap();
        let profile = AgentProfile {
            id: "agent-1".into(),
            name: "support".into(),
            role: "a helpful agent".into(),
            ..AgentProfile::default()
        };
        ConversationOrchestrator::new(profile, provider, Arc::new(executor), &config)
    }

    #[tokio::test]
    async fn plain_answer_ends_the_run() {
        let provider = Arc::new(ScriptedProvider::new(vec![text("Hello!")]));
        let orch = orchestrator(provider.clone(), Vec::new());

        let report = orch.run(&ConversationContext::new("hi")).await;
        assert_eq!(report.answer(), Some("Hello!"));
        assert_eq!(report.trace.iterations, 1);
        assert_eq!(report.trace.input_tokens, Some(10));
        assert_eq!(report.trace.provider_used, "aggregator");

        let request = &provider.requests()[0];
        assert_eq!(request.model, crate::prompt::FALLBACK_MODEL);
        assert_eq!(request.max_tokens, Some(2000));
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[0].content.starts_with("You are: a helpful agent."));
    }

    #[tokio::test]
    async fn calculate_round_trip_answers_four() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            calls("", &[("c1", "calculate", json!({"expression": "2+2"}))]),
            text("2+2 = 4"),
        ]));
        let orch = orchestrator(provider.clone(), builtins::all());

        let report = orch.run(&ConversationContext::new("2+2")).await;
        assert!(report.answer().unwrap().contains('4'));
        assert_eq!(report.trace.iterations, 2);
        assert!(report.trace.tool_calls[0].success);

        let second = &provider.requests()[1];
        let tool_message = second.messages.last().unwrap();
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
        assert!(tool_message.content.contains("\"result\":4"), "{}", tool_message.content);
    }

    #[tokio::test]
    async fn every_call_gets_one_result_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            calls(
                "",
                &[
                    ("a", "slow", json!({})),
                    ("b", "fast", json!({})),
                    ("c", "missing_tool", json!({})),
                ],
            ),
            text("done"),
        ]));
        let orch = orchestrator(
            provider.clone(),
            vec![
                code("slow", "local n = 0 for i = 1, 20000 do n = n + i end result = 'slow'"),
                code("fast", "result = 'fast'"),
            ],
        );

        let report = orch.run(&ConversationContext::new("go")).await;
        assert_eq!(report.answer(), Some("done"));

        let second = &provider.requests()[1];
        let results: Vec<_> = second.messages.iter().rev().take(3).rev().collect();
        let ids: Vec<_> = results.iter().map(|m| m.tool_call_id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results[0].content.contains("slow"));
        assert!(results[1].content.contains("fast"));
        assert!(results[2].content.contains("Tool not found: missing_tool"));
        assert!(!report.trace.tool_calls[2].success);
    }

    #[tokio::test]
    async fn chained_tools_resolve_to_the_tail() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            calls("", &[("c1", "lookup", json!({"id": "7"}))]),
            text("ok"),
        ]));
        let orch = orchestrator(
            provider.clone(),
            vec![
                code("lookup", "result = { user = arguments.id }").with_next_tool("format"),
                code("format", "result = 'user #' .. arguments.result.user"),
            ],
        );

        let report = orch.run(&ConversationContext::new("who is 7")).await;
        assert!(report.is_success());
        assert_eq!(report.trace.tool_calls.len(), 1);
        let tool_message = provider.requests()[1].messages.last().unwrap().clone();
        assert_eq!(tool_message.content, "\"user #7\"");
    }

    #[tokio::test]
    async fn user_routed_output_leaves_a_stub() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            calls("", &[("c1", "card", json!({}))]),
            text("sent"),
        ]));
        let orch = orchestrator(
            provider.clone(),
            vec![code("card", "result = 'your card'").with_output(OutputPolicy::User, DeliveryChannel::Text)],
        );

        let report = orch.run(&ConversationContext::new("send it")).await;
        assert!(report.is_success());
        let stub = provider.requests()[1].messages.last().unwrap().content.clone();
        assert!(stub.contains("delivered_to_user"));
        assert_eq!(report.trace.tool_calls[0].policy, OutputPolicy::User);
    }

    #[tokio::test]
    async fn ceiling_stops_an_endless_tool_loop() {
        let provider = Arc::new(ScriptedProvider::new(vec![calls(
            "still thinking",
            &[("c", "noop", json!({}))],
        )]));
        let orch = orchestrator(provider.clone(), vec![code("noop", "result = 1")]).with_max_iterations(3);

        let report = orch.run(&ConversationContext::new("loop")).await;
        assert_eq!(
            report.outcome,
            Err(RunFailure::IterationCeiling {
                iterations: 3,
                partial: Some("still thinking".into()),
            })
        );
        assert_eq!(provider.requests().len(), 3);
        assert_eq!(report.trace.tool_calls.len(), 3);
    }

    #[tokio::test]
    async fn gateway_timeout_is_typed_and_timed() {
        let orch = orchestrator(
            Arc::new(FailingProvider(ProviderError::Timeout("no answer within 60s".into()))),
            Vec::new(),
        );
        let report = orch.run(&ConversationContext::new("hi")).await;
        assert!(matches!(report.outcome, Err(RunFailure::GatewayTimeout { .. })));
        assert_eq!(report.trace.iterations, 1);

        let orch = orchestrator(
            Arc::new(FailingProvider(ProviderError::NotConfigured("aggregator API key is not set".into()))),
            Vec::new(),
        );
        let report = orch.run(&ConversationContext::new("hi")).await;
        match report.outcome {
            Err(RunFailure::Gateway { detail }) => assert!(detail.contains("API key")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn double_timeout_across_fallback_is_still_a_timeout() {
        let both_timed_out = ProviderError::FallbackExhausted {
            primary: Box::new(ProviderError::Timeout("local after 60s".into())),
            fallback: Box::new(ProviderError::Timeout("aggregator after 60s".into())),
        };
        let report = orchestrator(Arc::new(FailingProvider(both_timed_out)), Vec::new())
            .run(&ConversationContext::new("hi"))
            .await;
        match report.outcome {
            Err(RunFailure::GatewayTimeout { detail }) => assert!(detail.contains("aggregator after 60s")),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let mixed = ProviderError::FallbackExhausted {
            primary: Box::new(ProviderError::Timeout("local after 60s".into())),
            fallback: Box::new(ProviderError::Network("connection refused".into())),
        };
        let report = orchestrator(Arc::new(FailingProvider(mixed)), Vec::new())
            .run(&ConversationContext::new("hi"))
            .await;
        assert!(matches!(report.outcome, Err(RunFailure::Gateway { .. })));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_model_call() {
        let orch = orchestrator(Arc::new(HangingProvider), Vec::new());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let report = orch.run_with_cancel(&ConversationContext::new("hi"), cancel).await;
        assert_eq!(report.outcome, Err(RunFailure::Cancelled));
    }

    #[tokio::test]
    async fn retrieval_stats_land_on_the_trace() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            calls("", &[("r1", "search_knowledge_base", json!({"query": "refunds processed"}))]),
            text("Refunds take 5 days."),
        ]));
        let retriever = InMemoryRetriever::new().with_document("kb", "Refunds are processed within 5 days.", "faq.md");
        let mut orch = orchestrator(provider.clone(), Vec::new()).with_retriever(Arc::new(retriever));
        orch.profile.knowledge_base = Some("kb".into());

        let report = orch.run(&ConversationContext::new("refunds?")).await;
        assert!(report.is_success());
        assert_eq!(report.trace.retrievals.len(), 1);
        assert_eq!(report.trace.retrievals[0].query, "refunds processed");
        assert_eq!(report.trace.retrievals[0].returned, 1);

        let names: Vec<_> = provider.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["search_knowledge_base"]);
    }

    #[tokio::test]
    async fn run_events_are_published() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let orch = orchestrator(Arc::new(ScriptedProvider::new(vec![text("hi")])), Vec::new()).with_event_bus(bus);

        orch.run(&ConversationContext::new("hello")).await;
        assert!(matches!(*rx.recv().await.unwrap(), DomainEvent::ResponseGenerated { iteration: 1, .. }));
        assert!(matches!(
            *rx.recv().await.unwrap(),
            DomainEvent::RunFinished { success: true, .. }
        ));
    }
}
