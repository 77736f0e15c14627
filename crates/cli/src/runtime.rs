//! Wires config and a catalog file into a ready orchestrator.

use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use switchyard_agent::{ConversationOrchestrator, IntentClassifier};
use switchyard_config::AppConfig;
use switchyard_core::delivery::{Messenger, OutboundPayload};
use switchyard_core::error::DeliveryError;
use switchyard_core::event::{DomainEvent, EventBus};
use switchyard_core::provider::Provider;
use switchyard_mcp::SessionManager;
use switchyard_providers::LlmGateway;
use switchyard_tools::{InMemoryRetriever, ToolExecutor, builtins, load_registry};
use tracing::{debug, warn};

use crate::catalog::{CatalogFile, DEFAULT_KNOWLEDGE_BASE};

/// Chat target used for user-routed tool output in the terminal.
pub const CONSOLE_TARGET: &str = "console";

pub struct Runtime {
    pub config: AppConfig,
    pub provider: Arc<dyn Provider>,
    pub sessions: Arc<SessionManager>,
    pub orchestrator: ConversationOrchestrator,
}

impl Runtime {
    pub fn build(config: AppConfig, catalog: CatalogFile) -> anyhow::Result<Self> {
        let bus = EventBus::new(256);
        spawn_event_logger(&bus);

        let mut descriptors = catalog.tools;
        if catalog.builtins {
            descriptors.extend(builtins::all());
        }
        let registry = load_registry(descriptors, config.orchestrator.max_tools_per_agent)
            .context("invalid tool catalog")?;
        let executor = ToolExecutor::new(Arc::new(registry), &config)?
            .with_messenger(Arc::new(ConsoleMessenger))
            .with_event_bus(bus.clone());

        let sessions = Arc::new(SessionManager::new(&config.mcp)?.with_event_bus(bus.clone()));

        let kb = catalog
            .agent
            .knowledge_base
            .clone()
            .unwrap_or_else(|| DEFAULT_KNOWLEDGE_BASE.into());
        let mut retriever = InMemoryRetriever::new();
        for doc in &catalog.documents {
            retriever.add(&kb, doc.content.clone(), doc.source.clone());
        }

        let provider: Arc<dyn Provider> = Arc::new(LlmGateway::from_config(&config.gateway)?);
        let orchestrator = ConversationOrchestrator::new(catalog.agent, provider.clone(), Arc::new(executor), &config)
            .with_sessions(sessions.clone())
            .with_retriever(Arc::new(retriever))
            .with_event_bus(bus);

        Ok(Self {
            config,
            provider,
            sessions,
            orchestrator,
        })
    }

    /// Register the catalog's servers.
    pub async fn register_servers(&self, servers: Vec<switchyard_mcp::ServerSpec>) -> anyhow::Result<()> {
        for server in servers {
            self.sessions.register(server).await?;
        }
        Ok(())
    }

    /// Connect every enabled server, logging failures.
    pub async fn connect_servers(&self) {
        for (id, result) in self.sessions.connect_all().await {
            if let Err(e) = result {
                warn!(session = %id, error = %e, "External server unavailable");
            }
        }
    }

    pub fn intent_classifier(&self) -> IntentClassifier {
        IntentClassifier::new(self.provider.clone())
    }
}

/// Load a runtime with its servers registered.
pub async fn open(config: AppConfig, catalog_path: &Path) -> anyhow::Result<Runtime> {
    let catalog = CatalogFile::load(catalog_path)?;
    let servers = catalog.servers.clone();
    let runtime = Runtime::build(config, catalog)?;
    runtime.register_servers(servers).await?;
    Ok(runtime)
}

fn spawn_event_logger(bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match &*event {
                DomainEvent::SessionConnected { session_id, server_name, .. } => {
                    debug!(session = %session_id, server = %server_name, "event: session connected")
                }
                DomainEvent::SessionSynced {
                    session_id,
                    inserted,
                    updated,
                    deleted,
                    ..
                } => debug!(session = %session_id, inserted, updated, deleted, "event: session synced"),
                other => debug!(event = ?other, "event"),
            }
        }
    });
}

/// Prints user-routed tool output to the terminal.
pub struct ConsoleMessenger;

#[async_trait]
impl Messenger for ConsoleMessenger {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, target: &str, payload: OutboundPayload) -> Result<(), DeliveryError> {
        match &payload {
            OutboundPayload::Text { body } => println!("  [{target}] {body}"),
            OutboundPayload::Image { mime_type, caption, .. }
            | OutboundPayload::Video { mime_type, caption, .. } => println!(
                "  [{target}] {} ({mime_type}, {} bytes){}",
                payload.kind(),
                payload.len(),
                caption.as_deref().map(|c| format!(": {c}")).unwrap_or_default()
            ),
            OutboundPayload::Audio { mime_type, voice_note, .. } => println!(
                "  [{target}] {} ({mime_type}, {} bytes, voice note: {voice_note})",
                payload.kind(),
                payload.len()
            ),
            OutboundPayload::Document { filename, mime_type, .. } => println!(
                "  [{target}] document {filename} ({mime_type}, {} bytes)",
                payload.len()
            ),
        }
        Ok(())
    }
}
