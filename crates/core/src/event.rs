//! Domain event system: decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in the system.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The model produced a reply
    ResponseGenerated {
        run_id: String,
        model: String,
        provider: String,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The knowledge base was searched
    RetrievalPerformed {
        query: String,
        returned: usize,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An external tool session completed its handshake
    SessionConnected {
        session_id: String,
        server_name: String,
        timestamp: DateTime<Utc>,
    },

    /// An external tool session went away
    SessionDisconnected {
        session_id: String,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An external tool session's catalog was reconciled
    SessionSynced {
        session_id: String,
        inserted: usize,
        updated: usize,
        deleted: usize,
        timestamp: DateTime<Utc>,
    },

    /// A run ended
    RunFinished {
        run_id: String,
        iterations: u32,
        success: bool,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
/// Clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
