//! Local record of the tools each external server exposes.
//!
//! After every sync the stored set for a session equals exactly what the
//! server reported: new tools are inserted, known ones updated, vanished
//! ones deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::protocol::RemoteTool;

/// A tool discovered on an external server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTool {
    pub session_id: String,
    pub name: String,
    /// The server's `title`, falling back to `name`
    pub display_name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub synced_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl ExternalTool {
    pub fn from_remote(session_id: &str, remote: RemoteTool, synced_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            display_name: remote
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| remote.name.clone()),
            name: remote.name,
            description: remote.description.unwrap_or_default(),
            input_schema: remote.input_schema,
            output_schema: remote.output_schema,
            active: true,
            synced_at,
        }
    }
}

/// Counts from one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncReport {
    /// Number of tools present after the sync.
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Persistence for discovered tools.
pub trait ExternalToolStore: Send + Sync {
    /// Tools currently recorded for `session_id`, ordered by name.
    fn tools(&self, session_id: &str) -> Vec<ExternalTool>;

    /// Replace the session's tool set with `reported`.
    fn reconcile(&self, session_id: &str, reported: Vec<ExternalTool>) -> SyncReport;

    /// Forget every tool of a deleted session.
    fn remove_session(&self, session_id: &str);
}

#[derive(Debug, Default)]
pub struct InMemoryToolStore {
    sessions: RwLock<HashMap<String, BTreeMap<String, ExternalTool>>>,
}

impl InMemoryToolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExternalToolStore for InMemoryToolStore {
    fn tools(&self, session_id: &str) -> Vec<ExternalTool> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(session_id)
            .map(|tools| tools.values().cloned().collect())
            .unwrap_or_default()
    }

    fn reconcile(&self, session_id: &str, reported: Vec<ExternalTool>) -> SyncReport {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let stored = sessions.entry(session_id.to_string()).or_default();
        let mut report = SyncReport::default();

        let mut incoming: BTreeMap<String, ExternalTool> = BTreeMap::new();
        for tool in reported {
            incoming.insert(tool.name.clone(), tool);
        }

        stored.retain(|name, _| {
            let keep = incoming.contains_key(name);
            if !keep {
                report.deleted += 1;
            }
            keep
        });
        for (name, mut tool) in incoming {
            match stored.get_mut(&name) {
                Some(existing) => {
                    // Local activation survives a refresh
                    tool.active = existing.active;
                    *existing = tool;
                    report.updated += 1;
                }
                None => {
                    stored.insert(name, tool);
                    report.inserted += 1;
                }
            }
        }
        report
    }

    fn remove_session(&self, session_id: &str) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> ExternalTool {
        ExternalTool::from_remote(
            "s1",
            serde_json::from_value(json!({"name": name, "description": description})).unwrap(),
            Utc::now(),
        )
    }

    fn names(store: &InMemoryToolStore) -> Vec<String> {
        store.tools("s1").into_iter().map(|t| t.name).collect()
    }

    #[test]
    fn poisoned_lock_keeps_serving_the_catalog() {
        let store = std::sync::Arc::new(InMemoryToolStore::new());
        store.reconcile("s1", vec![tool("a", "")]);

        let holder = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.sessions.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(store.sessions.is_poisoned());

        assert_eq!(names(&store), vec!["a"]);
        let report = store.reconcile("s1", vec![tool("a", ""), tool("b", "")]);
        assert_eq!(report, SyncReport { inserted: 1, updated: 1, deleted: 0 });
        store.remove_session("s1");
        assert!(store.tools("s1").is_empty());
    }

    #[test]
    fn first_sync_inserts() {
        let store = InMemoryToolStore::new();
        let report = store.reconcile("s1", vec![tool("b", ""), tool("a", "")]);
        assert_eq!(report, SyncReport { inserted: 2, updated: 0, deleted: 0 });
        assert_eq!(names(&store), vec!["a", "b"]);
    }

    #[test]
    fn resync_updates_in_place() {
        let store = InMemoryToolStore::new();
        store.reconcile("s1", vec![tool("a", "old")]);
        let report = store.reconcile("s1", vec![tool("a", "new")]);
        assert_eq!(report, SyncReport { inserted: 0, updated: 1, deleted: 0 });
        assert_eq!(store.tools("s1")[0].description, "new");
    }

    #[test]
    fn vanished_tools_are_deleted() {
        let store = InMemoryToolStore::new();
        store.reconcile("s1", vec![tool("a", ""), tool("b", "")]);
        let report = store.reconcile("s1", vec![tool("b", "")]);
        assert_eq!(report, SyncReport { inserted: 0, updated: 1, deleted: 1 });
        assert_eq!(names(&store), vec!["b"]);
    }

    #[test]
    fn display_name_prefers_title() {
        let remote: RemoteTool =
            serde_json::from_value(json!({"name": "read_wiki", "title": "Read Wiki"})).unwrap();
        let tool = ExternalTool::from_remote("s1", remote, Utc::now());
        assert_eq!(tool.display_name, "Read Wiki");
        assert_eq!(tool.description, "");
    }

    #[test]
    fn removing_a_session_forgets_its_tools() {
        let store = InMemoryToolStore::new();
        store.reconcile("s1", vec![tool("a", "")]);
        store.remove_session("s1");
        assert!(store.tools("s1").is_empty());
    }
}
