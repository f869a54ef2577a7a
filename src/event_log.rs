//! Event sourcing for pipeline runs
//!
//! Append-only audit trail of a run:
//! - Event: envelope with id + timestamp + kind
//! - EventKind: graph-level, node-level, and round-level variants
//! - EventLog: thread-safe, append-only log shared by every worker

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since log creation (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// All event types
///
/// Uses Arc<str> for node ids to enable zero-cost cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // GRAPH LEVEL
    // ═══════════════════════════════════════════
    GraphStarted {
        node_count: usize,
    },
    GraphCompleted {
        total_duration_ms: u64,
    },
    GraphFailed {
        error: String,
        failed_node: Option<Arc<str>>,
    },

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════
    NodeStarted {
        node_id: Arc<str>,
    },
    /// `rounds` counts the units the node processed: rounds for a process,
    /// tokens for queues/duplicators/sinks, batches for an aggregator.
    NodeCompleted {
        node_id: Arc<str>,
        rounds: usize,
    },
    NodeFailed {
        node_id: Arc<str>,
        error: String,
    },

    // ═══════════════════════════════════════════
    // ROUND LEVEL
    // ═══════════════════════════════════════════
    RoundStarted {
        node_id: Arc<str>,
        round: usize,
    },
    CommandExecuted {
        node_id: Arc<str>,
        command: String,
        duration_ms: u64,
    },
    /// Input streams of one node closed at different lengths; the round
    /// loop truncated at the shortest.
    StreamTruncated {
        node_id: Arc<str>,
        port: String,
    },
}

impl EventKind {
    /// Extract node_id if event is node-related
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::RoundStarted { node_id, .. }
            | Self::CommandExecuted { node_id, .. }
            | Self::StreamTruncated { node_id, .. } => Some(node_id),
            Self::GraphStarted { .. }
            | Self::GraphCompleted { .. }
            | Self::GraphFailed { .. } => None,
        }
    }

    /// Check if this is a graph-level event
    pub fn is_graph_event(&self) -> bool {
        matches!(
            self,
            Self::GraphStarted { .. } | Self::GraphCompleted { .. } | Self::GraphFailed { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Filter events by node ID
    pub fn filter_node(&self, node_id: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.node_id() == Some(node_id))
            .collect()
    }

    /// Filter graph-level events only
    pub fn graph_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_graph_event())
            .collect()
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}
