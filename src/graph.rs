//! Pipeline graph construction and execution
//!
//! The graph owns every node and records every connection edge; nothing
//! lives in ambient state. Wiring errors (unknown ports, kind mismatches,
//! double connections) surface at `connect` time, the rest of the
//! connectivity invariant (required inputs wired, outputs consumed, no
//! cycles) is checked by a single validation pass before any worker
//! starts.
//!
//! A run spawns one worker per node and waits for all of them; a finite
//! DAG terminates exactly when every sink has drained and every process
//! has closed. The first worker failure fails the run: the error is
//! returned and the remaining in-flight workers are abandoned, with no
//! cleanup of files already produced.

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, instrument};

use crate::error::FlowError;
use crate::event_log::{EventKind, EventLog};
use crate::exec::CommandRunner;
use crate::node::{FlowNode, NodeContext};
use crate::port::PORT_BUFFER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Constructed,
    Running,
    Completed,
    Failed,
}

struct NodeSlot {
    id: Arc<str>,
    node: Option<Box<dyn FlowNode>>,
}

#[derive(Debug)]
struct Edge {
    from: Arc<str>,
    from_port: String,
    to: Arc<str>,
    to_port: String,
}

pub struct PipelineGraph {
    nodes: Vec<NodeSlot>,
    index: FxHashMap<Arc<str>, usize>,
    edges: Vec<Edge>,
    state: RunState,
    events: EventLog,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: FxHashMap::default(),
            edges: Vec::new(),
            state: RunState::Constructed,
            events: EventLog::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Event log for inspection, also available after the run.
    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    /// Qualified `(from, to)` endpoints of every recorded connection.
    pub fn connections(&self) -> Vec<(String, String)> {
        self.edges
            .iter()
            .map(|e| {
                (
                    format!("{}.{}", e.from, e.from_port),
                    format!("{}.{}", e.to, e.to_port),
                )
            })
            .collect()
    }

    /// Add a node to the graph. Node ids must be unique.
    pub fn add(&mut self, node: impl FlowNode + 'static) -> Result<(), FlowError> {
        if self.state != RunState::Constructed {
            return Err(FlowError::AlreadyRan);
        }
        let id = Arc::clone(node.id());
        if self.index.contains_key(&*id) {
            return Err(FlowError::DuplicateNode {
                node: id.to_string(),
            });
        }
        self.index.insert(Arc::clone(&id), self.nodes.len());
        self.nodes.push(NodeSlot {
            id,
            node: Some(Box::new(node)),
        });
        Ok(())
    }

    /// Wire `from.from_port` (an output) to `to.to_port` (an input) over a
    /// fresh bounded channel. Kind mismatches and double connections fail
    /// here; a direct self-loop is rejected immediately, longer cycles by
    /// the pre-run validation pass.
    pub fn connect(
        &mut self,
        from: &str,
        from_port: &str,
        to: &str,
        to_port: &str,
    ) -> Result<(), FlowError> {
        if self.state != RunState::Constructed {
            return Err(FlowError::AlreadyRan);
        }
        let from_idx = *self.index.get(from).ok_or_else(|| FlowError::UnknownNode {
            node: from.to_string(),
        })?;
        let to_idx = *self.index.get(to).ok_or_else(|| FlowError::UnknownNode {
            node: to.to_string(),
        })?;
        if from_idx == to_idx {
            return Err(FlowError::CycleDetected {
                path: format!("{from} -> {to}"),
            });
        }

        let from_kind = {
            let node = self.nodes[from_idx].node.as_mut().ok_or(FlowError::AlreadyRan)?;
            node.out_port_mut(from_port)
                .ok_or_else(|| FlowError::UnknownPort {
                    node: from.to_string(),
                    port: from_port.to_string(),
                })?
                .kind()
        };
        let expected = match from_kind.downstream() {
            Some(kind) => kind,
            None => {
                return Err(FlowError::UnknownPort {
                    node: from.to_string(),
                    port: from_port.to_string(),
                })
            }
        };

        let (tx, rx) = mpsc::channel(PORT_BUFFER);
        {
            let node = self.nodes[to_idx].node.as_mut().ok_or(FlowError::AlreadyRan)?;
            let inlet =
                node.inlet_mut(to_port, expected)
                    .ok_or_else(|| FlowError::UnknownPort {
                        node: to.to_string(),
                        port: to_port.to_string(),
                    })?;
            if inlet.kind() != expected {
                return Err(FlowError::PortKindMismatch {
                    from: format!("{from}.{from_port}"),
                    from_kind,
                    to: format!("{to}.{to_port}"),
                    to_kind: inlet.kind(),
                });
            }
            if inlet.is_connected() {
                return Err(FlowError::AlreadyConnected {
                    port: format!("{to}.{to_port}"),
                });
            }
            inlet.attach(rx);
        }
        {
            let node = self.nodes[from_idx].node.as_mut().ok_or(FlowError::AlreadyRan)?;
            if let Some(out) = node.out_port_mut(from_port) {
                out.subscribe(tx);
            }
        }

        self.edges.push(Edge {
            from: Arc::clone(&self.nodes[from_idx].id),
            from_port: from_port.to_string(),
            to: Arc::clone(&self.nodes[to_idx].id),
            to_port: to_port.to_string(),
        });
        Ok(())
    }

    /// Static validation pass: every node's connectivity invariant plus
    /// graph-level acyclicity. Runs before any worker starts.
    fn validate(&self) -> Result<(), FlowError> {
        for slot in &self.nodes {
            let node = slot.node.as_ref().ok_or(FlowError::AlreadyRan)?;
            node.validate()?;
        }
        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), FlowError> {
        let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        for slot in &self.nodes {
            adjacency.entry(&slot.id).or_default();
        }
        for edge in &self.edges {
            adjacency.entry(&edge.from).or_default().push(&edge.to);
        }

        // 0 = unvisited, 1 = on the current path, 2 = done
        fn visit<'a>(
            node: &'a str,
            adjacency: &FxHashMap<&'a str, Vec<&'a str>>,
            color: &mut FxHashMap<&'a str, u8>,
            path: &mut Vec<&'a str>,
        ) -> Option<String> {
            color.insert(node, 1);
            path.push(node);
            if let Some(successors) = adjacency.get(node) {
                for &succ in successors {
                    match color.get(succ).copied().unwrap_or(0) {
                        1 => {
                            let start = path.iter().position(|&n| n == succ).unwrap_or(0);
                            let mut cycle: Vec<&str> = path[start..].to_vec();
                            cycle.push(succ);
                            return Some(cycle.join(" -> "));
                        }
                        0 => {
                            if let Some(found) = visit(succ, adjacency, color, path) {
                                return Some(found);
                            }
                        }
                        _ => {}
                    }
                }
            }
            path.pop();
            color.insert(node, 2);
            None
        }

        let mut color: FxHashMap<&str, u8> = FxHashMap::default();
        let mut path: Vec<&str> = Vec::new();
        for slot in &self.nodes {
            if color.get(&*slot.id).copied().unwrap_or(0) == 0 {
                if let Some(cycle) = visit(&slot.id, &adjacency, &mut color, &mut path) {
                    return Err(FlowError::CycleDetected { path: cycle });
                }
            }
        }
        Ok(())
    }

    /// Run the pipeline to completion. Synchronous from the caller's view:
    /// returns once every worker has finished, or immediately with the
    /// first fatal failure (remaining workers are abandoned).
    #[instrument(skip(self, runner), fields(nodes = self.nodes.len()))]
    pub async fn run(&mut self, runner: Arc<dyn CommandRunner>) -> Result<(), FlowError> {
        if self.state != RunState::Constructed {
            return Err(FlowError::AlreadyRan);
        }
        self.validate()?;

        let started = Instant::now();
        self.state = RunState::Running;
        self.events.emit(EventKind::GraphStarted {
            node_count: self.nodes.len(),
        });
        info!(nodes = self.nodes.len(), "starting pipeline run");

        // One context per run; clones share the event log and abort token.
        let base_ctx = NodeContext::new(runner, self.events.clone());
        let cancel = base_ctx.cancel.clone();

        let mut workers: JoinSet<(Arc<str>, Result<(), FlowError>)> = JoinSet::new();
        for slot in &mut self.nodes {
            if let Some(node) = slot.node.take() {
                let id = Arc::clone(&slot.id);
                let ctx = base_ctx.clone();
                workers.spawn(async move {
                    let result = node.run(ctx).await;
                    (id, result)
                });
            }
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(error))) => {
                    self.state = RunState::Failed;
                    cancel.cancel();
                    self.events.emit(EventKind::GraphFailed {
                        error: error.to_string(),
                        failed_node: Some(id),
                    });
                    // Dropping the JoinSet abandons the in-flight workers.
                    return Err(error);
                }
                Err(join_error) => {
                    self.state = RunState::Failed;
                    cancel.cancel();
                    let error = format!("worker panicked: {join_error}");
                    self.events.emit(EventKind::GraphFailed {
                        error: error.clone(),
                        failed_node: None,
                    });
                    return Err(FlowError::Execution(error));
                }
            }
        }

        self.state = RunState::Completed;
        self.events.emit(EventKind::GraphCompleted {
            total_duration_ms: started.elapsed().as_millis() as u64,
        });
        info!("pipeline run complete");
        Ok(())
    }
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::new()
    }
}
