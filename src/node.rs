//! Node trait shared by processes and connector components
//!
//! Every graph node runs as one independent worker. The trait covers the
//! three phases of a node's life: port lookup while the graph is being
//! wired, connectivity validation before the run, and the async worker
//! body that consumes the node.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::FlowError;
use crate::event_log::EventLog;
use crate::exec::CommandRunner;
use crate::port::{InPort, OutPort, PortKind};

/// Shared handles passed to every worker. Clones share the event log and
/// the abort token, so one context is built per run and cloned per node.
#[derive(Clone)]
pub struct NodeContext {
    pub runner: Arc<dyn CommandRunner>,
    pub events: EventLog,
    /// Cancelled by the first failing worker, before it releases its
    /// ports: downstream nodes must not mistake the teardown for a
    /// graceful end-of-stream.
    pub cancel: CancellationToken,
}

impl NodeContext {
    pub fn new(runner: Arc<dyn CommandRunner>, events: EventLog) -> Self {
        Self {
            runner,
            events,
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
pub trait FlowNode: Send {
    fn id(&self) -> &Arc<str>;

    fn in_port_mut(&mut self, name: &str) -> Option<&mut InPort>;

    fn out_port_mut(&mut self, name: &str) -> Option<&mut OutPort>;

    /// Input port for an incoming connection of the given kind. Nodes that
    /// accept arbitrary fan-in (the sink) override this to create the
    /// port on demand; everything else resolves declared ports only.
    fn inlet_mut(&mut self, name: &str, _kind: PortKind) -> Option<&mut InPort> {
        self.in_port_mut(name)
    }

    /// Check this node's own connectivity before the run starts.
    fn validate(&self) -> Result<(), FlowError>;

    /// Terminal nodes gate run completion.
    fn is_sink(&self) -> bool {
        false
    }

    /// Worker body; consumes the node.
    async fn run(self: Box<Self>, ctx: NodeContext) -> Result<(), FlowError>;
}
