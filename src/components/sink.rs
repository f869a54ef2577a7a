//! Terminal drain
//!
//! A sink performs no transformation; it drains every connected port to
//! end-of-stream, and the run as a whole is complete only once every sink
//! has finished draining. Inlets are created on demand, one per incoming
//! connection, so any number of output ports can terminate here.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::FlowError;
use crate::event_log::EventKind;
use crate::node::{FlowNode, NodeContext};
use crate::port::{InPort, OutPort, PortKind};
use crate::template::validate_ident;

pub struct Sink {
    id: Arc<str>,
    inlets: Vec<InPort>,
}

impl Sink {
    pub fn new(id: &str) -> Result<Self, FlowError> {
        validate_ident(id)?;
        Ok(Self {
            id: Arc::from(id),
            inlets: Vec::new(),
        })
    }
}

#[async_trait]
impl FlowNode for Sink {
    fn id(&self) -> &Arc<str> {
        &self.id
    }

    fn in_port_mut(&mut self, name: &str) -> Option<&mut InPort> {
        self.inlets.iter_mut().find(|p| p.name() == name)
    }

    fn out_port_mut(&mut self, _name: &str) -> Option<&mut OutPort> {
        None
    }

    // A sink accepts arbitrary fan-in: an unknown inlet name creates a
    // fresh port of the requested kind.
    fn inlet_mut(&mut self, name: &str, kind: PortKind) -> Option<&mut InPort> {
        if let Some(pos) = self.inlets.iter().position(|p| p.name() == name) {
            return self.inlets.get_mut(pos);
        }
        if !kind.is_input() {
            return None;
        }
        self.inlets.push(InPort::new(name, kind));
        self.inlets.last_mut()
    }

    fn is_sink(&self) -> bool {
        true
    }

    fn validate(&self) -> Result<(), FlowError> {
        if self.inlets.is_empty() {
            return Err(FlowError::EmptySink {
                node: self.id.to_string(),
            });
        }
        Ok(())
    }

    async fn run(mut self: Box<Self>, ctx: NodeContext) -> Result<(), FlowError> {
        let id = Arc::clone(&self.id);
        ctx.events.emit(EventKind::NodeStarted {
            node_id: Arc::clone(&id),
        });

        // Drain every inlet concurrently; a sequential drain could wedge a
        // producer that feeds this sink on two ports. Each drain watches
        // the abort token so a failing peer's teardown is never taken for
        // a graceful end-of-stream.
        let mut drains = JoinSet::new();
        for mut inlet in self.inlets.drain(..) {
            let cancel = ctx.cancel.clone();
            drains.spawn(async move {
                let mut drained = 0usize;
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        token = inlet.recv() => match token {
                            Some(_) => drained += 1,
                            // Re-check the abort token: a torn-down port
                            // must not read as normal completion.
                            None => {
                                return (!cancel.is_cancelled()).then_some(drained);
                            }
                        },
                    }
                }
            });
        }

        let mut total = 0usize;
        while let Some(result) = drains.join_next().await {
            match result {
                Ok(Some(drained)) => total += drained,
                // Abandoned mid-run; the failing node reports the error.
                Ok(None) | Err(_) => {
                    debug!(node = %id, "sink drain abandoned");
                    return Ok(());
                }
            }
        }
        debug!(node = %id, tokens = total, "sink drained");

        ctx.events.emit(EventKind::NodeCompleted {
            node_id: id,
            rounds: total,
        });
        Ok(())
    }
}
