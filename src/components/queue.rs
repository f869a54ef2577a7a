//! Ordered source generators
//!
//! A queue holds a fixed, finite sequence built before the run, emits each
//! value as one token in sequence order, then closes its output and
//! terminates. Queues never resume: restarting means constructing a fresh
//! instance, which replays the full sequence.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FlowError;
use crate::event_log::EventKind;
use crate::node::{FlowNode, NodeContext};
use crate::port::{InPort, OutPort, PortKind};
use crate::template::validate_ident;
use crate::token::Token;

/// Emits a fixed sequence of parameter values on `out`, then closes.
pub struct ParamQueue {
    id: Arc<str>,
    values: Vec<String>,
    out: OutPort,
}

impl ParamQueue {
    pub fn new<I, V>(id: &str, values: I) -> Result<Self, FlowError>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        validate_ident(id)?;
        Ok(Self {
            id: Arc::from(id),
            values: values.into_iter().map(Into::into).collect(),
            out: OutPort::new("out", PortKind::ParamOut),
        })
    }
}

#[async_trait]
impl FlowNode for ParamQueue {
    fn id(&self) -> &Arc<str> {
        &self.id
    }

    fn in_port_mut(&mut self, _name: &str) -> Option<&mut InPort> {
        None
    }

    fn out_port_mut(&mut self, name: &str) -> Option<&mut OutPort> {
        (name == "out").then_some(&mut self.out)
    }

    fn validate(&self) -> Result<(), FlowError> {
        if !self.out.is_connected() {
            return Err(FlowError::UnconnectedPort {
                node: self.id.to_string(),
                port: "out".to_string(),
            });
        }
        Ok(())
    }

    async fn run(mut self: Box<Self>, ctx: NodeContext) -> Result<(), FlowError> {
        ctx.events.emit(EventKind::NodeStarted {
            node_id: Arc::clone(&self.id),
        });

        let mut emitted = 0usize;
        for value in self.values.drain(..) {
            if !self.out.send(Token::param(value)).await {
                break;
            }
            emitted += 1;
        }
        self.out.close();

        ctx.events.emit(EventKind::NodeCompleted {
            node_id: Arc::clone(&self.id),
            rounds: emitted,
        });
        Ok(())
    }
}

/// Emits a fixed sequence of file paths on `out`, then closes.
pub struct FileQueue {
    id: Arc<str>,
    paths: Vec<String>,
    out: OutPort,
}

impl FileQueue {
    pub fn new<I, P>(id: &str, paths: I) -> Result<Self, FlowError>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        validate_ident(id)?;
        Ok(Self {
            id: Arc::from(id),
            paths: paths.into_iter().map(Into::into).collect(),
            out: OutPort::new("out", PortKind::FileOut),
        })
    }
}

#[async_trait]
impl FlowNode for FileQueue {
    fn id(&self) -> &Arc<str> {
        &self.id
    }

    fn in_port_mut(&mut self, _name: &str) -> Option<&mut InPort> {
        None
    }

    fn out_port_mut(&mut self, name: &str) -> Option<&mut OutPort> {
        (name == "out").then_some(&mut self.out)
    }

    fn validate(&self) -> Result<(), FlowError> {
        if !self.out.is_connected() {
            return Err(FlowError::UnconnectedPort {
                node: self.id.to_string(),
                port: "out".to_string(),
            });
        }
        Ok(())
    }

    async fn run(mut self: Box<Self>, ctx: NodeContext) -> Result<(), FlowError> {
        ctx.events.emit(EventKind::NodeStarted {
            node_id: Arc::clone(&self.id),
        });

        let id = Arc::clone(&self.id);
        let mut emitted = 0usize;
        for path in self.paths.drain(..) {
            if !self.out.send(Token::file(path, &id)).await {
                break;
            }
            emitted += 1;
        }
        self.out.close();

        ctx.events.emit(EventKind::NodeCompleted {
            node_id: id,
            rounds: emitted,
        });
        Ok(())
    }
}
