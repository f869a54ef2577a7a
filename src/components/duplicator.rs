//! Broadcast multiplication
//!
//! Re-emits every incoming token a fixed number of times, preserving the
//! relative order of distinct source tokens: all copies of token n precede
//! any copy of token n+1. Used to hand one finite upstream artifact (a
//! reference directory, say) to several independently scheduled branches
//! that each consume their own logical copy.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FlowError;
use crate::event_log::EventKind;
use crate::node::{FlowNode, NodeContext};
use crate::port::{InPort, OutPort, PortKind};
use crate::template::validate_ident;

#[derive(Debug)]
pub struct Duplicator {
    id: Arc<str>,
    factor: usize,
    input: InPort,
    out: OutPort,
}

impl Duplicator {
    /// `factor` is fixed at construction and must be at least 1.
    pub fn new(id: &str, factor: usize) -> Result<Self, FlowError> {
        validate_ident(id)?;
        if factor == 0 {
            return Err(FlowError::InvalidFactor {
                node: id.to_string(),
            });
        }
        Ok(Self {
            id: Arc::from(id),
            factor,
            input: InPort::new("in", PortKind::FileIn),
            out: OutPort::new("out", PortKind::FileOut),
        })
    }

    pub fn factor(&self) -> usize {
        self.factor
    }
}

#[async_trait]
impl FlowNode for Duplicator {
    fn id(&self) -> &Arc<str> {
        &self.id
    }

    fn in_port_mut(&mut self, name: &str) -> Option<&mut InPort> {
        (name == "in").then_some(&mut self.input)
    }

    fn out_port_mut(&mut self, name: &str) -> Option<&mut OutPort> {
        (name == "out").then_some(&mut self.out)
    }

    fn validate(&self) -> Result<(), FlowError> {
        if !self.input.is_connected() {
            return Err(FlowError::UnconnectedPort {
                node: self.id.to_string(),
                port: "in".to_string(),
            });
        }
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

        let mut seen = 0usize;
        'tokens: while let Some(token) = self.input.recv().await {
            for _ in 0..self.factor {
                if !self.out.send(token.clone()).await {
                    break 'tokens;
                }
            }
            seen += 1;
        }
        self.out.close();

        ctx.events.emit(EventKind::NodeCompleted {
            node_id: Arc::clone(&self.id),
            rounds: seen,
        });
        Ok(())
    }
}
