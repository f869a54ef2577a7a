//! Stream-to-batch aggregation
//!
//! A blocking barrier over the inner stream: nothing is emitted until the
//! upstream closes, then the whole observed sequence goes out as one
//! list-valued batch token. The paired consumer expands the batch with a
//! `{i:name|join:SEP}` placeholder.
//!
//! The keyed variant zips a parallel label stream with the file stream and
//! emits one `(batch, group)` pair per distinct label, in first-seen
//! order, so a downstream reduce command runs once per group.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::FlowError;
use crate::event_log::EventKind;
use crate::node::{FlowNode, NodeContext};
use crate::port::{InPort, OutPort, PortKind};
use crate::template::validate_ident;
use crate::token::Token;

pub struct SubstreamAggregator {
    id: Arc<str>,
    input: InPort,
    key: Option<InPort>,
    batch: OutPort,
    group: Option<OutPort>,
}

impl SubstreamAggregator {
    /// Unkeyed barrier: exactly one batch at upstream closure, the empty
    /// upstream included (an empty batch, not a skipped one).
    pub fn new(id: &str) -> Result<Self, FlowError> {
        validate_ident(id)?;
        Ok(Self {
            id: Arc::from(id),
            input: InPort::new("in", PortKind::FileIn),
            key: None,
            batch: OutPort::new("batch", PortKind::FileOut),
            group: None,
        })
    }

    /// Keyed barrier: `key` parameters arrive in lockstep with `in` tokens;
    /// one batch per distinct key goes out on `batch`, with the key itself
    /// on `group`.
    pub fn keyed(id: &str) -> Result<Self, FlowError> {
        validate_ident(id)?;
        Ok(Self {
            id: Arc::from(id),
            input: InPort::new("in", PortKind::FileIn),
            key: Some(InPort::new("key", PortKind::ParamIn)),
            batch: OutPort::new("batch", PortKind::FileOut),
            group: Some(OutPort::new("group", PortKind::ParamOut)),
        })
    }

    pub fn is_keyed(&self) -> bool {
        self.key.is_some()
    }
}

#[async_trait]
impl FlowNode for SubstreamAggregator {
    fn id(&self) -> &Arc<str> {
        &self.id
    }

    fn in_port_mut(&mut self, name: &str) -> Option<&mut InPort> {
        match name {
            "in" => Some(&mut self.input),
            "key" => self.key.as_mut(),
            _ => None,
        }
    }

    fn out_port_mut(&mut self, name: &str) -> Option<&mut OutPort> {
        match name {
            "batch" => Some(&mut self.batch),
            "group" => self.group.as_mut(),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), FlowError> {
        let required: [(&str, bool); 4] = [
            ("in", self.input.is_connected()),
            ("key", self.key.as_ref().map_or(true, InPort::is_connected)),
            ("batch", self.batch.is_connected()),
            ("group", self.group.as_ref().map_or(true, OutPort::is_connected)),
        ];
        for (port, connected) in required {
            if !connected {
                return Err(FlowError::UnconnectedPort {
                    node: self.id.to_string(),
                    port: port.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn run(mut self: Box<Self>, ctx: NodeContext) -> Result<(), FlowError> {
        let id = Arc::clone(&self.id);
        ctx.events.emit(EventKind::NodeStarted {
            node_id: Arc::clone(&id),
        });

        // Collect the full upstream; grouping is first-seen order. The
        // unkeyed case is a single group under one implicit key.
        let mut groups: Vec<(Option<String>, Vec<Token>)> = Vec::new();
        if self.key.is_none() {
            groups.push((None, Vec::new()));
        }

        loop {
            let token = self.input.recv().await;
            match &mut self.key {
                None => match token {
                    Some(t) => groups[0].1.push(t),
                    None => break,
                },
                Some(key_port) => {
                    let key = key_port.recv().await;
                    match (token, key) {
                        (Some(t), Some(k)) => {
                            let label = k.scalar().unwrap_or_default().to_string();
                            match groups.iter_mut().find(|(g, _)| g.as_deref() == Some(label.as_str())) {
                                Some((_, items)) => items.push(t),
                                None => groups.push((Some(label), vec![t])),
                            }
                        }
                        (None, None) => break,
                        (token, _) => {
                            let port = if token.is_none() { "in" } else { "key" };
                            warn!(
                                node = %id,
                                port,
                                "file and key streams closed at different lengths; truncating at shortest"
                            );
                            ctx.events.emit(EventKind::StreamTruncated {
                                node_id: Arc::clone(&id),
                                port: port.to_string(),
                            });
                            break;
                        }
                    }
                }
            }
        }

        let mut batches = 0usize;
        'emit: for (key, items) in groups {
            if let (Some(group_out), Some(k)) = (&self.group, key) {
                if !group_out.send(Token::param(k)).await {
                    break 'emit;
                }
            }
            if !self.batch.send(Token::List(items)).await {
                break 'emit;
            }
            batches += 1;
        }

        self.batch.close();
        if let Some(group_out) = &mut self.group {
            group_out.close();
        }

        ctx.events.emit(EventKind::NodeCompleted {
            node_id: id,
            rounds: batches,
        });
        Ok(())
    }
}
