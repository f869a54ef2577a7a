//! Command-template process nodes
//!
//! A process owns the ports its template declares and executes in rounds:
//! one token from every connected input and parameter port, output paths
//! resolved from path rules, the command rendered and handed to the
//! command runner, one output token per output port on success.
//!
//! Round matching is a lockstep zip. When input streams close at
//! different lengths the loop truncates at the shortest stream; this is
//! not an error, but it is logged loudly because it usually means
//! mismatched upstream configuration (e.g. sample lists of unequal
//! length). A failed command aborts the whole run.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::binding::RoundBindings;
use crate::error::FlowError;
use crate::event_log::EventKind;
use crate::node::{FlowNode, NodeContext};
use crate::path_rule::PathRule;
use crate::port::{InPort, OutPort, PortKind};
use crate::template::{validate_ident, CommandTemplate, TemplateToken};
use crate::token::Token;

#[derive(Debug)]
pub struct Process {
    id: Arc<str>,
    template: CommandTemplate,
    inputs: Vec<InPort>,
    outputs: Vec<OutPort>,
    path_rules: FxHashMap<String, PathRule>,
}

impl Process {
    /// Build a process from a command template. The template declares the
    /// ports: `{i:name}` and `{p:name}` become inputs, `{o:name}` outputs,
    /// in order of first appearance.
    pub fn from_template(id: &str, command: &str) -> Result<Self, FlowError> {
        validate_ident(id)?;
        let template = CommandTemplate::parse(command)?;

        let mut inputs: Vec<InPort> = Vec::new();
        let mut outputs: Vec<OutPort> = Vec::new();
        let mut kinds: FxHashMap<String, PortKind> = FxHashMap::default();

        for token in template.tokens() {
            let (name, kind) = match token {
                TemplateToken::InputRef { name, .. } => (name, PortKind::FileIn),
                TemplateToken::ParamRef { name } => (name, PortKind::ParamIn),
                TemplateToken::OutputRef { name } => (name, PortKind::FileOut),
                TemplateToken::Literal(_) => continue,
            };
            match kinds.get(name.as_str()) {
                Some(k) if *k == kind => continue,
                Some(_) => {
                    return Err(FlowError::DuplicatePort {
                        node: id.to_string(),
                        port: name.clone(),
                    })
                }
                None => {}
            }
            kinds.insert(name.clone(), kind);
            if kind.is_input() {
                inputs.push(InPort::new(name.clone(), kind));
            } else {
                outputs.push(OutPort::new(name.clone(), kind));
            }
        }

        Ok(Self {
            id: Arc::from(id),
            template,
            inputs,
            outputs,
            path_rules: FxHashMap::default(),
        })
    }

    pub fn template(&self) -> &CommandTemplate {
        &self.template
    }

    /// Attach a path rule to an output port.
    pub fn set_path(&mut self, output: &str, rule: PathRule) -> Result<(), FlowError> {
        if !self.outputs.iter().any(|o| o.name() == output) {
            return Err(FlowError::UnknownPort {
                node: self.id.to_string(),
                port: output.to_string(),
            });
        }
        self.path_rules.insert(output.to_string(), rule);
        Ok(())
    }

    /// Fixed output path, every round.
    pub fn set_path_static(
        &mut self,
        output: &str,
        path: impl Into<String>,
    ) -> Result<(), FlowError> {
        self.set_path(output, PathRule::Static(path.into()))
    }

    /// Output path = bound path of `input` + `suffix`.
    pub fn set_path_extend(
        &mut self,
        output: &str,
        input: &str,
        suffix: &str,
    ) -> Result<(), FlowError> {
        self.set_path(
            output,
            PathRule::Extend {
                input: input.to_string(),
                suffix: suffix.to_string(),
            },
        )
    }

    /// Output path = bound path of `input` with `from` replaced by `to`.
    pub fn set_path_replace(
        &mut self,
        output: &str,
        input: &str,
        from: &str,
        to: &str,
    ) -> Result<(), FlowError> {
        self.set_path(
            output,
            PathRule::Replace {
                input: input.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            },
        )
    }

    /// Output path computed from the round's bound values.
    pub fn set_path_custom<F>(&mut self, output: &str, f: F) -> Result<(), FlowError>
    where
        F: Fn(&RoundBindings) -> String + Send + Sync + 'static,
    {
        self.set_path(output, PathRule::custom(f))
    }

    /// Allow an input port to stay unconnected. An unconnected optional
    /// input is skipped by the zip read and its placeholder renders empty.
    pub fn set_optional_input(&mut self, name: &str) -> Result<(), FlowError> {
        match self.inputs.iter_mut().find(|p| p.name() == name) {
            Some(port) => {
                port.set_optional(true);
                Ok(())
            }
            None => Err(FlowError::UnknownPort {
                node: self.id.to_string(),
                port: name.to_string(),
            }),
        }
    }

    async fn round_loop(&mut self, ctx: &NodeContext) -> Result<usize, FlowError> {
        let id = Arc::clone(&self.id);
        let has_inputs = self.inputs.iter().any(|p| p.is_connected());
        let unconnected: Vec<String> = self
            .inputs
            .iter()
            .filter(|p| !p.is_connected())
            .map(|p| p.name().to_string())
            .collect();

        let mut rounds: usize = 0;
        'rounds: loop {
            let mut bindings = RoundBindings::new();
            for name in &unconnected {
                bindings.bind_scalar(name.clone(), "");
            }

            if has_inputs {
                // Zip read: one token from every connected port, in
                // declaration order. Any closed port ends the loop.
                let mut received = 0usize;
                let mut closed: Option<String> = None;
                for port in self.inputs.iter_mut().filter(|p| p.is_connected()) {
                    match port.recv().await {
                        Some(token) => {
                            bindings.bind_token(port.name(), &token);
                            received += 1;
                        }
                        None => {
                            if closed.is_none() {
                                closed = Some(port.name().to_string());
                            }
                        }
                    }
                }
                if let Some(port) = closed {
                    if received > 0 {
                        warn!(
                            node = %id,
                            port = %port,
                            "input streams closed at different lengths; truncating at shortest"
                        );
                        ctx.events.emit(EventKind::StreamTruncated {
                            node_id: Arc::clone(&id),
                            port,
                        });
                    }
                    break 'rounds;
                }
            }

            ctx.events.emit(EventKind::RoundStarted {
                node_id: Arc::clone(&id),
                round: rounds,
            });

            // Resolve every output path before command assembly.
            for out in &self.outputs {
                let rule = self.path_rules.get(out.name()).ok_or_else(|| {
                    FlowError::MissingPathRule {
                        node: id.to_string(),
                        port: out.name().to_string(),
                    }
                })?;
                let path = rule.resolve(&id, &bindings)?;
                bindings.bind_scalar(out.name().to_string(), path);
            }

            let command = self.template.render(&id, &bindings)?;
            let start = Instant::now();
            ctx.runner.run(&id, &command).await?;
            ctx.events.emit(EventKind::CommandExecuted {
                node_id: Arc::clone(&id),
                command,
                duration_ms: start.elapsed().as_millis() as u64,
            });

            for out in &self.outputs {
                let path = bindings.scalar(out.name()).ok_or_else(|| {
                    FlowError::UnresolvedPlaceholder {
                        node: id.to_string(),
                        name: out.name().to_string(),
                    }
                })?;
                if !out.send(Token::file(path, &id)).await {
                    debug!(node = %id, "consumers gone; stopping early");
                    break 'rounds;
                }
            }

            rounds += 1;
            if !has_inputs {
                // A source-less process is single-shot.
                break;
            }
        }

        for out in &mut self.outputs {
            out.close();
        }
        Ok(rounds)
    }
}

#[async_trait]
impl FlowNode for Process {
    fn id(&self) -> &Arc<str> {
        &self.id
    }

    fn in_port_mut(&mut self, name: &str) -> Option<&mut InPort> {
        self.inputs.iter_mut().find(|p| p.name() == name)
    }

    fn out_port_mut(&mut self, name: &str) -> Option<&mut OutPort> {
        self.outputs.iter_mut().find(|p| p.name() == name)
    }

    fn validate(&self) -> Result<(), FlowError> {
        for port in &self.inputs {
            if !port.is_connected() && !port.is_optional() {
                return Err(FlowError::UnconnectedPort {
                    node: self.id.to_string(),
                    port: port.name().to_string(),
                });
            }
        }
        for port in &self.outputs {
            if !port.is_connected() {
                return Err(FlowError::UnconnectedPort {
                    node: self.id.to_string(),
                    port: port.name().to_string(),
                });
            }
            if !self.path_rules.contains_key(port.name()) {
                return Err(FlowError::MissingPathRule {
                    node: self.id.to_string(),
                    port: port.name().to_string(),
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
        match self.round_loop(&ctx).await {
            Ok(rounds) => {
                ctx.events.emit(EventKind::NodeCompleted {
                    node_id: id,
                    rounds,
                });
                Ok(())
            }
            Err(e) => {
                ctx.events.emit(EventKind::NodeFailed {
                    node_id: id,
                    error: e.to_string(),
                });
                // Signal the abort while this node's ports are still
                // alive, so peers observe the cancellation rather than a
                // graceful close.
                ctx.cancel.cancel();
                Err(e)
            }
        }
    }
}
