//! Typed ports and connections
//!
//! Ports are the only state shared between node workers. An output port
//! fans out to any number of inputs over bounded channels; an input port
//! has at most one upstream. Closure is one-way: once a producer drops its
//! senders, every connected input drains its buffer and then sees
//! end-of-stream on every subsequent receive.

use std::fmt;

use smallvec::SmallVec;
use tokio::sync::mpsc;

use crate::error::FlowError;
use crate::token::Token;

/// Bounded buffer per connection; a full consumer suspends the producer.
pub const PORT_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    FileIn,
    FileOut,
    ParamIn,
    ParamOut,
}

impl PortKind {
    pub fn is_input(self) -> bool {
        matches!(self, PortKind::FileIn | PortKind::ParamIn)
    }

    /// The input kind this output kind feeds, if it is an output kind.
    pub fn downstream(self) -> Option<PortKind> {
        match self {
            PortKind::FileOut => Some(PortKind::FileIn),
            PortKind::ParamOut => Some(PortKind::ParamIn),
            _ => None,
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortKind::FileIn => "file-in",
            PortKind::FileOut => "file-out",
            PortKind::ParamIn => "param-in",
            PortKind::ParamOut => "param-out",
        };
        f.write_str(s)
    }
}

/// Receiving endpoint: at most one upstream connection.
#[derive(Debug)]
pub struct InPort {
    name: String,
    kind: PortKind,
    optional: bool,
    receiver: Option<mpsc::Receiver<Token>>,
}

impl InPort {
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        debug_assert!(kind.is_input());
        Self {
            name: name.into(),
            kind,
            optional: false,
            receiver: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn is_connected(&self) -> bool {
        self.receiver.is_some()
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn set_optional(&mut self, optional: bool) {
        self.optional = optional;
    }

    pub(crate) fn attach(&mut self, receiver: mpsc::Receiver<Token>) {
        self.receiver = Some(receiver);
    }

    /// Receive the next token. `None` is end-of-stream: the upstream closed
    /// and the buffer has drained. An unconnected port is permanently at
    /// end-of-stream.
    pub async fn recv(&mut self) -> Option<Token> {
        match self.receiver.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

/// Sending endpoint: fans out to any number of inputs.
#[derive(Debug)]
pub struct OutPort {
    name: String,
    kind: PortKind,
    senders: SmallVec<[mpsc::Sender<Token>; 2]>,
}

impl OutPort {
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        debug_assert!(!kind.is_input());
        Self {
            name: name.into(),
            kind,
            senders: SmallVec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn is_connected(&self) -> bool {
        !self.senders.is_empty()
    }

    pub fn fan_out(&self) -> usize {
        self.senders.len()
    }

    pub(crate) fn subscribe(&mut self, sender: mpsc::Sender<Token>) {
        self.senders.push(sender);
    }

    /// Deliver a clone of the token to every connected input, in connection
    /// order. Suspends while any consumer's buffer is full. Returns `false`
    /// only when every consumer is gone, which happens when the run is
    /// being torn down after a failure elsewhere.
    pub async fn send(&self, token: Token) -> bool {
        let mut delivered = false;
        for tx in &self.senders {
            if tx.send(token.clone()).await.is_ok() {
                delivered = true;
            }
        }
        delivered || self.senders.is_empty()
    }

    /// Idempotent close: drops the senders so every consumer sees
    /// end-of-stream after draining.
    pub fn close(&mut self) {
        self.senders.clear();
    }
}

/// Wire an output port to an input port over a fresh bounded channel.
pub fn connect(out: &mut OutPort, inp: &mut InPort) -> Result<(), FlowError> {
    let expected = out.kind().downstream();
    if expected != Some(inp.kind()) {
        return Err(FlowError::PortKindMismatch {
            from: out.name().to_string(),
            from_kind: out.kind(),
            to: inp.name().to_string(),
            to_kind: inp.kind(),
        });
    }
    if inp.is_connected() {
        return Err(FlowError::AlreadyConnected {
            port: inp.name().to_string(),
        });
    }
    let (tx, rx) = mpsc::channel(PORT_BUFFER);
    out.subscribe(tx);
    inp.attach(rx);
    Ok(())
}
