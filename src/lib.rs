//! Runnel - token-passing pipeline engine for command-line tools
//!
//! Wire parameterized command templates into a dataflow graph: processes
//! exchange file and parameter tokens over typed ports, run one external
//! command per matched round, and the graph completes when every sink has
//! drained. Connector components cover the stream plumbing: ordered source
//! queues, broadcast duplication, stream-to-batch aggregation, terminal
//! sinks.

pub mod binding;
pub mod components;
pub mod error;
pub mod event_log;
pub mod exec;
pub mod graph;
pub mod node;
pub mod path_rule;
pub mod port;
pub mod process;
pub mod template;
pub mod token;

pub use binding::{BoundValue, RoundBindings};
pub use components::{Duplicator, FileQueue, ParamQueue, Sink, SubstreamAggregator};
pub use error::{FixSuggestion, FlowError};
pub use event_log::{Event, EventKind, EventLog};
pub use exec::{CommandRunner, MockRunner, ShellRunner};
pub use graph::{PipelineGraph, RunState};
pub use node::{FlowNode, NodeContext};
pub use path_rule::PathRule;
pub use port::{InPort, OutPort, PortKind};
pub use process::Process;
pub use token::Token;
