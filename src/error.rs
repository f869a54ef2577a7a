//! Error types with fix suggestions
//!
//! Two families of failure: construction errors, all detected before any
//! worker starts, and execution errors, which abort the whole run on first
//! occurrence. Stream-length mismatches are deliberately not here: they
//! truncate the round loop and are reported as a warning, not an error.

use thiserror::Error;

use crate::port::PortKind;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum FlowError {
    // ─────────────────────────────────────────────────────────────
    // Construction errors (pre-run)
    // ─────────────────────────────────────────────────────────────
    #[error("unknown node '{node}'")]
    UnknownNode { node: String },

    #[error("node '{node}' already exists in the graph")]
    DuplicateNode { node: String },

    #[error("invalid identifier '{ident}'")]
    InvalidIdent { ident: String },

    #[error("unknown port '{port}' on node '{node}'")]
    UnknownPort { node: String, port: String },

    #[error("port '{port}' on '{node}' is declared with conflicting kinds")]
    DuplicatePort { node: String, port: String },

    #[error("cannot connect {from} ({from_kind}) to {to} ({to_kind})")]
    PortKindMismatch {
        from: String,
        from_kind: PortKind,
        to: String,
        to_kind: PortKind,
    },

    #[error("input port {port} already has an upstream connection")]
    AlreadyConnected { port: String },

    #[error("required port '{port}' on node '{node}' is not connected")]
    UnconnectedPort { node: String, port: String },

    #[error("sink '{node}' has no incoming connections")]
    EmptySink { node: String },

    #[error("no path rule defined for output '{port}' of '{node}'")]
    MissingPathRule { node: String, port: String },

    #[error("duplication factor must be at least 1 on '{node}'")]
    InvalidFactor { node: String },

    #[error("template parse error at byte {position}: {details}")]
    TemplateParse { position: usize, details: String },

    #[error("connection graph contains a cycle: {path}")]
    CycleDetected { path: String },

    #[error("pipeline graph has already run")]
    AlreadyRan,

    // ─────────────────────────────────────────────────────────────
    // Execution errors (fail-fast, abort the run)
    // ─────────────────────────────────────────────────────────────
    #[error("command failed in '{node}' (exit {status}): {command}: {stderr}")]
    CommandFailed {
        node: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to spawn command in '{node}': {details}")]
    CommandSpawn {
        node: String,
        command: String,
        details: String,
    },

    #[error("placeholder '{name}' in '{node}' was not bound at assembly time")]
    UnresolvedPlaceholder { node: String, name: String },

    #[error("aggregate batch bound to plain placeholder '{port}' in '{node}'")]
    BatchBinding { node: String, port: String },

    #[error("execution error: {0}")]
    Execution(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixSuggestion for FlowError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            FlowError::UnknownNode { .. } => Some("Add the node to the graph before connecting it"),
            FlowError::DuplicateNode { .. } => Some("Give every node a unique id"),
            FlowError::InvalidIdent { .. } => {
                Some("Identifiers start with a letter and contain only letters, digits, '_' or '-'")
            }
            FlowError::UnknownPort { .. } => {
                Some("Ports are declared by the command template: {i:name}, {o:name}, {p:name}")
            }
            FlowError::DuplicatePort { .. } => {
                Some("Use a distinct name per port; the same name cannot be both input and output")
            }
            FlowError::PortKindMismatch { .. } => {
                Some("File outputs feed file inputs, parameter outputs feed parameter inputs")
            }
            FlowError::AlreadyConnected { .. } => {
                Some("An input accepts one upstream; insert a duplicator to share a stream")
            }
            FlowError::UnconnectedPort { .. } => {
                Some("Wire the port, or mark the input optional if the process can run without it")
            }
            FlowError::EmptySink { .. } => Some("Connect at least one output port to the sink"),
            FlowError::MissingPathRule { .. } => {
                Some("Call set_path_static/extend/replace/custom for every output port")
            }
            FlowError::InvalidFactor { .. } => Some("Use a duplication factor of 1 or more"),
            FlowError::TemplateParse { .. } => {
                Some("Check placeholder syntax: {i:name}, {o:name}, {p:name}, {i:name|join:SEP}")
            }
            FlowError::CycleDetected { .. } => {
                Some("Remove the cycle; a process may not consume its own output")
            }
            FlowError::AlreadyRan => Some("Build a fresh graph; runs are single-shot"),
            FlowError::CommandFailed { .. } => {
                Some("Inspect the failing command and its stderr output")
            }
            FlowError::CommandSpawn { .. } => Some("Check that 'sh' and the tool are on PATH"),
            FlowError::UnresolvedPlaceholder { .. } => {
                Some("Every placeholder must map to a connected port or a path rule")
            }
            FlowError::BatchBinding { .. } => {
                Some("Ports fed by a substream aggregator need a {i:name|join:SEP} expansion")
            }
            FlowError::Execution(_) => None,
            FlowError::Io(_) => Some("Check file paths and permissions"),
        }
    }
}
