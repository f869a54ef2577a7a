//! Tokens flowing across port connections
//!
//! A token is one immutable unit of data on a connection: a file reference
//! (path plus the id of the node that produced it), a scalar parameter
//! value, or an ordered batch collected by the substream aggregator.
//! Tokens are passed by value; paths are cheap and never mutated after
//! creation.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Reference to a file on disk, tagged with the producing node.
    File {
        path: String,
        produced_by: Arc<str>,
    },
    /// Scalar parameter value (sample index, group label, ...).
    Param { value: String },
    /// Ordered batch of tokens, emitted by the substream aggregator.
    List(Vec<Token>),
}

impl Token {
    pub fn file(path: impl Into<String>, produced_by: &Arc<str>) -> Self {
        Token::File {
            path: path.into(),
            produced_by: Arc::clone(produced_by),
        }
    }

    pub fn param(value: impl Into<String>) -> Self {
        Token::Param {
            value: value.into(),
        }
    }

    /// The path or scalar carried by this token, unless it is a batch.
    pub fn scalar(&self) -> Option<&str> {
        match self {
            Token::File { path, .. } => Some(path),
            Token::Param { value } => Some(value),
            Token::List(_) => None,
        }
    }

    /// Flatten into the carried paths/values, in order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            Token::List(items) => items.iter().filter_map(Token::scalar).collect(),
            other => other.scalar().into_iter().collect(),
        }
    }
}
