//! Per-round binding tables
//!
//! Each round binds every declared placeholder name to the value it
//! resolved to: input paths and parameters from the received tokens,
//! output paths from the owning process's path rules. Rendering consults
//! this table instead of scanning strings, so an unresolvable placeholder
//! is caught against the declared port set rather than at substitution
//! time.

use rustc_hash::FxHashMap;

use crate::token::Token;

#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Scalar(String),
    List(Vec<String>),
}

/// Typed binding table for one round: placeholder name → resolved value.
#[derive(Debug, Default, Clone)]
pub struct RoundBindings {
    values: FxHashMap<String, BoundValue>,
}

impl RoundBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_scalar(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(name.into(), BoundValue::Scalar(value.into()));
    }

    pub fn bind_list(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.values.insert(name.into(), BoundValue::List(values));
    }

    /// Bind a received token: files and parameters bind their scalar,
    /// batches bind the flattened value list.
    pub fn bind_token(&mut self, name: &str, token: &Token) {
        match token {
            Token::List(_) => self.bind_list(
                name,
                token.values().into_iter().map(str::to_string).collect(),
            ),
            other => {
                if let Some(v) = other.scalar() {
                    self.bind_scalar(name, v);
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&BoundValue> {
        self.values.get(name)
    }

    /// Bound scalar, if the name is bound to one.
    pub fn scalar(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(BoundValue::Scalar(s)) => Some(s),
            _ => None,
        }
    }

    /// Lenient scalar lookup for path-rule closures: unbound names resolve
    /// to the empty string.
    pub fn value(&self, name: &str) -> &str {
        self.scalar(name).unwrap_or("")
    }

    /// Bound list, if the name is bound to a batch.
    pub fn list(&self, name: &str) -> Option<&[String]> {
        match self.values.get(name) {
            Some(BoundValue::List(items)) => Some(items),
            _ => None,
        }
    }
}
