//! Single-pass command template parser with a shared cache
//!
//! A command template both describes the invocation and declares the ports
//! of the process that owns it: `{i:name}` is an input file, `{o:name}` an
//! output file, `{p:name}` a parameter, and `{i:name|join:SEP}` a list
//! expansion for inputs fed by a substream aggregator. Any other brace is
//! literal text, so shell and awk braces pass through untouched.
//!
//! Parsing is one pass and the token list is cached globally, so building
//! many processes from the same command string tokenizes once.

use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::binding::{BoundValue, RoundBindings};
use crate::error::FlowError;

static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").unwrap());

/// Cache of parsed templates, keyed by the raw command string.
static TEMPLATE_CACHE: Lazy<DashMap<String, Arc<Vec<TemplateToken>>>> = Lazy::new(DashMap::new);

/// Validate a node or port identifier.
pub(crate) fn validate_ident(ident: &str) -> Result<(), FlowError> {
    if IDENT_RE.is_match(ident) {
        Ok(())
    } else {
        Err(FlowError::InvalidIdent {
            ident: ident.to_string(),
        })
    }
}

/// One parsed fragment of a command template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateToken {
    /// Literal text (byte range in the original string).
    Literal(Range<usize>),
    /// `{i:name}` or `{i:name|join:SEP}`
    InputRef { name: String, join: Option<String> },
    /// `{o:name}`
    OutputRef { name: String },
    /// `{p:name}`
    ParamRef { name: String },
}

/// Parsed command template. Cloning shares the token list.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    raw: String,
    tokens: Arc<Vec<TemplateToken>>,
}

impl CommandTemplate {
    /// Parse a command string (cached).
    pub fn parse(raw: &str) -> Result<Self, FlowError> {
        if let Some(cached) = TEMPLATE_CACHE.get(raw) {
            return Ok(Self {
                raw: raw.to_string(),
                tokens: Arc::clone(&cached),
            });
        }

        let tokens = Arc::new(tokenize(raw)?);
        TEMPLATE_CACHE.insert(raw.to_string(), Arc::clone(&tokens));
        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn tokens(&self) -> &[TemplateToken] {
        &self.tokens
    }

    #[cfg(test)]
    pub(crate) fn token_arc(&self) -> &Arc<Vec<TemplateToken>> {
        &self.tokens
    }

    /// Assemble the command string for one round. Every placeholder must be
    /// bound; a batch bound to a plain placeholder is rejected, a scalar on
    /// a join expansion renders as a one-element list.
    pub fn render(&self, node: &str, bindings: &RoundBindings) -> Result<String, FlowError> {
        let mut out = String::with_capacity(self.raw.len() * 2);
        for token in self.tokens.iter() {
            match token {
                TemplateToken::Literal(range) => out.push_str(&self.raw[range.clone()]),
                TemplateToken::InputRef { name, join } => {
                    match (bindings.get(name), join) {
                        (Some(BoundValue::Scalar(v)), _) => out.push_str(v),
                        (Some(BoundValue::List(vs)), Some(sep)) => out.push_str(&vs.join(sep)),
                        (Some(BoundValue::List(_)), None) => {
                            return Err(FlowError::BatchBinding {
                                node: node.to_string(),
                                port: name.clone(),
                            })
                        }
                        (None, _) => {
                            return Err(FlowError::UnresolvedPlaceholder {
                                node: node.to_string(),
                                name: name.clone(),
                            })
                        }
                    }
                }
                TemplateToken::OutputRef { name } | TemplateToken::ParamRef { name } => {
                    match bindings.get(name) {
                        Some(BoundValue::Scalar(v)) => out.push_str(v),
                        Some(BoundValue::List(_)) => {
                            return Err(FlowError::BatchBinding {
                                node: node.to_string(),
                                port: name.clone(),
                            })
                        }
                        None => {
                            return Err(FlowError::UnresolvedPlaceholder {
                                node: node.to_string(),
                                name: name.clone(),
                            })
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn tokenize(raw: &str) -> Result<Vec<TemplateToken>, FlowError> {
    let bytes = raw.as_bytes();
    let mut tokens = Vec::new();
    let mut lit_start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let opens_placeholder = bytes[i] == b'{'
            && i + 2 < bytes.len()
            && matches!(bytes[i + 1], b'i' | b'o' | b'p')
            && bytes[i + 2] == b':';
        if !opens_placeholder {
            i += 1;
            continue;
        }

        let sigil = bytes[i + 1];
        let close = raw[i..]
            .find('}')
            .map(|off| i + off)
            .ok_or_else(|| FlowError::TemplateParse {
                position: i,
                details: "unterminated placeholder".to_string(),
            })?;

        let body = &raw[i + 3..close];
        let (name, join) = match body.find('|') {
            Some(pipe) => {
                let rest = &body[pipe + 1..];
                let sep = rest
                    .strip_prefix("join:")
                    .ok_or_else(|| FlowError::TemplateParse {
                        position: i,
                        details: format!("unknown modifier '{rest}'"),
                    })?;
                (&body[..pipe], Some(sep.to_string()))
            }
            None => (body, None),
        };

        if !IDENT_RE.is_match(name) {
            return Err(FlowError::TemplateParse {
                position: i,
                details: format!("invalid port name '{name}'"),
            });
        }
        if join.is_some() && sigil != b'i' {
            return Err(FlowError::TemplateParse {
                position: i,
                details: "join is only valid on input references".to_string(),
            });
        }

        if i > lit_start {
            tokens.push(TemplateToken::Literal(lit_start..i));
        }
        let name = name.to_string();
        tokens.push(match sigil {
            b'i' => TemplateToken::InputRef { name, join },
            b'o' => TemplateToken::OutputRef { name },
            _ => TemplateToken::ParamRef { name },
        });
        i = close + 1;
        lit_start = i;
    }

    if lit_start < raw.len() {
        tokens.push(TemplateToken::Literal(lit_start..raw.len()));
    }
    Ok(tokens)
}
