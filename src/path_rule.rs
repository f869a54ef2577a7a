//! Output path rules
//!
//! Every output-file port needs exactly one rule telling its process where
//! that round's artifact lands: a fixed path, a path derived from an input
//! path, or an arbitrary function of the round's bindings. Rules resolve
//! before command assembly, so the output placeholder is just another
//! bound value by the time the command is rendered.

use std::fmt;
use std::sync::Arc;

use crate::binding::RoundBindings;
use crate::error::FlowError;

#[derive(Clone)]
pub enum PathRule {
    /// Same literal path every round.
    Static(String),
    /// The bound path of `input` plus a suffix.
    Extend { input: String, suffix: String },
    /// The bound path of `input` with a substring replaced.
    Replace {
        input: String,
        from: String,
        to: String,
    },
    /// Arbitrary function of the round's bound values.
    Custom(Arc<dyn Fn(&RoundBindings) -> String + Send + Sync>),
}

impl PathRule {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RoundBindings) -> String + Send + Sync + 'static,
    {
        PathRule::Custom(Arc::new(f))
    }

    pub(crate) fn resolve(
        &self,
        node: &str,
        bindings: &RoundBindings,
    ) -> Result<String, FlowError> {
        match self {
            PathRule::Static(path) => Ok(path.clone()),
            PathRule::Extend { input, suffix } => {
                let base = bindings.scalar(input).ok_or_else(|| {
                    FlowError::UnresolvedPlaceholder {
                        node: node.to_string(),
                        name: input.clone(),
                    }
                })?;
                Ok(format!("{base}{suffix}"))
            }
            PathRule::Replace { input, from, to } => {
                let base = bindings.scalar(input).ok_or_else(|| {
                    FlowError::UnresolvedPlaceholder {
                        node: node.to_string(),
                        name: input.clone(),
                    }
                })?;
                Ok(base.replace(from.as_str(), to))
            }
            PathRule::Custom(f) => Ok(f(bindings)),
        }
    }
}

impl fmt::Debug for PathRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRule::Static(path) => f.debug_tuple("Static").field(path).finish(),
            PathRule::Extend { input, suffix } => f
                .debug_struct("Extend")
                .field("input", input)
                .field("suffix", suffix)
                .finish(),
            PathRule::Replace { input, from, to } => f
                .debug_struct("Replace")
                .field("input", input)
                .field("from", from)
                .field("to", to)
                .finish(),
            PathRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> RoundBindings {
        let mut b = RoundBindings::new();
        b.bind_scalar("smiles", "data/set.smi");
        b.bind_scalar("index", "4");
        b
    }

    #[test]
    fn static_rule_ignores_bindings() {
        let rule = PathRule::Static("data/apps.tar.gz".into());
        assert_eq!(
            rule.resolve("dl", &bindings()).unwrap(),
            "data/apps.tar.gz"
        );
    }

    #[test]
    fn extend_appends_to_an_input_path() {
        let rule = PathRule::Extend {
            input: "smiles".into(),
            suffix: ".sign".into(),
        };
        assert_eq!(rule.resolve("gen", &bindings()).unwrap(), "data/set.smi.sign");
    }

    #[test]
    fn replace_rewrites_an_input_path() {
        let rule = PathRule::Replace {
            input: "smiles".into(),
            from: ".smi".into(),
            to: ".csr".into(),
        };
        assert_eq!(rule.resolve("conv", &bindings()).unwrap(), "data/set.csr");
    }

    #[test]
    fn custom_rule_sees_round_parameters() {
        let rule = PathRule::custom(|r| format!("tmp/normal_{}.bam", r.value("index")));
        assert_eq!(rule.resolve("align", &bindings()).unwrap(), "tmp/normal_4.bam");
    }

    #[test]
    fn derived_rule_on_unbound_input_fails() {
        let rule = PathRule::Extend {
            input: "nothere".into(),
            suffix: ".x".into(),
        };
        let err = rule.resolve("gen", &bindings()).unwrap_err();
        assert!(matches!(err, FlowError::UnresolvedPlaceholder { .. }));
    }
}
