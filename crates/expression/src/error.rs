//! Evaluator error type.

use thiserror::Error;

/// An expression fragment failed to parse or evaluate.
///
/// Carries the offending fragment text so callers can point the user at the
/// exact `{{ … }}` that broke.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("syntax error in '{fragment}': {reason}")]
    Syntax { fragment: String, reason: String },

    #[error("cannot evaluate '{fragment}': {reason}")]
    Evaluation { fragment: String, reason: String },
}

impl ExpressionError {
    pub(crate) fn syntax(fragment: &str, reason: impl Into<String>) -> Self {
        Self::Syntax {
            fragment: fragment.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn eval(fragment: &str, reason: impl Into<String>) -> Self {
        Self::Evaluation {
            fragment: fragment.to_owned(),
            reason: reason.into(),
        }
    }
}
