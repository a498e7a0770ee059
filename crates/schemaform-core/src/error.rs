use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while loading a schema or building its dependency graph.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate field id '{0}'")]
    DuplicateField(String),
    #[error("duplicate section id '{0}'")]
    DuplicateSection(String),
    #[error("duplicate rule id '{0}'")]
    DuplicateRule(String),
    #[error("layout row in '{section}' references unknown field '{field}'")]
    UnknownLayoutField { section: String, field: String },
    #[error("unknown operator '{operator}' in {owner}")]
    UnknownOperator { owner: String, operator: String },
    #[error("unknown action type in rule '{0}'")]
    UnknownAction(String),
    #[error("rule cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Errors returned by snapshot transitions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("evaluation pass discarded after {} warning(s)", .0.len())]
    EvaluationDiscarded(Vec<Warning>),
    #[error("unknown transform '{0}'")]
    UnknownTransform(String),
    #[error("transform '{name}' failed: {message}")]
    Transform { name: String, message: String },
}

/// Non-fatal condition surfaced alongside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    UnknownOperator {
        operator: String,
    },
    Arity {
        operator: String,
        expected: &'static str,
        found: usize,
    },
    Cycle {
        rules: Vec<String>,
    },
    PassLimit {
        field: String,
        passes: usize,
    },
    InvalidPattern {
        field: String,
        pattern: String,
    },
    UnknownCustomValidator {
        field: String,
        name: String,
    },
}

impl Warning {
    /// Warnings produced while evaluating an expression.
    pub fn is_evaluation(&self) -> bool {
        matches!(self, Warning::UnknownOperator { .. } | Warning::Arity { .. })
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnknownOperator { operator } => {
                write!(f, "unknown operator '{operator}' evaluated as false")
            }
            Warning::Arity {
                operator,
                expected,
                found,
            } => write!(
                f,
                "operator '{operator}' expects {expected} argument(s), got {found}"
            ),
            Warning::Cycle { rules } => write!(f, "rule cycle: {}", rules.join(" -> ")),
            Warning::PassLimit { field, passes } => write!(
                f,
                "update of '{field}' stopped after {passes} cascading pass(es)"
            ),
            Warning::InvalidPattern { field, pattern } => {
                write!(f, "invalid pattern '{pattern}' on field '{field}'")
            }
            Warning::UnknownCustomValidator { field, name } => {
                write!(f, "unknown custom validator '{name}' on field '{field}'")
            }
        }
    }
}
