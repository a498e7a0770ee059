use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ValidatorKind {
    Required,
    Min,
    Max,
    MinLength,
    MaxLength,
    /// Exact length, or `{min, max}` bounds.
    Length,
    Pattern,
    Email,
    Url,
    /// Named predicate registered by the host.
    Custom,
}

/// Declarative constraint on a field value, optionally gated by `when`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Validator {
    #[serde(rename = "type")]
    pub kind: ValidatorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Expr>,
}

impl Validator {
    pub fn new(kind: ValidatorKind) -> Self {
        Self {
            kind,
            value: None,
            message: None,
            when: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
