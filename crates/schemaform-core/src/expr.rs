use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::VariableResolution;
use crate::error::Warning;
use crate::path;

pub const GLOBALS_PREFIX: &str = "globals.";
pub const PARAMS_PREFIX: &str = "params.";

/// Operator vocabulary understood by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    StrictEq,
    Ne,
    StrictNe,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Not,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Empty,
    Count,
    If,
    /// Kept so loading stays lenient; evaluates to `false`.
    Unknown(String),
}

impl Operator {
    pub fn from_name(name: &str) -> Self {
        match name {
            "==" => Operator::Eq,
            "===" => Operator::StrictEq,
            "!=" => Operator::Ne,
            "!==" => Operator::StrictNe,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "and" => Operator::And,
            "or" => Operator::Or,
            "not" | "!" => Operator::Not,
            "in" => Operator::In,
            "contains" => Operator::Contains,
            "startsWith" => Operator::StartsWith,
            "endsWith" => Operator::EndsWith,
            "empty" => Operator::Empty,
            "count" => Operator::Count,
            "if" | "?:" => Operator::If,
            other => Operator::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Operator::Eq => "==",
            Operator::StrictEq => "===",
            Operator::Ne => "!=",
            Operator::StrictNe => "!==",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Not => "not",
            Operator::In => "in",
            Operator::Contains => "contains",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Empty => "empty",
            Operator::Count => "count",
            Operator::If => "if",
            Operator::Unknown(name) => name,
        }
    }

    fn arity(&self) -> Option<Arity> {
        match self {
            Operator::Eq
            | Operator::StrictEq
            | Operator::Ne
            | Operator::StrictNe
            | Operator::Gt
            | Operator::Gte
            | Operator::Lt
            | Operator::Lte
            | Operator::In
            | Operator::Contains
            | Operator::StartsWith
            | Operator::EndsWith => Some(Arity::Exactly(2)),
            Operator::Not | Operator::Empty | Operator::Count => Some(Arity::Exactly(1)),
            Operator::And | Operator::Or => Some(Arity::AtLeast(1)),
            Operator::If => Some(Arity::AtLeast(2)),
            Operator::Unknown(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    fn accepts(self, found: usize) -> bool {
        match self {
            Arity::Exactly(n) => found == n,
            Arity::AtLeast(n) => found >= n,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Arity::Exactly(1) => "1",
            Arity::Exactly(_) => "2",
            Arity::AtLeast(1) => "at least 1",
            Arity::AtLeast(_) => "at least 2",
        }
    }
}

/// Condition tree used by rules, visibility and validator gates.
///
/// The JSON form follows JSONLogic: scalars are literals, arrays are lists of
/// sub-expressions, `{"var": "path"}` (or `{"var": ["path", default]}`) reads
/// a variable and any other single-key object is an operator node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Var {
        path: String,
        default: Option<Value>,
    },
    Op {
        op: Operator,
        args: Vec<Expr>,
    },
}

/// Shape errors rejected while loading an expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("expression object must have exactly one operator key, found {0:?}")]
    NotAnOperator(Vec<String>),
    #[error("invalid var reference: {0}")]
    InvalidVar(String),
}

impl TryFrom<Value> for Expr {
    type Error = ExprError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(Expr::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Expr::List),
            Value::Object(map) if map.is_empty() => Ok(Expr::Literal(Value::Object(map))),
            Value::Object(map) => parse_node(map),
            scalar => Ok(Expr::Literal(scalar)),
        }
    }
}

fn parse_node(map: Map<String, Value>) -> Result<Expr, ExprError> {
    if map.len() != 1 {
        return Err(ExprError::NotAnOperator(map.keys().cloned().collect()));
    }
    let Some((name, operand)) = map.into_iter().next() else {
        return Err(ExprError::NotAnOperator(Vec::new()));
    };
    if name == "var" {
        return parse_var(operand);
    }
    let args = match operand {
        Value::Array(items) => items
            .into_iter()
            .map(Expr::try_from)
            .collect::<Result<Vec<_>, _>>()?,
        single => vec![Expr::try_from(single)?],
    };
    Ok(Expr::Op {
        op: Operator::from_name(&name),
        args,
    })
}

fn parse_var(operand: Value) -> Result<Expr, ExprError> {
    match operand {
        Value::String(path) => Ok(Expr::Var {
            path,
            default: None,
        }),
        Value::Array(items) => {
            let mut items = items.into_iter();
            match (items.next(), items.next(), items.next()) {
                (Some(Value::String(path)), default, None) => Ok(Expr::Var { path, default }),
                _ => Err(ExprError::InvalidVar("expected [path, default?]".into())),
            }
        }
        other => Err(ExprError::InvalidVar(other.to_string())),
    }
}

impl From<Expr> for Value {
    fn from(expr: Expr) -> Self {
        match expr {
            Expr::Literal(value) => value,
            Expr::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Expr::Var {
                path,
                default: None,
            } => single_key("var", Value::String(path)),
            Expr::Var {
                path,
                default: Some(default),
            } => single_key("var", Value::Array(vec![Value::String(path), default])),
            Expr::Op { op, args } => single_key(
                op.name(),
                Value::Array(args.into_iter().map(Value::from).collect()),
            ),
        }
    }
}

fn single_key(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

impl JsonSchema for Expr {
    fn schema_name() -> Cow<'static, str> {
        "Expression".into()
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "description": "JSONLogic-style expression: a literal, a list, {\"var\": path} or a single-key operator node."
        })
    }
}

/// Variable sources an expression reads from.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub data: &'a Map<String, Value>,
    pub globals: &'a Map<String, Value>,
    pub params: &'a Map<String, Value>,
    pub resolution: VariableResolution,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        data: &'a Map<String, Value>,
        globals: &'a Map<String, Value>,
        params: &'a Map<String, Value>,
    ) -> Self {
        Self {
            data,
            globals,
            params,
            resolution: VariableResolution::Fallback,
        }
    }

    pub fn with_resolution(mut self, resolution: VariableResolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_data(mut self, data: &'a Map<String, Value>) -> Self {
        self.data = data;
        self
    }
}

/// Resolves a variable path against the context, honoring `globals.`/`params.` prefixes.
pub fn resolve_variable<'a>(path: &str, ctx: &EvalContext<'a>) -> Option<&'a Value> {
    if let Some(rest) = path.strip_prefix(GLOBALS_PREFIX) {
        return path::lookup(ctx.globals, rest);
    }
    if let Some(rest) = path.strip_prefix(PARAMS_PREFIX) {
        return path::lookup(ctx.params, rest);
    }
    let found = path::lookup(ctx.data, path);
    match ctx.resolution {
        VariableResolution::Strict => found,
        VariableResolution::Fallback => found
            .or_else(|| path::lookup(ctx.globals, path))
            .or_else(|| path::lookup(ctx.params, path)),
    }
}

/// Whether a path addresses globals or params rather than field values.
pub fn is_context_path(path: &str) -> bool {
    path.starts_with(GLOBALS_PREFIX) || path.starts_with(PARAMS_PREFIX)
}

impl Expr {
    pub fn var(path: impl Into<String>) -> Self {
        Expr::Var {
            path: path.into(),
            default: None,
        }
    }

    pub fn op(op: Operator, args: Vec<Expr>) -> Self {
        Expr::Op { op, args }
    }

    /// Evaluates the expression; malformed nodes push a warning and degrade.
    pub fn evaluate(&self, ctx: &EvalContext<'_>, warnings: &mut Vec<Warning>) -> Value {
        evaluate(self, ctx, warnings)
    }

    pub fn evaluate_bool(&self, ctx: &EvalContext<'_>, warnings: &mut Vec<Warning>) -> bool {
        truthy(&evaluate(self, ctx, warnings))
    }

    /// Every distinct variable path read by the expression, in first-seen order.
    pub fn variable_paths(&self) -> Vec<String> {
        extract_variable_paths(self)
    }

    /// Names of operators the evaluator does not understand.
    pub fn unknown_operators(&self) -> Vec<String> {
        let mut found = Vec::new();
        self.visit(&mut |expr| {
            if let Expr::Op {
                op: Operator::Unknown(name),
                ..
            } = expr
                && !found.contains(name)
            {
                found.push(name.clone());
            }
        });
        found
    }

    fn visit<'e>(&'e self, f: &mut impl FnMut(&'e Expr)) {
        f(self);
        match self {
            Expr::List(items) | Expr::Op { args: items, .. } => {
                for item in items {
                    item.visit(f);
                }
            }
            Expr::Literal(_) | Expr::Var { .. } => {}
        }
    }
}

pub fn extract_variable_paths(expr: &Expr) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut paths = Vec::new();
    expr.visit(&mut |node| {
        if let Expr::Var { path, .. } = node
            && seen.insert(path.as_str())
        {
            paths.push(path.clone());
        }
    });
    paths
}

pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>, warnings: &mut Vec<Warning>) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::List(items) => Value::Array(
            items
                .iter()
                .map(|item| evaluate(item, ctx, warnings))
                .collect(),
        ),
        Expr::Var { path, default } => resolve_variable(path, ctx)
            .cloned()
            .or_else(|| default.clone())
            .unwrap_or(Value::Null),
        Expr::Op { op, args } => evaluate_op(op, args, ctx, warnings),
    }
}

fn evaluate_op(
    op: &Operator,
    args: &[Expr],
    ctx: &EvalContext<'_>,
    warnings: &mut Vec<Warning>,
) -> Value {
    let Some(arity) = op.arity() else {
        tracing::warn!(operator = op.name(), "unknown operator evaluated as false");
        warnings.push(Warning::UnknownOperator {
            operator: op.name().to_string(),
        });
        return Value::Bool(false);
    };
    if !arity.accepts(args.len()) {
        let expected = arity.describe();
        tracing::warn!(
            operator = op.name(),
            expected,
            found = args.len(),
            "operator called with wrong number of arguments"
        );
        warnings.push(Warning::Arity {
            operator: op.name().to_string(),
            expected,
            found: args.len(),
        });
        return Value::Null;
    }

    let mut eval = |expr: &Expr| evaluate(expr, ctx, warnings);
    match op {
        Operator::And => {
            let mut last = Value::Bool(true);
            for arg in args {
                last = eval(arg);
                if !truthy(&last) {
                    return last;
                }
            }
            last
        }
        Operator::Or => {
            let mut last = Value::Bool(false);
            for arg in args {
                last = eval(arg);
                if truthy(&last) {
                    return last;
                }
            }
            last
        }
        Operator::Not => Value::Bool(!truthy(&eval(&args[0]))),
        Operator::If => {
            let mut pairs = args.chunks_exact(2);
            for pair in pairs.by_ref() {
                if truthy(&eval(&pair[0])) {
                    return eval(&pair[1]);
                }
            }
            pairs.remainder().first().map(eval).unwrap_or(Value::Null)
        }
        Operator::Empty => Value::Bool(is_empty(&eval(&args[0]))),
        Operator::Count => Value::from(count(&eval(&args[0]))),
        _ => {
            let left = eval(&args[0]);
            let right = eval(&args[1]);
            Value::Bool(binary(op, &left, &right))
        }
    }
}

fn binary(op: &Operator, left: &Value, right: &Value) -> bool {
    match op {
        Operator::Eq => loose_eq(left, right),
        Operator::Ne => !loose_eq(left, right),
        Operator::StrictEq => strict_eq(left, right),
        Operator::StrictNe => !strict_eq(left, right),
        Operator::Gt => compare(left, right) == Some(Ordering::Greater),
        Operator::Gte => matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Lt => compare(left, right) == Some(Ordering::Less),
        Operator::Lte => matches!(compare(left, right), Some(Ordering::Less | Ordering::Equal)),
        Operator::In => member_of(left, right),
        Operator::Contains => member_of(right, left),
        Operator::StartsWith => match (as_text(left), as_text(right)) {
            (Some(text), Some(prefix)) => text.starts_with(&*prefix),
            _ => false,
        },
        Operator::EndsWith => match (as_text(left), as_text(right)) {
            (Some(text), Some(suffix)) => text.ends_with(&*suffix),
            _ => false,
        },
        _ => false,
    }
}

/// JSONLogic truthiness: empty strings, empty arrays, zero and null are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::String(text) => text.chars().count(),
        Value::Object(map) => map.len(),
        other => usize::from(truthy(other)),
    }
}

/// Best-effort numeric view of a value.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn numeric_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    Some((to_number(left)?, to_number(right)?))
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    if strict_eq(left, right) {
        return true;
    }
    numeric_pair(left, right).is_some_and(|(l, r)| l == r)
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if let Some((l, r)) = numeric_pair(left, right) {
        return l.partial_cmp(&r);
    }
    match (left, right) {
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn member_of(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::String(text) => as_text(needle).is_some_and(|part| text.contains(&*part)),
        _ => false,
    }
}

fn as_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(text) => Some(Cow::Borrowed(text)),
        Value::Number(number) => Some(Cow::Owned(number.to_string())),
        Value::Bool(flag) => Some(Cow::Owned(flag.to_string())),
        _ => None,
    }
}
