use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::engine::apply_actions;
use crate::error::Warning;
use crate::expr::{EvalContext, is_empty, to_number};
use crate::snapshot::Snapshot;
use crate::spec::{Action, Field, Validator, ValidatorKind};
use crate::template::{ResolutionMode, resolve_value};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap_or_else(|err| panic!("email regex: {err}"))
});

/// Compiled `pattern` validators, keyed by source.
static PATTERNS: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn compiled_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut cache = PATTERNS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(regex) = cache.get(pattern) {
        return Ok(regex.clone());
    }
    let regex = Regex::new(pattern)?;
    cache.insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

/// Predicate behind a `custom` validator: `(value, validator, all values) -> valid`.
pub type CustomCheck = dyn Fn(&Value, &Validator, &Map<String, Value>) -> bool + Send + Sync;

/// Named predicates the host registers for `custom` validators.
#[derive(Clone, Default)]
pub struct CustomValidators {
    checks: BTreeMap<String, Arc<CustomCheck>>,
}

impl CustomValidators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, check: F) -> &mut Self
    where
        F: Fn(&Value, &Validator, &Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        self.checks.insert(name.into(), Arc::new(check));
        self
    }

    pub fn with<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value, &Validator, &Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        self.register(name, check);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CustomCheck>> {
        self.checks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }
}

impl fmt::Debug for CustomValidators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValidators")
            .field("names", &self.checks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// First failing validator of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub kind: ValidatorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: BTreeMap<String, FieldError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl ValidationReport {
    pub fn message(&self, field_id: &str) -> Option<&str> {
        self.errors.get(field_id).map(|error| error.message.as_str())
    }
}

/// Validators that currently apply, keyed by field id.
///
/// Hidden or disabled fields (directly or through their section) are left
/// out, as are validators whose `when` condition is false.
pub fn active_validators(snapshot: &Snapshot) -> BTreeMap<String, Vec<Validator>> {
    let mut warnings = Vec::new();
    active_validators_into(snapshot, &mut warnings)
}

fn active_validators_into(
    snapshot: &Snapshot,
    warnings: &mut Vec<Warning>,
) -> BTreeMap<String, Vec<Validator>> {
    let ctx = snapshot.eval_context();
    let mut active = BTreeMap::new();
    for field in active_fields(snapshot) {
        let validators: Vec<Validator> = field
            .validators
            .iter()
            .filter(|validator| {
                validator
                    .when
                    .as_ref()
                    .is_none_or(|when| when.evaluate_bool(&ctx, warnings))
            })
            .map(|validator| resolve_bound(validator, &ctx))
            .collect();
        if !validators.is_empty() {
            active.insert(field.id.clone(), validators);
        }
    }
    active
}

/// Fields that are effectively visible and enabled, in document order.
pub fn active_fields(snapshot: &Snapshot) -> impl Iterator<Item = &Field> {
    snapshot
        .schema
        .fields()
        .filter(move |field| {
            snapshot.is_field_visible(&field.id) && !snapshot.is_field_disabled(&field.id)
        })
}

/// Runs every active validator against the current values.
pub fn validate(snapshot: &Snapshot, customs: &CustomValidators) -> ValidationReport {
    let mut warnings = Vec::new();
    let active = active_validators_into(snapshot, &mut warnings);
    let mut errors = BTreeMap::new();

    for (field_id, validators) in &active {
        let value = snapshot.values.get(field_id).unwrap_or(&Value::Null);
        let kind = snapshot.schema.field(field_id).map(|field| field.kind);
        for validator in validators {
            let passed = check(field_id, value, validator, snapshot, customs, &mut warnings)
                && !(validator.kind == ValidatorKind::Required
                    && kind.is_some_and(|kind| kind.is_boolean())
                    && value == &Value::Bool(false));
            if !passed {
                errors.insert(
                    field_id.clone(),
                    FieldError {
                        kind: validator.kind,
                        message: validator
                            .message
                            .clone()
                            .unwrap_or_else(|| default_message(validator)),
                    },
                );
                break;
            }
        }
    }

    tracing::debug!(
        fields = active.len(),
        failed = errors.len(),
        "validation finished"
    );
    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

impl Snapshot {
    /// Applies a report: failing fields get their message, every other field is cleared.
    pub fn with_validation(&self, report: &ValidationReport) -> Snapshot {
        let actions: Vec<Action> = self
            .schema
            .fields()
            .map(|field| match report.errors.get(&field.id) {
                Some(error) => Action::SetError {
                    target: field.id.clone(),
                    message: error.message.clone(),
                },
                None => Action::ClearError {
                    target: field.id.clone(),
                },
            })
            .collect();
        apply_actions(&actions, self)
    }

    pub fn validate(&self, customs: &CustomValidators) -> ValidationReport {
        validate(self, customs)
    }
}

/// Validator with a `${...}` bound replaced by the value it references.
fn resolve_bound(validator: &Validator, ctx: &EvalContext<'_>) -> Validator {
    let mut resolved = validator.clone();
    if let Some(value) = &validator.value {
        resolved.value =
            Some(resolve_value(value, ctx, ResolutionMode::Relaxed).unwrap_or_else(|_| value.clone()));
    }
    resolved
}

fn check(
    field_id: &str,
    value: &Value,
    validator: &Validator,
    snapshot: &Snapshot,
    customs: &CustomValidators,
    warnings: &mut Vec<Warning>,
) -> bool {
    let missing = is_missing(value);
    if validator.kind == ValidatorKind::Required {
        return !missing;
    }
    if missing {
        return true;
    }
    let bound = validator.value.as_ref().unwrap_or(&Value::Null);

    match validator.kind {
        ValidatorKind::Required => true,
        ValidatorKind::Min => order(value, bound) != Some(Ordering::Less),
        ValidatorKind::Max => order(value, bound) != Some(Ordering::Greater),
        ValidatorKind::MinLength => length_of(value)
            .zip(as_len(bound))
            .is_none_or(|(len, min)| len >= min),
        ValidatorKind::MaxLength => length_of(value)
            .zip(as_len(bound))
            .is_none_or(|(len, max)| len <= max),
        ValidatorKind::Length => {
            let Some(len) = length_of(value) else {
                return true;
            };
            match bound {
                Value::Object(range) => {
                    range.get("min").and_then(as_len).is_none_or(|min| len >= min)
                        && range.get("max").and_then(as_len).is_none_or(|max| len <= max)
                }
                other => as_len(other).is_none_or(|exact| len == exact),
            }
        }
        ValidatorKind::Pattern => {
            let (Some(text), Some(pattern)) = (value.as_str(), bound.as_str()) else {
                return true;
            };
            match compiled_pattern(pattern) {
                Ok(regex) => regex.is_match(text),
                Err(err) => {
                    tracing::warn!(field = field_id, pattern, %err, "invalid validator pattern");
                    warnings.push(Warning::InvalidPattern {
                        field: field_id.to_string(),
                        pattern: pattern.to_string(),
                    });
                    true
                }
            }
        }
        ValidatorKind::Email => value.as_str().is_some_and(|text| EMAIL.is_match(text.trim())),
        ValidatorKind::Url => value
            .as_str()
            .and_then(|text| Url::parse(text.trim()).ok())
            .is_some_and(|url| url.has_host()),
        ValidatorKind::Custom => {
            let name = custom_name(bound).unwrap_or_default();
            match customs.get(name) {
                Some(predicate) => predicate(value, validator, &snapshot.values),
                None => {
                    tracing::warn!(field = field_id, name, "custom validator not registered");
                    warnings.push(Warning::UnknownCustomValidator {
                        field: field_id.to_string(),
                        name: name.to_string(),
                    });
                    true
                }
            }
        }
    }
}

/// Name of a custom validator: `"name"` or `{"name": "..."}`.
fn custom_name(bound: &Value) -> Option<&str> {
    match bound {
        Value::String(name) => Some(name),
        Value::Object(map) => map.get("name").and_then(Value::as_str),
        _ => None,
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::String(text) => text.trim().is_empty(),
        other => is_empty(other),
    }
}

fn order(value: &Value, bound: &Value) -> Option<Ordering> {
    if let (Some(left), Some(right)) = (to_number(value), to_number(bound)) {
        return left.partial_cmp(&right);
    }
    match (value.as_str(), bound.as_str()) {
        (Some(left), Some(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(text) => Some(text.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

fn as_len(value: &Value) -> Option<usize> {
    to_number(value)
        .filter(|n| *n >= 0.0)
        .map(|n| n as usize)
}

fn default_message(validator: &Validator) -> String {
    let bound = validator
        .value
        .as_ref()
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    match validator.kind {
        ValidatorKind::Required => "This field is required".into(),
        ValidatorKind::Min => format!("Must be at least {bound}"),
        ValidatorKind::Max => format!("Must be at most {bound}"),
        ValidatorKind::MinLength => format!("Must be at least {bound} characters"),
        ValidatorKind::MaxLength => format!("Must be at most {bound} characters"),
        ValidatorKind::Length => match validator.value.as_ref() {
            Some(Value::Object(range)) => {
                let min = range.get("min").map(Value::to_string).unwrap_or_else(|| "0".into());
                match range.get("max") {
                    Some(max) => format!("Must be between {min} and {max} characters"),
                    None => format!("Must be at least {min} characters"),
                }
            }
            _ => format!("Must be exactly {bound} characters"),
        },
        ValidatorKind::Pattern => "Invalid format".into(),
        ValidatorKind::Email => "Invalid email address".into(),
        ValidatorKind::Url => "Invalid URL".into(),
        ValidatorKind::Custom => "Invalid value".into(),
    }
}
