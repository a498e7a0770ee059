use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::expr::{EvalContext, resolve_variable};
use crate::spec::Field;

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{\s*([^{}\s]+)\s*\}").unwrap_or_else(|err| panic!("token regex: {err}"))
});

/// How placeholders whose path does not resolve are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolutionMode {
    /// Missing values emit an error.
    Strict,
    /// Missing values render as an empty string.
    #[default]
    Relaxed,
    /// Missing values leave the `${...}` token untouched.
    Preserve,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template references missing value '{0}'")]
    Missing(String),
}

/// Substitutes every `${path}` token in `template`.
pub fn resolve_string(
    template: &str,
    ctx: &EvalContext<'_>,
    mode: ResolutionMode,
) -> Result<String, TemplateError> {
    let mut missing = None;
    let rendered = TOKEN.replace_all(template, |caps: &Captures<'_>| {
        let path = &caps[1];
        match resolve_variable(path, ctx).filter(|value| !value.is_null()) {
            Some(value) => render(value).into_owned(),
            None => {
                if missing.is_none() {
                    missing = Some(path.to_string());
                }
                match mode {
                    ResolutionMode::Preserve => caps[0].to_string(),
                    ResolutionMode::Strict | ResolutionMode::Relaxed => String::new(),
                }
            }
        }
    });

    match (mode, missing) {
        (ResolutionMode::Strict, Some(path)) => Err(TemplateError::Missing(path)),
        _ => Ok(rendered.into_owned()),
    }
}

/// Resolves templates nested anywhere inside a JSON value.
///
/// A string made of exactly one token takes the referenced value with its
/// JSON type, so `"${globals.limit}"` can default a number field.
pub fn resolve_value(
    value: &Value,
    ctx: &EvalContext<'_>,
    mode: ResolutionMode,
) -> Result<Value, TemplateError> {
    match value {
        Value::String(text) => {
            if let Some(path) = sole_token(text)
                && let Some(found) = resolve_variable(path, ctx).filter(|found| !found.is_null())
            {
                return Ok(found.clone());
            }
            resolve_string(text, ctx, mode).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, ctx, mode))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                out.insert(key.clone(), resolve_value(item, ctx, mode)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn sole_token(text: &str) -> Option<&str> {
    let caps = TOKEN.captures(text)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == text.len() {
        caps.get(1).map(|path| path.as_str())
    } else {
        None
    }
}

fn render(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}

/// Display strings of a field with their placeholders resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldText {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
}

pub fn resolve_field_text(
    field: &Field,
    ctx: &EvalContext<'_>,
    mode: ResolutionMode,
) -> Result<FieldText, TemplateError> {
    let resolve = |text: &Option<String>| {
        text.as_deref()
            .map(|text| resolve_string(text, ctx, mode))
            .transpose()
    };
    Ok(FieldText {
        label: resolve(&field.label)?,
        placeholder: resolve(&field.placeholder)?,
        help_text: resolve(&field.help_text)?,
    })
}
