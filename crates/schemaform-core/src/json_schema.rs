use serde_json::{Map, Value};

use crate::expr::to_number;
use crate::snapshot::Snapshot;
use crate::spec::{Field, FieldType, OptionItem, Validator, ValidatorKind};
use crate::template::{ResolutionMode, resolve_value};
use crate::validation::{active_fields, active_validators};

/// JSON Schema of the payload the form currently accepts.
///
/// Only effectively visible and enabled fields appear; their constraints
/// come from the validators active in this snapshot.
pub fn active_json_schema(snapshot: &Snapshot) -> Value {
    let validators = active_validators(snapshot);
    let ctx = snapshot.eval_context();
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in active_fields(snapshot) {
        let field_validators = validators.get(&field.id).map(Vec::as_slice).unwrap_or_default();
        let options = snapshot
            .ui
            .fields
            .get(&field.id)
            .and_then(|ui| ui.options.as_deref());
        let default = field.default_value.as_ref().map(|default| {
            resolve_value(default, &ctx, ResolutionMode::Relaxed).unwrap_or_else(|_| default.clone())
        });
        properties.insert(
            field.id.clone(),
            field_schema(field, field_validators, options, default),
        );
        if field_validators
            .iter()
            .any(|validator| validator.kind == ValidatorKind::Required)
        {
            required.push(Value::String(field.id.clone()));
        }
    }

    let mut root = Map::new();
    root.insert("type".into(), Value::String("object".into()));
    if let Some(title) = &snapshot.schema.title {
        root.insert("title".into(), Value::String(title.clone()));
    }
    root.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        root.insert("required".into(), Value::Array(required));
    }

    Value::Object(root)
}

fn field_schema(
    field: &Field,
    validators: &[Validator],
    options: Option<&[OptionItem]>,
    default: Option<Value>,
) -> Value {
    let mut schema = Map::new();
    match field.kind {
        FieldType::Number | FieldType::Currency => {
            schema.insert("type".into(), Value::String("number".into()));
        }
        FieldType::Integer => {
            schema.insert("type".into(), Value::String("integer".into()));
        }
        FieldType::Checkbox | FieldType::Switch => {
            schema.insert("type".into(), Value::String("boolean".into()));
        }
        FieldType::Multiselect | FieldType::CheckboxGroup | FieldType::Tags | FieldType::File => {
            schema.insert("type".into(), Value::String("array".into()));
            let mut items = Map::new();
            if let Some(options) = options {
                items.insert("enum".into(), option_values(options));
            }
            schema.insert("items".into(), Value::Object(items));
        }
        FieldType::Select | FieldType::Radio => {
            if let Some(options) = options {
                schema.insert("enum".into(), option_values(options));
            }
        }
        FieldType::Email => {
            schema.insert("type".into(), Value::String("string".into()));
            schema.insert("format".into(), Value::String("email".into()));
        }
        FieldType::Url => {
            schema.insert("type".into(), Value::String("string".into()));
            schema.insert("format".into(), Value::String("uri".into()));
        }
        FieldType::Date => {
            schema.insert("type".into(), Value::String("string".into()));
            schema.insert("format".into(), Value::String("date".into()));
        }
        FieldType::Time => {
            schema.insert("type".into(), Value::String("string".into()));
            schema.insert("format".into(), Value::String("time".into()));
        }
        FieldType::Datetime => {
            schema.insert("type".into(), Value::String("string".into()));
            schema.insert("format".into(), Value::String("date-time".into()));
        }
        FieldType::Text
        | FieldType::Textarea
        | FieldType::Password
        | FieldType::Phone
        | FieldType::Hidden => {
            schema.insert("type".into(), Value::String("string".into()));
        }
    }

    if let Some(label) = &field.label {
        schema.insert("title".into(), Value::String(label.clone()));
    }
    if let Some(help) = &field.help_text {
        schema.insert("description".into(), Value::String(help.clone()));
    }

    let array = field.kind.is_multi_value();
    for validator in validators {
        let bound = validator.value.as_ref();
        match validator.kind {
            ValidatorKind::Min => {
                if let Some(num) = bound.and_then(number) {
                    schema.insert("minimum".into(), num);
                }
            }
            ValidatorKind::Max => {
                if let Some(num) = bound.and_then(number) {
                    schema.insert("maximum".into(), num);
                }
            }
            ValidatorKind::MinLength => {
                if let Some(len) = bound.and_then(count) {
                    schema.insert(length_key(array, true).into(), len);
                }
            }
            ValidatorKind::MaxLength => {
                if let Some(len) = bound.and_then(count) {
                    schema.insert(length_key(array, false).into(), len);
                }
            }
            ValidatorKind::Length => match bound {
                Some(Value::Object(range)) => {
                    if let Some(min) = range.get("min").and_then(count) {
                        schema.insert(length_key(array, true).into(), min);
                    }
                    if let Some(max) = range.get("max").and_then(count) {
                        schema.insert(length_key(array, false).into(), max);
                    }
                }
                Some(exact) => {
                    if let Some(len) = count(exact) {
                        schema.insert(length_key(array, true).into(), len.clone());
                        schema.insert(length_key(array, false).into(), len);
                    }
                }
                None => {}
            },
            ValidatorKind::Pattern => {
                if let Some(pattern) = bound.and_then(Value::as_str) {
                    schema.insert("pattern".into(), Value::String(pattern.to_string()));
                }
            }
            ValidatorKind::Email => {
                schema.insert("format".into(), Value::String("email".into()));
            }
            ValidatorKind::Url => {
                schema.insert("format".into(), Value::String("uri".into()));
            }
            ValidatorKind::Required | ValidatorKind::Custom => {}
        }
    }

    if let Some(default) = default {
        schema.insert("default".into(), default);
    }

    Value::Object(schema)
}

fn option_values(options: &[OptionItem]) -> Value {
    Value::Array(options.iter().map(|option| option.value.clone()).collect())
}

fn length_key(array: bool, min: bool) -> &'static str {
    match (array, min) {
        (true, true) => "minItems",
        (true, false) => "maxItems",
        (false, true) => "minLength",
        (false, false) => "maxLength",
    }
}

fn number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        other => to_number(other)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
    }
}

fn count(value: &Value) -> Option<Value> {
    to_number(value)
        .filter(|n| *n >= 0.0)
        .map(|n| Value::from(n as u64))
}
