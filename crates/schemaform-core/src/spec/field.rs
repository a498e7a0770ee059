use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::expr::Expr;
use crate::spec::rule::Rule;
use crate::spec::validator::Validator;

/// Supported field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Text,
    Textarea,
    Email,
    Url,
    Password,
    Phone,
    Number,
    Integer,
    Currency,
    Date,
    Time,
    Datetime,
    Select,
    Radio,
    Multiselect,
    CheckboxGroup,
    Tags,
    #[serde(alias = "boolean")]
    Checkbox,
    #[serde(alias = "toggle")]
    Switch,
    File,
    Hidden,
}

impl FieldType {
    pub fn is_boolean(self) -> bool {
        matches!(self, FieldType::Checkbox | FieldType::Switch)
    }

    pub fn is_multi_value(self) -> bool {
        matches!(
            self,
            FieldType::Multiselect | FieldType::CheckboxGroup | FieldType::Tags | FieldType::File
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Number | FieldType::Integer | FieldType::Currency
        )
    }

    /// Value a field starts with when it declares no default.
    pub fn empty_value(self) -> Value {
        if self.is_boolean() {
            Value::Bool(false)
        } else if self.is_multi_value() {
            Value::Array(Vec::new())
        } else if self.is_numeric() {
            Value::Null
        } else {
            Value::String(String::new())
        }
    }
}

/// A selectable `{label, value}` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptionItem {
    pub label: String,
    pub value: Value,
}

impl OptionItem {
    pub fn new(label: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Descriptor for options fetched by the host; the engine only reads `depends_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOptions {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_path: Option<String>,
    #[serde(default = "default_label_key")]
    pub label_key: String,
    #[serde(default = "default_value_key")]
    pub value_key: String,
}

fn default_method() -> String {
    "GET".into()
}

fn default_label_key() -> String {
    "label".into()
}

fn default_value_key() -> String {
    "value".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OptionsSource {
    Static(Vec<OptionItem>),
    Remote(RemoteOptions),
}

impl OptionsSource {
    pub fn as_static(&self) -> Option<&[OptionItem]> {
        match self {
            OptionsSource::Static(items) => Some(items),
            OptionsSource::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteOptions> {
        match self {
            OptionsSource::Static(_) => None,
            OptionsSource::Remote(remote) => Some(remote),
        }
    }
}

/// Definition of a single input inside a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_rule: Option<Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<OptionsSource>,
}

impl Field {
    pub fn remote_options(&self) -> Option<&RemoteOptions> {
        self.options.as_ref().and_then(OptionsSource::as_remote)
    }
}
