use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::error::SchemaError;
use crate::expr::Expr;
use crate::spec::field::Field;
use crate::spec::rule::Rule;
use crate::spec::section::{LayoutRow, Section, Subsection};

/// Payload policy applied by `Snapshot::submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionConfig {
    #[serde(default = "default_strip_hidden")]
    pub strip_hidden: bool,
    #[serde(default)]
    pub strip_disabled: bool,
    /// Name of a transform registered with the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

fn default_strip_hidden() -> bool {
    true
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            strip_hidden: true,
            strip_disabled: false,
            transform: None,
        }
    }
}

/// Top-level form document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub form_rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub globals: Map<String, Value>,
    /// Opaque to the engine; carried for renderers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<Value>,
    #[serde(default)]
    pub submission: SubmissionConfig,
}

fn default_version() -> String {
    "1.0".into()
}

impl Schema {
    /// Parses and structurally checks a schema document.
    pub fn from_json_str(raw: &str) -> Result<Self, SchemaError> {
        let schema: Schema = serde_json::from_str(raw)?;
        schema.check(&EngineConfig::default())?;
        Ok(schema)
    }

    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let schema: Schema = serde_json::from_value(value)?;
        schema.check(&EngineConfig::default())?;
        Ok(schema)
    }

    /// JSON Schema describing the document format itself.
    pub fn document_schema() -> Value {
        serde_json::to_value(schemars::schema_for!(Schema)).unwrap_or(Value::Null)
    }

    /// Every field, in document order, subsections after their section's own fields.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.sections.iter().flat_map(|section| {
            section.fields.iter().chain(
                section
                    .subsections
                    .iter()
                    .flat_map(|subsection| subsection.fields.iter()),
            )
        })
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields().find(|field| field.id == id)
    }

    pub fn subsections(&self) -> impl Iterator<Item = (&Section, &Subsection)> {
        self.sections.iter().flat_map(|section| {
            section
                .subsections
                .iter()
                .map(move |subsection| (section, subsection))
        })
    }

    /// Every rule declared in the document, field rules before form rules.
    pub fn declared_rules(&self) -> impl Iterator<Item = &Rule> {
        self.fields()
            .flat_map(|field| field.rules.iter())
            .chain(self.form_rules.iter())
    }

    /// Structural checks: unique ids, resolvable layout rows and, in strict
    /// mode, no unknown operators or action types.
    pub fn check(&self, config: &EngineConfig) -> Result<(), SchemaError> {
        let mut field_ids = BTreeSet::new();
        for field in self.fields() {
            if !field_ids.insert(field.id.as_str()) {
                return Err(SchemaError::DuplicateField(field.id.clone()));
            }
        }

        let mut section_ids = BTreeSet::new();
        for section in &self.sections {
            if !section_ids.insert(section.id.clone()) {
                return Err(SchemaError::DuplicateSection(section.id.clone()));
            }
            check_rows(&section.id, &section.rows, &section.fields)?;
        }
        for (_, subsection) in self.subsections() {
            if !section_ids.insert(subsection.ui_key()) {
                return Err(SchemaError::DuplicateSection(subsection.id.clone()));
            }
            check_rows(&subsection.id, &subsection.rows, &subsection.fields)?;
        }

        if config.strict_schema {
            self.check_strict()?;
        }
        Ok(())
    }

    fn check_strict(&self) -> Result<(), SchemaError> {
        let mut conditions: Vec<(String, &Expr)> = Vec::new();
        for section in &self.sections {
            if let Some(expr) = &section.visibility_rule {
                conditions.push((format!("section '{}'", section.id), expr));
            }
        }
        for (_, subsection) in self.subsections() {
            if let Some(expr) = &subsection.visibility_rule {
                conditions.push((format!("subsection '{}'", subsection.id), expr));
            }
        }
        for field in self.fields() {
            if let Some(expr) = &field.visibility_rule {
                conditions.push((format!("field '{}'", field.id), expr));
            }
            for validator in &field.validators {
                if let Some(expr) = &validator.when {
                    conditions.push((format!("validator on '{}'", field.id), expr));
                }
            }
        }
        for rule in self.declared_rules() {
            if rule.has_unknown_actions() {
                return Err(SchemaError::UnknownAction(rule.id.clone()));
            }
            conditions.push((format!("rule '{}'", rule.id), &rule.when));
        }

        for (owner, expr) in conditions {
            if let Some(operator) = expr.unknown_operators().into_iter().next() {
                return Err(SchemaError::UnknownOperator { owner, operator });
            }
        }
        Ok(())
    }
}

fn check_rows(owner: &str, rows: &[LayoutRow], fields: &[Field]) -> Result<(), SchemaError> {
    for row in rows {
        for id in &row.fields {
            if !fields.iter().any(|field| &field.id == id) {
                return Err(SchemaError::UnknownLayoutField {
                    section: owner.to_string(),
                    field: id.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn layout_rows_must_reference_own_fields() {
        let err = Schema::from_value(json!({
            "sections": [{
                "id": "main",
                "fields": [{ "id": "a", "type": "text" }],
                "rows": [{ "fields": ["a", "b"] }]
            }]
        }))
        .expect_err("unknown row field");
        assert!(matches!(
            err,
            SchemaError::UnknownLayoutField { section, field } if section == "main" && field == "b"
        ));
    }

    #[test]
    fn strict_mode_rejects_unknown_actions() {
        let schema = Schema::from_value(json!({
            "sections": [{ "id": "main", "fields": [{ "id": "a", "type": "text" }] }],
            "formRules": [{ "id": "odd", "when": true, "then": { "type": "BLINK", "target": "a" } }]
        }))
        .expect("lenient load");
        assert!(schema.check(&EngineConfig::default()).is_ok());
        assert!(matches!(
            schema.check(&EngineConfig::default().with_strict_schema(true)),
            Err(SchemaError::UnknownAction(id)) if id == "odd"
        ));
    }

    #[test]
    fn document_schema_describes_sections() {
        let doc = Schema::document_schema();
        assert_eq!(doc["type"], json!("object"));
        assert!(doc["properties"].get("sections").is_some());
        assert_eq!(doc["required"], json!(["sections"]));
    }
}
