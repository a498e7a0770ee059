use std::collections::BTreeMap;

use schemaform_core::{
    ConfigError, CustomValidators, EngineConfig, EngineError, FieldText, OptionsError,
    OptionsRequest, OptionsResolver, ResolutionMode, Schema, SchemaError, Snapshot, TemplateError,
    TransformRegistry, ValidationReport, Validator, active_json_schema, resolve_field_text,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

pub use schemaform_core;

#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    pub schema_json: String,
    pub globals_json: Option<String>,
    pub params_json: Option<String>,
    /// TOML engine settings; takes precedence over `engine` when set.
    pub engine_toml: Option<String>,
    pub engine: EngineConfig,
}

impl SessionConfig {
    pub fn new(schema_json: impl Into<String>) -> Self {
        Self {
            schema_json: schema_json.into(),
            ..Self::default()
        }
    }

    pub fn with_globals_json(mut self, globals_json: impl Into<String>) -> Self {
        self.globals_json = Some(globals_json.into());
        self
    }

    pub fn with_params_json(mut self, params_json: impl Into<String>) -> Self {
        self.params_json = Some(params_json.into());
        self
    }

    pub fn with_engine_toml(mut self, engine_toml: impl Into<String>) -> Self {
        self.engine_toml = Some(engine_toml.into());
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("{0} must be a JSON object")]
    NotAnObject(&'static str),
    #[error("invalid patch: {0}")]
    InvalidPatch(String),
}

/// Outcome of applying a patch of field values.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOutcome {
    pub changed: Vec<String>,
    /// Remote-options requests the host should resolve next.
    pub option_requests: Vec<OptionsRequest>,
}

/// One form session: the current snapshot plus host-registered behavior.
#[derive(Debug)]
pub struct FormSession {
    initial: Snapshot,
    snapshot: Snapshot,
    customs: CustomValidators,
    transforms: TransformRegistry,
}

impl FormSession {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let schema = Schema::from_json_str(&config.schema_json)?;
        let globals = parse_object(config.globals_json.as_deref(), "globals_json")?;
        let params = parse_object(config.params_json.as_deref(), "params_json")?;
        let engine = match &config.engine_toml {
            Some(raw) => EngineConfig::from_toml_str(raw)?,
            None => config.engine,
        };

        let snapshot = Snapshot::builder(schema)
            .globals(globals)
            .params(params)
            .config(engine)
            .build()?;
        for warning in snapshot.warnings() {
            tracing::warn!(%warning, "form session created with warning");
        }
        tracing::info!(
            form = snapshot.schema().id.as_deref().unwrap_or("<anonymous>"),
            fields = snapshot.values().len(),
            "form session created"
        );

        Ok(Self {
            initial: snapshot.clone(),
            snapshot,
            customs: CustomValidators::new(),
            transforms: TransformRegistry::new(),
        })
    }

    pub fn with_custom_validator<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value, &Validator, &Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        self.customs.register(name, check);
        self
    }

    pub fn with_transform<F>(mut self, name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<Map<String, Value>, String> + Send + Sync + 'static,
    {
        self.transforms.register(name, transform);
        self
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Commits one field value; on error the session keeps its previous snapshot.
    pub fn set_value(&mut self, field_id: &str, value: Value) -> Result<&Snapshot, SessionError> {
        let next = self.snapshot.update(field_id, value)?;
        for warning in next.warnings() {
            tracing::warn!(field = field_id, %warning, "update raised warning");
        }
        self.snapshot = next;
        Ok(&self.snapshot)
    }

    pub fn set_value_json(
        &mut self,
        field_id: &str,
        value_json: &str,
    ) -> Result<&Snapshot, SessionError> {
        let value: Value = serde_json::from_str(value_json)?;
        self.set_value(field_id, value)
    }

    /// Applies a `{fieldId: value}` object; either every entry lands or none.
    pub fn submit_patch_json(&mut self, patch_json: &str) -> Result<PatchOutcome, SessionError> {
        let patch: Value = serde_json::from_str(patch_json)?;
        let patch = patch.as_object().ok_or_else(|| {
            SessionError::InvalidPatch("patch_json must be a JSON object of field id -> value".into())
        })?;
        if patch.is_empty() {
            return Err(SessionError::InvalidPatch("patch_json cannot be empty".into()));
        }

        let mut working = self.snapshot.clone();
        let mut changed = Vec::new();
        for (field_id, value) in patch {
            working = working.update(field_id, value.clone())?;
            changed.push(field_id.clone());
        }

        let mut option_requests: Vec<OptionsRequest> = Vec::new();
        for field_id in &changed {
            for request in working.pending_option_requests(field_id) {
                if !option_requests.iter().any(|known| known.field == request.field) {
                    option_requests.push(request);
                }
            }
        }
        tracing::debug!(
            fields = changed.len(),
            option_requests = option_requests.len(),
            "patch applied"
        );
        self.snapshot = working;
        Ok(PatchOutcome {
            changed,
            option_requests,
        })
    }

    /// Resolves options for fields depending on `changed_field` and stores them.
    pub fn refresh_options(
        &mut self,
        changed_field: &str,
        resolver: &mut dyn OptionsResolver,
    ) -> Result<usize, SessionError> {
        let requests = self.snapshot.pending_option_requests(changed_field);
        self.snapshot = self.snapshot.apply_option_requests(&requests, resolver)?;
        Ok(requests.len())
    }

    /// Loads options for every remote field whose dependencies are already filled in.
    pub fn load_initial_options(
        &mut self,
        resolver: &mut dyn OptionsResolver,
    ) -> Result<usize, SessionError> {
        let requests = self.snapshot.initial_option_requests();
        self.snapshot = self.snapshot.apply_option_requests(&requests, resolver)?;
        Ok(requests.len())
    }

    pub fn reset(&mut self) {
        tracing::debug!("form session reset");
        self.snapshot = self.initial.clone();
    }

    /// Validates current values and writes the messages into the snapshot.
    pub fn validate(&mut self) -> ValidationReport {
        let report = self.snapshot.validate(&self.customs);
        self.snapshot = self.snapshot.with_validation(&report);
        report
    }

    pub fn validate_json(&mut self) -> Result<String, SessionError> {
        let report = self.validate();
        Ok(serde_json::to_string(&report)?)
    }

    pub fn payload_json(&self, strip_hidden: bool, strip_disabled: bool) -> Result<String, SessionError> {
        let payload = self.snapshot.build_payload(strip_hidden, strip_disabled);
        Ok(serde_json::to_string(&payload)?)
    }

    /// Submission payload per the schema's `submission` block.
    pub fn submit_json(&self) -> Result<String, SessionError> {
        let payload = self.snapshot.submit(&self.transforms)?;
        Ok(serde_json::to_string(&payload)?)
    }

    /// Render view: values, ui state, errors, warnings and resolved field text.
    pub fn ui_json(&self) -> Result<String, SessionError> {
        let ctx = self.snapshot.eval_context();
        let mut text: BTreeMap<&str, FieldText> = BTreeMap::new();
        for field in self.snapshot.schema().fields() {
            let resolved = resolve_field_text(field, &ctx, ResolutionMode::Relaxed)?;
            if resolved != FieldText::default() {
                text.insert(&field.id, resolved);
            }
        }
        let view = json!({
            "values": self.snapshot.values(),
            "ui": self.snapshot.ui(),
            "errors": self.snapshot.errors(),
            "warnings": self.snapshot.warnings(),
            "text": text,
        });
        Ok(serde_json::to_string(&view)?)
    }

    pub fn active_schema_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(&active_json_schema(&self.snapshot))?)
    }
}

fn parse_object(raw: Option<&str>, name: &'static str) -> Result<Map<String, Value>, SessionError> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(SessionError::NotAnObject(name)),
    }
}
