use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::deps::DependencyGraph;
use crate::engine::{apply_in_place, evaluate_rules_into};
use crate::error::{EngineError, Warning};
use crate::expr::EvalContext;
use crate::spec::{Action, OptionItem, OptionsSource, Schema, subsection_key};
use crate::template::{ResolutionMode, resolve_value};

/// Visibility and enablement of a section or subsection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionUi {
    pub visible: bool,
    pub disabled: bool,
}

/// Per-field render state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldUi {
    pub visible: bool,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<OptionItem>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_options: Vec<Value>,
}

/// UI state keyed by section (or `subsection_<id>`) and field id.
///
/// Entries are shared between snapshots until an action changes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UiState {
    pub sections: BTreeMap<String, Arc<SectionUi>>,
    pub fields: BTreeMap<String, Arc<FieldUi>>,
}

/// Immutable state of one form session.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub(crate) values: Map<String, Value>,
    pub(crate) ui: UiState,
    pub(crate) errors: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) warnings: Vec<Warning>,
    #[serde(skip)]
    pub(crate) schema: Arc<Schema>,
    #[serde(skip)]
    pub(crate) globals: Arc<Map<String, Value>>,
    #[serde(skip)]
    pub(crate) params: Arc<Map<String, Value>>,
    #[serde(skip)]
    pub(crate) deps: Arc<DependencyGraph>,
    #[serde(skip)]
    pub(crate) config: Arc<EngineConfig>,
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
            && self.ui == other.ui
            && self.errors == other.errors
            && self.warnings == other.warnings
            && self.globals == other.globals
            && self.params == other.params
    }
}

/// Builds the first snapshot of a session.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    schema: Arc<Schema>,
    globals: Map<String, Value>,
    params: Map<String, Value>,
    config: EngineConfig,
}

impl SnapshotBuilder {
    pub fn new(schema: impl Into<Arc<Schema>>) -> Self {
        Self {
            schema: schema.into(),
            globals: Map::new(),
            params: Map::new(),
            config: EngineConfig::default(),
        }
    }

    /// Caller globals; they override keys of the schema's own `globals`.
    pub fn globals(mut self, globals: Map<String, Value>) -> Self {
        self.globals = globals;
        self
    }

    pub fn params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Snapshot, EngineError> {
        self.config.validate()?;
        let deps = DependencyGraph::build_with(&self.schema, &self.config)?;
        let mut globals = self.schema.globals.clone();
        globals.extend(self.globals);

        let mut snapshot = Snapshot {
            values: Map::new(),
            ui: seed_ui(&self.schema),
            errors: BTreeMap::new(),
            warnings: deps.cycle_warnings(),
            schema: self.schema,
            globals: Arc::new(globals),
            params: Arc::new(self.params),
            deps: Arc::new(deps),
            config: Arc::new(self.config),
        };
        snapshot.values = initial_values(&snapshot);

        let mut warnings = Vec::new();
        let actions = evaluate_rules_into(&snapshot.deps.order, &snapshot, None, &mut warnings);
        let discard =
            snapshot.config.discard_on_eval_warning && warnings.iter().any(Warning::is_evaluation);
        if discard {
            tracing::warn!(
                warnings = warnings.len(),
                "initial rule pass discarded after evaluation warnings"
            );
        } else {
            apply_in_place(&mut snapshot, &actions);
        }
        snapshot.warnings.extend(warnings);
        tracing::debug!(
            fields = snapshot.deps.fields.len(),
            rules = snapshot.deps.order.len(),
            "snapshot created"
        );
        Ok(snapshot)
    }
}

fn seed_ui(schema: &Schema) -> UiState {
    let mut ui = UiState::default();
    for section in &schema.sections {
        ui.sections.insert(
            section.id.clone(),
            Arc::new(SectionUi {
                visible: true,
                disabled: section.disabled,
            }),
        );
        for subsection in &section.subsections {
            ui.sections.insert(
                subsection_key(&subsection.id),
                Arc::new(SectionUi {
                    visible: true,
                    disabled: subsection.disabled,
                }),
            );
        }
    }
    for field in schema.fields() {
        ui.fields.insert(
            field.id.clone(),
            Arc::new(FieldUi {
                visible: true,
                disabled: field.disabled,
                error: None,
                options: field
                    .options
                    .as_ref()
                    .and_then(OptionsSource::as_static)
                    .map(<[OptionItem]>::to_vec),
                disabled_options: Vec::new(),
            }),
        );
    }
    ui
}

fn initial_values(snapshot: &Snapshot) -> Map<String, Value> {
    let mut values = Map::new();
    for field in snapshot.schema.fields() {
        let value = match &field.default_value {
            Some(default) => {
                let ctx = snapshot.eval_context().with_data(&values);
                resolve_value(default, &ctx, ResolutionMode::Relaxed)
                    .unwrap_or_else(|_| default.clone())
            }
            None => field.kind.empty_value(),
        };
        values.insert(field.id.clone(), value);
    }
    values
}

impl Snapshot {
    /// Starts a session with the default engine configuration.
    pub fn create(
        schema: impl Into<Arc<Schema>>,
        globals: Map<String, Value>,
    ) -> Result<Snapshot, EngineError> {
        SnapshotBuilder::new(schema).globals(globals).build()
    }

    pub fn builder(schema: impl Into<Arc<Schema>>) -> SnapshotBuilder {
        SnapshotBuilder::new(schema)
    }

    /// Fresh snapshot for the same schema, globals, params and config.
    pub fn reset(&self) -> Result<Snapshot, EngineError> {
        SnapshotBuilder::new(self.schema.clone())
            .globals((*self.globals).clone())
            .params((*self.params).clone())
            .config((*self.config).clone())
            .build()
    }

    /// Sets one field and re-runs only the rules that depend on it.
    ///
    /// Rules reading fields written through `SET_VALUE` are re-run in later
    /// passes, up to `EngineConfig::max_passes`.
    pub fn update(&self, field_id: &str, value: Value) -> Result<Snapshot, EngineError> {
        if !self.deps.has_field(field_id) {
            return Err(EngineError::UnknownField(field_id.to_string()));
        }

        let mut next = self.clone();
        next.warnings.clear();
        next.values.insert(field_id.to_string(), value);

        let mut warnings = Vec::new();
        let mut changed = vec![field_id.to_string()];
        let mut passes = 0;
        while !changed.is_empty() {
            if passes == next.config.max_passes {
                tracing::warn!(field = field_id, passes, "cascading update stopped");
                warnings.push(Warning::PassLimit {
                    field: field_id.to_string(),
                    passes,
                });
                break;
            }
            passes += 1;

            let mut rule_ids: Vec<String> = Vec::new();
            for field in &changed {
                for rule_id in next.deps.rules_for_field(field) {
                    if !rule_ids.contains(rule_id) {
                        rule_ids.push(rule_id.clone());
                    }
                }
            }
            if rule_ids.is_empty() {
                break;
            }
            tracing::debug!(
                field = field_id,
                pass = passes,
                rules = rule_ids.len(),
                "re-evaluating dependent rules"
            );

            let actions = evaluate_rules_into(&rule_ids, &next, None, &mut warnings);
            changed = written_changes(&next, &actions);
            apply_in_place(&mut next, &actions);
        }

        if next.config.discard_on_eval_warning && warnings.iter().any(Warning::is_evaluation) {
            return Err(EngineError::EvaluationDiscarded(warnings));
        }
        next.warnings = warnings;
        Ok(next)
    }

    /// Copy of `values`, optionally without hidden and/or disabled fields.
    pub fn build_payload(&self, strip_hidden: bool, strip_disabled: bool) -> Map<String, Value> {
        self.values
            .iter()
            .filter(|(id, _)| !(strip_hidden && !self.is_field_visible(id)))
            .filter(|(id, _)| !(strip_disabled && self.is_field_disabled(id)))
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    }

    /// Stores an options list obtained from a resolver.
    pub fn set_options(&self, field_id: &str, options: Vec<OptionItem>) -> Snapshot {
        crate::engine::apply_actions(
            &[Action::SetOptions {
                target: field_id.to_string(),
                options,
            }],
            self,
        )
    }

    /// Field visibility combined with its section and subsection.
    pub fn is_field_visible(&self, field_id: &str) -> bool {
        let Some(field) = self.ui.fields.get(field_id) else {
            return false;
        };
        field.visible && self.containers(field_id).all(|section| section.visible)
    }

    /// Field disablement combined with its section and subsection.
    pub fn is_field_disabled(&self, field_id: &str) -> bool {
        let Some(field) = self.ui.fields.get(field_id) else {
            return false;
        };
        field.disabled || self.containers(field_id).any(|section| section.disabled)
    }

    fn containers(&self, field_id: &str) -> impl Iterator<Item = &SectionUi> {
        let location = self.deps.location(field_id);
        let section = location.and_then(|loc| self.ui.sections.get(&loc.section));
        let subsection = location
            .and_then(|loc| loc.subsection.as_deref())
            .and_then(|id| self.ui.sections.get(&subsection_key(id)));
        section.into_iter().chain(subsection).map(Arc::as_ref)
    }

    /// Expression context over current values, globals and params.
    pub fn eval_context(&self) -> EvalContext<'_> {
        EvalContext::new(&self.values, &self.globals, &self.params)
            .with_resolution(self.config.variable_resolution)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn value(&self, field_id: &str) -> Option<&Value> {
        self.values.get(field_id)
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn field_ui(&self, field_id: &str) -> Option<&Arc<FieldUi>> {
        self.ui.fields.get(field_id)
    }

    /// Section state; subsections are addressed as `subsection_<id>`.
    pub fn section_ui(&self, section_id: &str) -> Option<&Arc<SectionUi>> {
        self.ui.sections.get(section_id)
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Warnings raised by the transition that produced this snapshot.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn globals(&self) -> &Map<String, Value> {
        &self.globals
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn deps(&self) -> &Arc<DependencyGraph> {
        &self.deps
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Fields whose value a batch of actions would change.
fn written_changes(snapshot: &Snapshot, actions: &[Action]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut changed = Vec::new();
    for action in actions {
        if let Action::SetValue { target, value } = action
            && snapshot.deps.has_field(target)
            && snapshot.values.get(target) != Some(value)
            && seen.insert(target.as_str())
        {
            changed.push(target.clone());
        }
    }
    changed
}
