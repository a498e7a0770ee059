#![allow(missing_docs)]

pub mod config;
pub mod deps;
pub mod engine;
pub mod error;
pub mod expr;
pub mod json_schema;
pub mod options;
pub mod path;
pub mod snapshot;
pub mod spec;
pub mod template;
pub mod transform;
pub mod validation;

pub use config::{ConfigError, CyclePolicy, EngineConfig, VariableResolution};
pub use deps::{DependencyGraph, FieldLocation, OwnerKind, RuleNode, visibility_rule_id};
pub use engine::{apply_actions, evaluate_rules, evaluate_rules_into, sort_rules_for_evaluation};
pub use error::{EngineError, SchemaError, Warning};
pub use expr::{EvalContext, Expr, Operator, evaluate, extract_variable_paths};
pub use json_schema::active_json_schema;
pub use options::{CachedResolver, OptionsCache, OptionsError, OptionsRequest, OptionsResolver};
pub use snapshot::{FieldUi, SectionUi, Snapshot, SnapshotBuilder, UiState};
pub use spec::{
    Action, Actions, Field, FieldType, LayoutRow, OptionItem, OptionsSource, RemoteOptions, Rule,
    Schema, Section, Subsection, SubmissionConfig, Validator, ValidatorKind,
};
pub use template::{FieldText, ResolutionMode, TemplateError, resolve_field_text};
pub use transform::TransformRegistry;
pub use validation::{
    CustomValidators, FieldError, ValidationReport, active_validators, validate,
};
