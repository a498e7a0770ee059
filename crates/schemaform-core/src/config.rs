use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How rule cycles found while building the dependency graph are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Record a warning and keep the graph usable.
    #[default]
    Warn,
    /// Refuse to load the schema.
    Reject,
}

/// Lookup strategy for variable paths without a `globals.`/`params.` prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableResolution {
    /// Field values first, then globals, then params.
    #[default]
    Fallback,
    /// Field values only; globals and params need their prefix.
    Strict,
}

/// Engine-wide knobs shared by every snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cycle_policy: CyclePolicy,
    pub variable_resolution: VariableResolution,
    /// Upper bound on cascading re-evaluation passes triggered by `SET_VALUE`.
    pub max_passes: usize,
    /// Drop the whole update when any rule raised an evaluation warning.
    pub discard_on_eval_warning: bool,
    /// Unknown operators and action types fail schema loading.
    pub strict_schema: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_policy: CyclePolicy::Warn,
            variable_resolution: VariableResolution::Fallback,
            max_passes: 16,
            discard_on_eval_warning: false,
            strict_schema: false,
        }
    }
}

/// Errors raised while reading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid engine config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("max_passes must be at least 1")]
    ZeroPasses,
}

impl EngineConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no snapshot can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_passes == 0 {
            return Err(ConfigError::ZeroPasses);
        }
        Ok(())
    }

    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    pub fn with_variable_resolution(mut self, resolution: VariableResolution) -> Self {
        self.variable_resolution = resolution;
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    pub fn with_discard_on_eval_warning(mut self, discard: bool) -> Self {
        self.discard_on_eval_warning = discard;
        self
    }

    pub fn with_strict_schema(mut self, strict: bool) -> Self {
        self.strict_schema = strict;
        self
    }
}
