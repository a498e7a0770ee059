use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::snapshot::Snapshot;

/// Pure payload rewrite applied at submission time.
pub type TransformFn = dyn Fn(Map<String, Value>) -> Result<Map<String, Value>, String> + Send + Sync;

/// Named transforms a schema can reference through `submission.transform`.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: BTreeMap<String, Arc<TransformFn>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, transform: F) -> &mut Self
    where
        F: Fn(Map<String, Value>) -> Result<Map<String, Value>, String> + Send + Sync + 'static,
    {
        self.transforms.insert(name.into(), Arc::new(transform));
        self
    }

    pub fn with<F>(mut self, name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<Map<String, Value>, String> + Send + Sync + 'static,
    {
        self.register(name, transform);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Runs the named transform over `payload`.
    pub fn apply(
        &self,
        name: &str,
        payload: Map<String, Value>,
    ) -> Result<Map<String, Value>, EngineError> {
        let transform: &TransformFn = &**self
            .transforms
            .get(name)
            .ok_or_else(|| EngineError::UnknownTransform(name.to_string()))?;
        transform(payload).map_err(|message| EngineError::Transform {
            name: name.to_string(),
            message,
        })
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("names", &self.transforms.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Snapshot {
    /// Payload as the schema wants it submitted.
    ///
    /// Applies `submission.stripHidden` / `stripDisabled`, then the named
    /// transform if one is configured.
    pub fn submit(&self, registry: &TransformRegistry) -> Result<Map<String, Value>, EngineError> {
        let submission = &self.schema.submission;
        let payload = self.build_payload(submission.strip_hidden, submission.strip_disabled);
        match &submission.transform {
            Some(name) => {
                tracing::debug!(transform = %name, fields = payload.len(), "transforming submission");
                registry.apply(name, payload)
            }
            None => Ok(payload),
        }
    }
}
