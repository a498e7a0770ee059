use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::expr::{EvalContext, is_empty};
use crate::path;
use crate::snapshot::Snapshot;
use crate::spec::{Field, OptionItem, RemoteOptions};
use crate::template::{ResolutionMode, TemplateError, resolve_string, resolve_value};

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("field '{0}' has no remote options")]
    NotRemote(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("options for '{field}' could not be loaded: {message}")]
    Fetch { field: String, message: String },
}

/// A remote options descriptor with every template resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsRequest {
    pub field: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_path: Option<String>,
    pub label_key: String,
    pub value_key: String,
}

impl OptionsRequest {
    pub fn resolve(
        field_id: &str,
        remote: &RemoteOptions,
        ctx: &EvalContext<'_>,
        mode: ResolutionMode,
    ) -> Result<Self, TemplateError> {
        let mut headers = BTreeMap::new();
        for (name, value) in &remote.headers {
            headers.insert(name.clone(), resolve_string(value, ctx, mode)?);
        }
        Ok(Self {
            field: field_id.to_string(),
            url: resolve_string(&remote.url, ctx, mode)?,
            method: remote.method.to_ascii_uppercase(),
            headers,
            body: remote
                .body
                .as_ref()
                .map(|body| resolve_value(body, ctx, mode))
                .transpose()?,
            items_path: remote.items_path.clone(),
            label_key: remote.label_key.clone(),
            value_key: remote.value_key.clone(),
        })
    }

    /// Canonical JSON of what goes over the wire; equal requests share a key.
    pub fn cache_key(&self) -> String {
        json!({
            "method": self.method,
            "url": self.url,
            "headers": self.headers,
            "body": self.body,
        })
        .to_string()
    }

    /// Maps a response document to option items.
    ///
    /// Objects contribute `labelKey`/`valueKey`; scalars are used as both.
    pub fn extract(&self, response: &Value) -> Vec<OptionItem> {
        let items = match &self.items_path {
            Some(items_path) => path::get(response, items_path),
            None => Some(response),
        };
        let Some(Value::Array(items)) = items else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| match item {
                Value::Object(map) => {
                    let value = map.get(&self.value_key)?.clone();
                    let label = match map.get(&self.label_key) {
                        Some(Value::String(label)) => label.clone(),
                        Some(other) => other.to_string(),
                        None => display(&value),
                    };
                    Some(OptionItem { label, value })
                }
                Value::Null => None,
                scalar => Some(OptionItem {
                    label: display(scalar),
                    value: scalar.clone(),
                }),
            })
            .collect()
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Host-side fetcher for remote options.
pub trait OptionsResolver {
    fn resolve(&mut self, request: &OptionsRequest) -> Result<Vec<OptionItem>, OptionsError>;
}

impl<F> OptionsResolver for F
where
    F: FnMut(&OptionsRequest) -> Result<Vec<OptionItem>, OptionsError>,
{
    fn resolve(&mut self, request: &OptionsRequest) -> Result<Vec<OptionItem>, OptionsError> {
        self(request)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    url: String,
    options: Vec<OptionItem>,
    stored_at: Instant,
}

/// TTL cache of resolved options keyed by [`OptionsRequest::cache_key`].
///
/// Callers pass the current instant so expiry is deterministic.
#[derive(Debug, Clone)]
pub struct OptionsCache {
    ttl: Duration,
    entries: BTreeMap<String, CacheEntry>,
}

impl OptionsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: BTreeMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, request: &OptionsRequest, now: Instant) -> Option<&[OptionItem]> {
        self.entries
            .get(&request.cache_key())
            .filter(|entry| now.saturating_duration_since(entry.stored_at) < self.ttl)
            .map(|entry| entry.options.as_slice())
    }

    pub fn insert(&mut self, request: &OptionsRequest, options: Vec<OptionItem>, now: Instant) {
        self.entries.insert(
            request.cache_key(),
            CacheEntry {
                url: request.url.clone(),
                options,
                stored_at: now,
            },
        );
    }

    /// Drops every entry whose request url starts with `prefix`.
    pub fn invalidate_prefix(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.url.starts_with(prefix));
        before - self.entries.len()
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) < ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolver that answers from an [`OptionsCache`] before asking `inner`.
#[derive(Debug)]
pub struct CachedResolver<R> {
    inner: R,
    cache: OptionsCache,
}

impl<R: OptionsResolver> CachedResolver<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            cache: OptionsCache::new(ttl),
        }
    }

    pub fn fetch_at(
        &mut self,
        request: &OptionsRequest,
        now: Instant,
    ) -> Result<Vec<OptionItem>, OptionsError> {
        if let Some(options) = self.cache.get(request, now) {
            tracing::debug!(field = %request.field, url = %request.url, "options cache hit");
            return Ok(options.to_vec());
        }
        tracing::debug!(field = %request.field, url = %request.url, "options cache miss");
        let options = self.inner.resolve(request)?;
        self.cache.insert(request, options.clone(), now);
        Ok(options)
    }

    pub fn cache(&self) -> &OptionsCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut OptionsCache {
        &mut self.cache
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: OptionsResolver> OptionsResolver for CachedResolver<R> {
    fn resolve(&mut self, request: &OptionsRequest) -> Result<Vec<OptionItem>, OptionsError> {
        self.fetch_at(request, Instant::now())
    }
}

impl Snapshot {
    /// Requests for remote-options fields that depend on `changed_field`.
    ///
    /// Fields whose `dependsOn` values are still empty are skipped.
    pub fn pending_option_requests(&self, changed_field: &str) -> Vec<OptionsRequest> {
        self.deps
            .options_dependents(changed_field)
            .iter()
            .filter_map(|field_id| self.schema.field(field_id))
            .filter_map(|field| self.option_request(field))
            .collect()
    }

    /// Requests for every remote-options field whose dependencies are filled in.
    pub fn initial_option_requests(&self) -> Vec<OptionsRequest> {
        self.schema
            .fields()
            .filter_map(|field| self.option_request(field))
            .collect()
    }

    /// Request for one remote-options field regardless of `dependsOn`; placeholders
    /// must resolve to a value.
    pub fn option_request_for(&self, field_id: &str) -> Result<OptionsRequest, OptionsError> {
        let remote = self
            .schema
            .field(field_id)
            .and_then(Field::remote_options)
            .ok_or_else(|| OptionsError::NotRemote(field_id.to_string()))?;
        Ok(OptionsRequest::resolve(
            field_id,
            remote,
            &self.eval_context(),
            ResolutionMode::Strict,
        )?)
    }

    fn option_request(&self, field: &Field) -> Option<OptionsRequest> {
        let remote = field.remote_options()?;
        let ready = remote
            .depends_on
            .iter()
            .all(|dependency| self.values.get(dependency).is_some_and(|value| !is_empty(value)));
        if !ready {
            return None;
        }
        OptionsRequest::resolve(
            &field.id,
            remote,
            &self.eval_context(),
            ResolutionMode::Relaxed,
        )
        .ok()
    }

    /// Resolves the given requests and stores each result as the field's options.
    pub fn apply_option_requests(
        &self,
        requests: &[OptionsRequest],
        resolver: &mut dyn OptionsResolver,
    ) -> Result<Snapshot, OptionsError> {
        let mut next = self.clone();
        for request in requests {
            let options = resolver.resolve(request)?;
            tracing::debug!(field = %request.field, count = options.len(), "options resolved");
            next = next.set_options(&request.field, options);
        }
        Ok(next)
    }
}
