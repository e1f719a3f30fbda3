//! Promotion of calculated values into the tracking store.
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json_bytes::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::backend::BackendKey;
use crate::backend::RetrievalInputs;
use crate::error::FieldError;
use crate::path::OperationPath;
use crate::value::TrackableValue;

/// Identity of a tracked value: the backend that produced it, the path it answers and the
/// inputs it was produced from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackingKey {
    pub backend: BackendKey,
    pub path: OperationPath,
    pub inputs: String,
}

impl TrackingKey {
    pub fn new(backend: BackendKey, path: OperationPath, inputs: &RetrievalInputs) -> Self {
        Self {
            backend,
            path,
            inputs: inputs.canonical(),
        }
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}?{}", self.backend, self.path, self.inputs)
    }
}

/// The external cache holding Tracked values.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn lookup(&self, key: &TrackingKey) -> Result<Option<TrackableValue>, FieldError>;

    async fn publish(&self, key: TrackingKey, value: TrackableValue) -> Result<(), FieldError>;
}

/// A process-local tracking store.
#[derive(Debug, Default)]
pub struct InMemoryTrackingStore {
    entries: DashMap<TrackingKey, TrackableValue>,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &TrackingKey) -> Option<TrackableValue> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl TrackingStore for InMemoryTrackingStore {
    async fn lookup(&self, key: &TrackingKey) -> Result<Option<TrackableValue>, FieldError> {
        Ok(self.get(key))
    }

    async fn publish(&self, key: TrackingKey, value: TrackableValue) -> Result<(), FieldError> {
        if !value.is_tracked() {
            return Err(FieldError::new(format!(
                "refusing to publish a value that is not tracked for {key}"
            ))
            .with_code("NOT_TRACKED"));
        }
        self.entries.insert(key, value);
        Ok(())
    }
}

/// Decides when a freshly calculated value may be cached, and caches it.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn TrackingStore>,
}

impl Publisher {
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        Self { store }
    }

    /// The promotion rule.
    ///
    /// A Calculated value becomes Tracked at the earliest of the timestamps of the Tracked
    /// values it depended on and of its last-updated sibling, or at `now` when there are none.
    /// Planned and Tracked values are returned unchanged.
    pub fn promote(
        value: TrackableValue,
        dependencies: &[TrackableValue],
        last_updated: Option<&Value>,
        now: OffsetDateTime,
    ) -> TrackableValue {
        if !matches!(value, TrackableValue::Calculated { .. }) {
            return value;
        }
        let valid_since = dependencies
            .iter()
            .filter_map(TrackableValue::valid_since)
            .chain(last_updated.and_then(earliest_timestamp))
            .min()
            .unwrap_or(now);
        value.track(valid_since)
    }

    /// Promotes `value` and publishes it under `key` when the promotion happened.
    pub async fn publish(
        &self,
        key: TrackingKey,
        value: TrackableValue,
        dependencies: &[TrackableValue],
        last_updated: Option<&Value>,
        now: OffsetDateTime,
    ) -> Result<TrackableValue, FieldError> {
        let was_calculated = matches!(value, TrackableValue::Calculated { .. });
        let promoted = Self::promote(value, dependencies, last_updated, now);
        if was_calculated && promoted.is_tracked() {
            tracing::debug!(%key, "publishing tracked value");
            self.store.publish(key, promoted.clone()).await?;
        }
        Ok(promoted)
    }
}

/// Reads a last-updated attribute: an RFC 3339 string, or a list of them (the earliest wins).
fn earliest_timestamp(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::String(s) => match OffsetDateTime::parse(s.as_str(), &Rfc3339) {
            Ok(timestamp) => Some(timestamp),
            Err(error) => {
                tracing::warn!(value = s.as_str(), %error, "ignoring unparsable last-updated value");
                None
            }
        },
        Value::Array(items) => items.iter().filter_map(earliest_timestamp).min(),
        _ => None,
    }
}
