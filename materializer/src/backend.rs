//! The seam between the engine and the data sources it federates.
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json_bytes::Value;

use crate::error::FieldError;
use crate::metamodel::SourceVertex;
use crate::path::OperationPath;
use crate::publish::TrackingKey;
use crate::publish::TrackingStore;
use crate::request::spec::RetrievalFunctionSpec;
use crate::value::TrackableValue;

pub type BackendKey = Arc<str>;

/// What a backend can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Can retrieve several vertices in a single call.
    pub batch: bool,
    /// Can answer a single value from its external cache.
    pub cache: bool,
}

/// Parameter values of one retrieval call, keyed by parameter path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalInputs {
    values: IndexMap<OperationPath, Value>,
}

impl RetrievalInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: OperationPath, value: Value) {
        self.values.insert(path, value);
    }

    pub fn get(&self, path: &OperationPath) -> Option<&Value> {
        self.values.get(path)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OperationPath, &Value)> {
        self.values.iter()
    }

    /// Order-independent textual form, used as part of tracking keys.
    pub fn canonical(&self) -> String {
        let mut entries: Vec<_> = self.values.iter().collect();
        entries.sort_by(|(left, _), (right, _)| left.cmp(right));
        entries
            .into_iter()
            .map(|(path, value)| format!("{path}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl FromIterator<(OperationPath, Value)> for RetrievalInputs {
    fn from_iter<T: IntoIterator<Item = (OperationPath, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// One call to a backend answering every vertex of a retrieval spec.
///
/// The result is the JSON value of the spec's anchor field; values of the other vertices of the
/// spec are extracted from it.
#[async_trait]
pub trait BatchRetrieval: Send + Sync {
    async fn retrieve(&self, inputs: RetrievalInputs) -> Result<Value, FieldError>;
}

/// A single value lookup in a backend's external cache.
#[async_trait]
pub trait CacheRetrieval: Send + Sync {
    /// Returns the cached value, if any. Only Tracked values are ever cached.
    async fn lookup(&self, inputs: &RetrievalInputs) -> Result<Option<TrackableValue>, FieldError>;
}

pub trait Backend: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Builds the retrieval answering `spec`. Called at most once per spec, when the value is
    /// first needed.
    fn batch_retrieval(
        &self,
        spec: &RetrievalFunctionSpec,
    ) -> Result<Arc<dyn BatchRetrieval>, FieldError>;

    /// Builds the cache lookup for a single source vertex. The default reads the tracking store.
    fn cache_retrieval(
        &self,
        backend: &BackendKey,
        vertex: &SourceVertex,
        store: Arc<dyn TrackingStore>,
    ) -> Arc<dyn CacheRetrieval> {
        Arc::new(StoreLookup {
            backend: backend.clone(),
            path: vertex.path.clone(),
            store,
        })
    }
}

struct StoreLookup {
    backend: BackendKey,
    path: OperationPath,
    store: Arc<dyn TrackingStore>,
}

#[async_trait]
impl CacheRetrieval for StoreLookup {
    async fn lookup(&self, inputs: &RetrievalInputs) -> Result<Option<TrackableValue>, FieldError> {
        let key = TrackingKey::new(self.backend.clone(), self.path.clone(), inputs);
        Ok(self
            .store
            .lookup(&key)
            .await?
            .filter(TrackableValue::is_tracked))
    }
}

/// The backends known to the engine, by key.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: IndexMap<BackendKey, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, key: impl Into<BackendKey>, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(key.into(), backend);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn Backend>> {
        self.backends.get(key)
    }

    pub fn capabilities(&self, key: &str) -> Option<Capabilities> {
        self.get(key).map(|backend| backend.capabilities())
    }

    pub fn keys(&self) -> impl Iterator<Item = &BackendKey> {
        self.backends.keys()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.backends.keys()).finish()
    }
}
