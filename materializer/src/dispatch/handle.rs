//! Single-assignment handles on retrieval results.
//!
//! Every retrieval spec gets one [`SpecHandle`]: a lazy, shared future. The first consumer to
//! poll it triggers the backend call; every other consumer (sibling fields, dependent specs)
//! waits on the same call and receives a clone of its outcome.
use std::sync::Arc;
use std::sync::OnceLock;

use futures::FutureExt;
use futures::future;
use futures::future::BoxFuture;
use futures::future::Shared;
use serde_json_bytes::Value;
use time::OffsetDateTime;
use tracing::Instrument;

use crate::backend::Backend;
use crate::backend::BackendKey;
use crate::backend::BatchRetrieval;
use crate::backend::RetrievalInputs;
use crate::error::FieldError;
use crate::metamodel::SourceVertex;
use crate::path::OperationPath;
use crate::publish::TrackingStore;
use crate::request::edge::Extractor;
use crate::request::spec::RetrievalFunctionSpec;
use crate::value::TrackableValue;

/// What a retrieval produced, along with what it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecOutcome {
    /// The value of the spec's anchor.
    pub value: TrackableValue,
    /// The values of the specs this one took parameter values from.
    pub dependencies: Arc<[TrackableValue]>,
    pub inputs: Arc<RetrievalInputs>,
}

pub type SpecHandle = Shared<BoxFuture<'static, Result<SpecOutcome, FieldError>>>;

/// How a spec is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    /// One batched backend call.
    Batch,
    /// A cache lookup for a single vertex, falling back to a batched backup call.
    CacheFirst,
}

/// Where a parameter value comes from when the spec is dispatched.
#[derive(Clone)]
pub(crate) enum InputSource {
    Materialized(Value),
    /// Extracted from the outcome of another spec.
    Dependent {
        handle: SpecHandle,
        extractor: Extractor,
    },
}

/// A batched retrieval that is only built when first needed.
pub(crate) struct Backup {
    backend: Arc<dyn Backend>,
    spec: RetrievalFunctionSpec,
    built: OnceLock<Result<Arc<dyn BatchRetrieval>, FieldError>>,
}

impl Backup {
    pub(crate) fn new(backend: Arc<dyn Backend>, spec: RetrievalFunctionSpec) -> Self {
        Self {
            backend,
            spec,
            built: OnceLock::new(),
        }
    }

    fn retrieval(&self) -> Result<Arc<dyn BatchRetrieval>, FieldError> {
        self.built
            .get_or_init(|| self.backend.batch_retrieval(&self.spec))
            .clone()
    }
}

/// The backup of a cache-first dispatch, filled in by the backup wiring pass.
pub(crate) type BackupSlot = Arc<OnceLock<Arc<Backup>>>;

pub(crate) enum Retrieval {
    Batch {
        backend: Arc<dyn Backend>,
        spec: RetrievalFunctionSpec,
    },
    CacheFirst {
        backend: Arc<dyn Backend>,
        key: BackendKey,
        vertex: SourceVertex,
        store: Arc<dyn TrackingStore>,
        backup: BackupSlot,
    },
}

/// Builds the handle of the spec anchored at `anchor`. Nothing runs until the handle is polled.
pub(crate) fn spec_handle(
    anchor: OperationPath,
    retrieval: Retrieval,
    parameters: Vec<(OperationPath, InputSource)>,
) -> SpecHandle {
    let span = tracing::debug_span!("retrieval", %anchor);
    async move {
        let (inputs, dependencies) = assemble_inputs(parameters).await?;
        let value = match retrieval {
            Retrieval::Batch { backend, spec } => {
                tracing::debug!(spec = %spec, "calling backend");
                let value = backend.batch_retrieval(&spec)?.retrieve(inputs.clone()).await?;
                TrackableValue::calculated(value, OffsetDateTime::now_utc())
            }
            Retrieval::CacheFirst {
                backend,
                key,
                vertex,
                store,
                backup,
            } => {
                let cache = backend.cache_retrieval(&key, &vertex, store);
                match cache.lookup(&inputs).await? {
                    Some(hit) => {
                        tracing::debug!("cache hit");
                        hit
                    }
                    None => {
                        tracing::debug!("cache miss, calling backup");
                        let Some(backup) = backup.get() else {
                            return Err(FieldError::new(format!(
                                "no backup retrieval wired for \"{anchor}\""
                            ))
                            .with_code("INTERNAL"));
                        };
                        let value = backup.retrieval()?.retrieve(inputs.clone()).await?;
                        TrackableValue::calculated(value, OffsetDateTime::now_utc())
                    }
                }
            }
        };
        Ok(SpecOutcome {
            value,
            dependencies: dependencies.into(),
            inputs: Arc::new(inputs),
        })
    }
    .instrument(span)
    .boxed()
    .shared()
}

async fn assemble_inputs(
    parameters: Vec<(OperationPath, InputSource)>,
) -> Result<(RetrievalInputs, Vec<TrackableValue>), FieldError> {
    let mut inputs = RetrievalInputs::new();
    let mut pending = Vec::new();
    for (path, source) in parameters {
        match source {
            InputSource::Materialized(value) => inputs.insert(path, value),
            InputSource::Dependent { handle, extractor } => pending.push((path, handle, extractor)),
        }
    }
    let outcomes =
        future::try_join_all(pending.iter().map(|(_, handle, _)| handle.clone())).await?;
    let mut dependencies = Vec::with_capacity(outcomes.len());
    for ((path, _, extractor), outcome) in pending.into_iter().zip(outcomes) {
        let value = outcome
            .value
            .value()
            .map(|value| extractor.extract(value))
            .unwrap_or(Value::Null);
        inputs.insert(path, value);
        dependencies.push(outcome.value);
    }
    Ok((inputs, dependencies))
}

/// The handle of one requested field: its spec's handle and the extraction of the field's value
/// from the anchor's value.
#[derive(Clone)]
pub struct FieldHandle {
    pub(crate) path: OperationPath,
    pub(crate) anchor: OperationPath,
    pub(crate) handle: SpecHandle,
    pub(crate) extractor: Extractor,
}

impl FieldHandle {
    pub fn path(&self) -> &OperationPath {
        &self.path
    }

    pub fn anchor(&self) -> &OperationPath {
        &self.anchor
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// The outcome of the field's spec, with the value narrowed to the field.
    pub async fn outcome(&self) -> Result<SpecOutcome, FieldError> {
        let outcome = self
            .handle
            .clone()
            .await
            .map_err(|error| error.at(&self.path))?;
        let extractor = &self.extractor;
        Ok(SpecOutcome {
            value: outcome.value.map_value(|value| extractor.extract(&value)),
            ..outcome
        })
    }

    /// The field's value. A spec that produced no value gives null.
    pub async fn value(&self) -> Result<Value, FieldError> {
        Ok(self
            .outcome()
            .await?
            .value
            .into_value()
            .unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for FieldHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldHandle")
            .field("path", &self.path)
            .field("anchor", &self.anchor)
            .field("extractor", &self.extractor)
            .finish()
    }
}
