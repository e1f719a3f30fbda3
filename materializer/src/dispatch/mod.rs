//! Turns a request graph into a dispatch plan: one shared handle per retrieval spec, scheduled in
//! rounds so that a spec is dispatched only once every spec it takes parameter values from has
//! been.
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use futures::lock::Mutex;
use indexmap::IndexMap;
use serde_json_bytes::Value;
use tracing::instrument;

use crate::backend::BackendKey;
use crate::backend::BackendRegistry;
use crate::backend::Capabilities;
use crate::configuration::TrackingConfig;
use crate::error::FieldError;
use crate::error::MaterializerError;
use crate::error::bail;
use crate::graph::PersistentGraph;
use crate::graph::output::dependency_cycles;
use crate::metamodel::Metamodel;
use crate::path::OperationPath;
use crate::publish::TrackingStore;
use crate::request::ParameterBinding;
use crate::request::RequestGraph;
use crate::request::edge::Extractor;
use crate::utils::logging::snapshot;
use crate::value::TrackableValue;

mod backup;
mod handle;

pub use self::handle::DispatchKind;
pub use self::handle::FieldHandle;
pub use self::handle::SpecHandle;
pub use self::handle::SpecOutcome;
use self::handle::Backup;
use self::handle::BackupSlot;
use self::handle::InputSource;
use self::handle::Retrieval;
use self::handle::spec_handle;

/// A parameter value as known when planning.
#[derive(Debug, Clone)]
enum PlannedInput {
    Materialized(Value),
    /// Taken from the outcome of the spec anchored at `anchor`.
    Dependent {
        anchor: OperationPath,
        extractor: Extractor,
    },
}

impl PlannedInput {
    fn is_available(&self, dispatched: &IndexMap<OperationPath, SpecHandle>) -> bool {
        match self {
            PlannedInput::Materialized(_) => true,
            PlannedInput::Dependent { anchor, .. } => dispatched.contains_key(anchor),
        }
    }
}

/// The outcome of publishing one field, filled by the first resolution of that field.
pub(crate) type Publication = Arc<Mutex<Option<Result<TrackableValue, FieldError>>>>;

/// Every requested field mapped to a handle on its value. Scoped to one request.
pub struct DispatchPlan {
    handles: IndexMap<OperationPath, FieldHandle>,
    kinds: IndexMap<OperationPath, DispatchKind>,
    backends: IndexMap<OperationPath, (BackendKey, Capabilities)>,
    rounds: Vec<Vec<OperationPath>>,
    cache_wiring_order: Vec<OperationPath>,
    requested: Vec<OperationPath>,
    metamodel: Metamodel,
    store: Arc<dyn TrackingStore>,
    tracking: bool,
    publications: DashMap<OperationPath, Publication>,
}

/// Schedules every retrieval spec of `request`.
///
/// Round 0 dispatches the specs whose parameters are all materialized. Every later round
/// dispatches the specs whose parameters come from specs dispatched in earlier rounds, until a
/// round dispatches nothing. Specs left over at that point can never be dispatched and fail the
/// request with [`MaterializerError::UnresolvedDependency`].
///
/// Nothing is sent to a backend here: handles run when first awaited.
#[instrument(skip_all, level = "debug", fields(specs = request.specs().len()))]
pub fn dispatch(
    request: &RequestGraph,
    metamodel: &Metamodel,
    backends: &BackendRegistry,
    store: Arc<dyn TrackingStore>,
) -> Result<DispatchPlan, MaterializerError> {
    let specs = request.specs();
    let mut planned: IndexMap<OperationPath, Vec<(OperationPath, PlannedInput)>> =
        IndexMap::with_capacity(specs.len());
    for (anchor, spec) in specs {
        let mut inputs = Vec::new();
        for parameter in spec.parameters() {
            let input = match request.binding(&parameter.path) {
                Some(ParameterBinding::Materialized(value)) => {
                    PlannedInput::Materialized(value.clone())
                }
                Some(ParameterBinding::Dependent { source, extractor }) => {
                    let Some(feeding) = request.anchor_of(source) else {
                        bail!("\"{source}\" feeds \"{}\" but has no retrieval", parameter.path);
                    };
                    PlannedInput::Dependent {
                        anchor: feeding.clone(),
                        extractor: request.extractor(source)?.then(extractor),
                    }
                }
                None => bail!("parameter \"{}\" of \"{anchor}\" is not bound", parameter.path),
            };
            inputs.push((parameter.path.clone(), input));
        }
        planned.insert(anchor.clone(), inputs);
    }

    let mut dispatched: IndexMap<OperationPath, SpecHandle> = IndexMap::new();
    let mut kinds = IndexMap::new();
    let mut spec_backends = IndexMap::new();
    let mut backups: IndexMap<OperationPath, (BackupSlot, Backup)> = IndexMap::new();
    let mut rounds: Vec<Vec<OperationPath>> = Vec::new();

    for round in 0..=specs.len() {
        let ready: Vec<OperationPath> = planned
            .iter()
            .filter(|(anchor, _)| !dispatched.contains_key(*anchor))
            .filter(|(_, inputs)| {
                inputs.iter().all(|(_, input)| match input {
                    PlannedInput::Materialized(_) => true,
                    PlannedInput::Dependent { .. } => round > 0 && input.is_available(&dispatched),
                })
            })
            .map(|(anchor, _)| anchor.clone())
            .collect();
        if ready.is_empty() {
            break;
        }
        for anchor in &ready {
            let Some(spec) = specs.get(anchor) else {
                bail!("no retrieval spec anchored at \"{anchor}\"");
            };
            let Some(backend) = backends.get(spec.backend()) else {
                bail!("no backend registered under \"{}\"", spec.backend());
            };
            let capabilities = backend.capabilities();
            let kind = if spec.source_count() == 1 && capabilities.cache && !capabilities.batch {
                DispatchKind::CacheFirst
            } else {
                DispatchKind::Batch
            };

            let mut parameters = Vec::new();
            for (path, input) in planned.get(anchor).into_iter().flatten() {
                let source = match input {
                    PlannedInput::Materialized(value) => InputSource::Materialized(value.clone()),
                    PlannedInput::Dependent {
                        anchor: feeding,
                        extractor,
                    } => {
                        let Some(handle) = dispatched.get(feeding) else {
                            bail!("\"{anchor}\" was scheduled before \"{feeding}\"");
                        };
                        InputSource::Dependent {
                            handle: handle.clone(),
                            extractor: extractor.clone(),
                        }
                    }
                };
                parameters.push((path.clone(), source));
            }

            let retrieval = match kind {
                DispatchKind::Batch => Retrieval::Batch {
                    backend: backend.clone(),
                    spec: spec.clone(),
                },
                DispatchKind::CacheFirst => {
                    let Some(vertex) = spec.sources().find(|source| &source.path == anchor) else {
                        bail!("retrieval spec of \"{anchor}\" does not cover its anchor");
                    };
                    let slot = BackupSlot::default();
                    backups.insert(
                        anchor.clone(),
                        (slot.clone(), Backup::new(backend.clone(), spec.clone())),
                    );
                    Retrieval::CacheFirst {
                        backend: backend.clone(),
                        key: spec.backend().clone(),
                        vertex: vertex.clone(),
                        store: store.clone(),
                        backup: slot,
                    }
                }
            };
            dispatched.insert(
                anchor.clone(),
                spec_handle(anchor.clone(), retrieval, parameters),
            );
            kinds.insert(anchor.clone(), kind);
            spec_backends.insert(anchor.clone(), (spec.backend().clone(), capabilities));
        }
        tracing::debug!(round, dispatched = ready.len(), "dispatch round");
        rounds.push(ready);
    }

    let stuck: Vec<OperationPath> = planned
        .keys()
        .filter(|anchor| !dispatched.contains_key(*anchor))
        .cloned()
        .collect();
    if !stuck.is_empty() {
        return Err(unresolved_specs(&stuck, &planned)?);
    }

    let cache_first: Vec<OperationPath> = kinds
        .iter()
        .filter(|(_, kind)| **kind == DispatchKind::CacheFirst)
        .map(|(anchor, _)| anchor.clone())
        .collect();
    let cache_wiring_order = backup::wiring_order(request, &cache_first)?;
    backup::wire(&cache_wiring_order, backups)?;

    let mut handles = IndexMap::new();
    for path in request.covered_paths() {
        let Some(anchor) = request.anchor_of(path) else {
            continue;
        };
        let Some(handle) = dispatched.get(anchor) else {
            bail!("retrieval of \"{anchor}\" was never dispatched");
        };
        handles.insert(
            path.clone(),
            FieldHandle {
                path: path.clone(),
                anchor: anchor.clone(),
                handle: handle.clone(),
                extractor: request.extractor(path)?,
            },
        );
    }
    let requested = request
        .selections()
        .keys()
        .filter(|path| handles.contains_key(*path))
        .cloned()
        .collect();

    snapshot!(rounds, "dispatch rounds");
    Ok(DispatchPlan {
        handles,
        kinds,
        backends: spec_backends,
        rounds,
        cache_wiring_order,
        requested,
        metamodel: metamodel.clone(),
        store,
        tracking: TrackingConfig::default().enabled,
        publications: DashMap::new(),
    })
}

/// Names the specs that never became dispatchable and the dependency cycles among them.
fn unresolved_specs(
    stuck: &[OperationPath],
    planned: &IndexMap<OperationPath, Vec<(OperationPath, PlannedInput)>>,
) -> Result<MaterializerError, MaterializerError> {
    let mut dependencies = PersistentGraph::<OperationPath, (), OperationPath>::new();
    for anchor in stuck {
        dependencies = dependencies.with_vertex(anchor.clone(), ());
    }
    for anchor in stuck {
        for (parameter, input) in planned.get(anchor).into_iter().flatten() {
            if let PlannedInput::Dependent { anchor: feeding, .. } = input {
                if dependencies.contains_vertex(feeding) {
                    dependencies =
                        dependencies.with_edge(feeding.clone(), anchor.clone(), parameter.clone())?;
                }
            }
        }
    }
    let cycles = dependency_cycles(&dependencies, |_| true);
    let names = |paths: &[OperationPath]| {
        paths
            .iter()
            .map(|path| format!("\"{path}\""))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut message = format!("retrievals never became dispatchable: {}", names(stuck));
    for cycle in &cycles {
        message.push_str(&format!("; cycle between {}", names(cycle.as_slice())));
    }
    tracing::debug!(%message, "dispatch reached a fixpoint with pending retrievals");
    Ok(MaterializerError::unresolved(message, stuck.to_vec()))
}

impl DispatchPlan {
    /// Sets whether calculated values are promoted and published.
    pub fn with_tracking(mut self, config: &TrackingConfig) -> Self {
        self.tracking = config.enabled;
        self
    }

    pub fn handle(&self, path: &OperationPath) -> Option<&FieldHandle> {
        self.handles.get(path)
    }

    /// Handles of every source vertex covered by a retrieval, requested or not.
    pub fn handles(&self) -> impl Iterator<Item = (&OperationPath, &FieldHandle)> {
        self.handles.iter()
    }

    /// The selected paths that have a value, in selection order.
    pub fn requested_paths(&self) -> impl Iterator<Item = &OperationPath> {
        self.requested.iter()
    }

    pub fn kind(&self, anchor: &OperationPath) -> Option<DispatchKind> {
        self.kinds.get(anchor).copied()
    }

    /// The anchors dispatched in each round.
    pub fn rounds(&self) -> &[Vec<OperationPath>] {
        &self.rounds
    }

    /// Cache-first dispatches in the order their backups were wired.
    pub fn cache_wiring_order(&self) -> &[OperationPath] {
        &self.cache_wiring_order
    }

    /// The backend answering the field at `path`, and what it can do.
    pub fn backend_of(&self, path: &OperationPath) -> Option<&(BackendKey, Capabilities)> {
        let anchor = self.handles.get(path)?.anchor();
        self.backends.get(anchor)
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub(crate) fn metamodel(&self) -> &Metamodel {
        &self.metamodel
    }

    pub(crate) fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    /// The publication slot of the field at `path`. Every resolution of the field shares it.
    pub(crate) fn publication(&self, path: &OperationPath) -> Publication {
        self.publications.entry(path.clone()).or_default().clone()
    }
}

impl fmt::Debug for DispatchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchPlan")
            .field("rounds", &self.rounds)
            .field("kinds", &self.kinds)
            .field("cache_wiring_order", &self.cache_wiring_order)
            .field("tracking", &self.tracking)
            .finish()
    }
}
