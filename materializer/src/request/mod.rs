//! The per-request graph: the selected vertices, how each one gets its value, and the retrieval
//! specs batching them into backend calls.
use apollo_compiler::ExecutableDocument;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use serde_json_bytes::Value;
use tracing::instrument;

use crate::error::MaterializerError;
use crate::error::internal_error;
use crate::graph::PersistentGraph;
use crate::graph::output::to_dot;
use crate::metamodel::Metamodel;
use crate::metamodel::SchemaVersion;
use crate::metamodel::Vertex;
use crate::path::OperationPath;
use crate::utils::logging::snapshot;
use crate::value::Variables;

mod connector;
pub mod edge;
pub mod selection;
pub mod spec;

use self::connector::Connector;
use self::edge::Extractor;
use self::edge::RequestEdge;
use self::selection::SelectedField;
use self::spec::RetrievalFunctionSpec;

/// Where the value of a bound parameter comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterBinding<'a> {
    Materialized(&'a Value),
    /// Extracted from the value of a source vertex.
    Dependent {
        source: &'a OperationPath,
        extractor: &'a Extractor,
    },
}

/// A connected request graph. Immutable once built and scoped to one request.
#[derive(Debug, Clone)]
pub struct RequestGraph {
    graph: PersistentGraph<OperationPath, Vertex, RequestEdge>,
    specs: IndexMap<OperationPath, RetrievalFunctionSpec>,
    anchors: IndexMap<OperationPath, OperationPath>,
    selections: IndexMap<OperationPath, SelectedField>,
    version: SchemaVersion,
}

/// Connects every field the operation selects.
///
/// Fails with [`MaterializerError::UnsupportedOperation`] for operations the engine cannot
/// answer, and with [`MaterializerError::UnresolvedDependency`] or
/// [`MaterializerError::AmbiguousBackend`] when a selected vertex has no usable value source.
#[instrument(skip_all, level = "debug", fields(operation_name = ?operation_name))]
pub fn build_request_graph(
    metamodel: &Metamodel,
    document: &Valid<ExecutableDocument>,
    operation_name: Option<&str>,
    variables: &Variables,
) -> Result<RequestGraph, MaterializerError> {
    let selections =
        selection::collect_selections(metamodel, document, operation_name, variables)?;
    let mut connector = Connector::new(metamodel, variables, &selections);
    for path in selections.keys() {
        connector.connect_source(path)?;
    }
    let connected = connector.finish()?;
    tracing::debug!(
        vertices = connected.graph.vertex_count(),
        edges = connected.graph.edge_count(),
        specs = connected.specs.len(),
        "connected request graph"
    );
    let request_graph = RequestGraph {
        graph: connected.graph,
        specs: connected.specs,
        anchors: connected.anchors,
        selections,
        version: metamodel.version().clone(),
    };
    snapshot!("RequestGraph", request_graph.to_dot(), "connected request graph");
    Ok(request_graph)
}

impl RequestGraph {
    pub fn graph(&self) -> &PersistentGraph<OperationPath, Vertex, RequestEdge> {
        &self.graph
    }

    /// Retrieval specs keyed by anchor path, in creation order.
    pub fn specs(&self) -> &IndexMap<OperationPath, RetrievalFunctionSpec> {
        &self.specs
    }

    pub fn spec(&self, anchor: &OperationPath) -> Option<&RetrievalFunctionSpec> {
        self.specs.get(anchor)
    }

    /// The anchor of the spec covering the source vertex at `path`.
    pub fn anchor_of(&self, path: &OperationPath) -> Option<&OperationPath> {
        self.anchors.get(path)
    }

    /// The spec covering the source vertex at `path`.
    pub fn spec_for(&self, path: &OperationPath) -> Option<&RetrievalFunctionSpec> {
        self.anchor_of(path).and_then(|anchor| self.specs.get(anchor))
    }

    /// The selected fields, parents before children.
    pub fn selections(&self) -> &IndexMap<OperationPath, SelectedField> {
        &self.selections
    }

    /// Every source path covered by a retrieval spec.
    pub fn covered_paths(&self) -> impl Iterator<Item = &OperationPath> {
        self.anchors.keys()
    }

    pub fn is_connected(&self, path: &OperationPath) -> bool {
        connector::is_connected(&self.graph, path)
    }

    pub fn schema_version(&self) -> &SchemaVersion {
        &self.version
    }

    /// How the parameter at `path` gets its value, or `None` when it is unbound.
    pub fn binding(&self, path: &OperationPath) -> Option<ParameterBinding<'_>> {
        self.graph.in_edges(path).find_map(|(from, edge)| match edge {
            RequestEdge::MaterializedValue { value, .. } => {
                Some(ParameterBinding::Materialized(value))
            }
            RequestEdge::DependentValue(extractor) => Some(ParameterBinding::Dependent {
                source: from,
                extractor,
            }),
            RequestEdge::RetrievalSpec(_) => None,
        })
    }

    /// The extraction of the value of `path` from the value of its spec's anchor, following the
    /// dependent-value edges that attached it.
    pub fn extractor(&self, path: &OperationPath) -> Result<Extractor, MaterializerError> {
        let Some(anchor) = self.anchor_of(path) else {
            return Err(internal_error!(
                "\"{path}\" is not covered by a retrieval spec"
            ));
        };
        let mut steps = Vec::new();
        let mut current = path.clone();
        while &current != anchor {
            let attachment = self.graph.in_edges(&current).find_map(|(from, edge)| match edge {
                RequestEdge::DependentValue(extractor)
                    if self.anchor_of(from) == Some(anchor) =>
                {
                    Some((from.clone(), extractor.clone()))
                }
                _ => None,
            });
            let Some((parent, extractor)) = attachment else {
                return Err(internal_error!(
                    "\"{current}\" is not attached to the retrieval anchored at \"{anchor}\""
                ));
            };
            steps.push(extractor);
            current = parent;
        }
        Ok(steps
            .iter()
            .rev()
            .fold(Extractor::identity(), |composed, next| composed.then(next)))
    }

    /// Renders the request graph in GraphViz DOT format.
    pub fn to_dot(&self) -> String {
        to_dot(&self.graph)
    }
}

#[cfg(test)]
mod tests;
