use std::mem;

use apollo_compiler::Node;
use apollo_compiler::ast;
use indexmap::IndexMap;
use tracing::debug;
use tracing::trace;

use super::edge::Extractor;
use super::edge::RequestEdge;
use super::edge::ValueOrigin;
use super::selection::SelectedField;
use super::spec::RetrievalFunctionSpec;
use crate::error::MaterializerError;
use crate::error::bail;
use crate::graph::PersistentGraph;
use crate::metamodel::Metamodel;
use crate::metamodel::ParameterVertex;
use crate::metamodel::Vertex;
use crate::path::OperationPath;
use crate::value::Variables;
use crate::value::convert_value;

pub(super) type Graph = PersistentGraph<OperationPath, Vertex, RequestEdge>;

/// The request graph, its retrieval specs keyed by anchor, and the anchor of every source
/// vertex covered by a spec.
pub(super) struct Connected {
    pub(super) graph: Graph,
    pub(super) specs: IndexMap<OperationPath, RetrievalFunctionSpec>,
    pub(super) anchors: IndexMap<OperationPath, OperationPath>,
}

/// Grows the request graph one selected vertex at a time.
pub(super) struct Connector<'a> {
    metamodel: &'a Metamodel,
    variables: &'a Variables,
    selections: &'a IndexMap<OperationPath, SelectedField>,
    pub(super) graph: Graph,
    specs: IndexMap<OperationPath, RetrievalFunctionSpec>,
    anchors: IndexMap<OperationPath, OperationPath>,
}

/// A source vertex is connected once it has outgoing edges or a retrieval spec covers it.
pub(super) fn is_connected(graph: &Graph, path: &OperationPath) -> bool {
    graph.has_outgoing_edges(path)
        || graph
            .in_edges(path)
            .any(|(_, edge)| edge.is_retrieval_spec())
}

impl<'a> Connector<'a> {
    pub(super) fn new(
        metamodel: &'a Metamodel,
        variables: &'a Variables,
        selections: &'a IndexMap<OperationPath, SelectedField>,
    ) -> Self {
        Self {
            metamodel,
            variables,
            selections,
            graph: Graph::new(),
            specs: IndexMap::new(),
            anchors: IndexMap::new(),
        }
    }

    pub(super) fn finish(self) -> Result<Connected, MaterializerError> {
        for spec in self.specs.values() {
            spec.validate()?;
        }
        Ok(Connected {
            graph: self.graph,
            specs: self.specs,
            anchors: self.anchors,
        })
    }

    /// Connects the source vertex at `path`, its field ancestors, its parameters and its
    /// companion attributes. Connecting a connected vertex does nothing.
    pub(super) fn connect_source(&mut self, path: &OperationPath) -> Result<(), MaterializerError> {
        if let Some(parent) = path.field_ancestors().next() {
            self.connect_source(&parent)?;
        }
        if is_connected(&self.graph, path) {
            return Ok(());
        }
        let metamodel = self.metamodel;
        let Some(source) = metamodel.source(path) else {
            bail!("\"{path}\" is not a source vertex of the metamodel");
        };
        let Some(vertex) = metamodel.vertex(path) else {
            bail!("\"{path}\" is not a vertex of the metamodel");
        };
        self.graph = mem::take(&mut self.graph).with_vertex(path.clone(), vertex.clone());

        let backend = match metamodel.backends(path) {
            [] => {
                trace!(%path, "structural vertex without backend");
                return Ok(());
            }
            [backend] => backend.clone(),
            backends => {
                return Err(MaterializerError::AmbiguousBackend {
                    path: path.clone(),
                    backends: backends.to_vec(),
                });
            }
        };

        let sharing = path.field_ancestors().find_map(|ancestor| {
            let anchor = self.anchors.get(&ancestor)?;
            let spec = self.specs.get(anchor)?;
            (spec.backend() == &backend).then(|| (ancestor, anchor.clone()))
        });
        match sharing {
            Some((ancestor, anchor)) => {
                let extractor = Extractor::between(metamodel, &ancestor, path)?;
                debug!(%path, %anchor, %extractor, "attached to ancestor retrieval");
                self.graph = mem::take(&mut self.graph)
                    .with_edge(
                        ancestor,
                        path.clone(),
                        RequestEdge::DependentValue(extractor),
                    )?
                    .with_edge(
                        anchor.clone(),
                        path.clone(),
                        RequestEdge::RetrievalSpec(anchor.clone()),
                    )?;
                let Some(spec) = self.specs.get_mut(&anchor) else {
                    bail!("no retrieval spec anchored at \"{anchor}\"");
                };
                *spec = spec.with_source(source.clone());
                self.anchors.insert(path.clone(), anchor);
            }
            None => {
                debug!(%path, %backend, "new retrieval anchor");
                self.graph = mem::take(&mut self.graph).with_edge(
                    path.clone(),
                    path.clone(),
                    RequestEdge::RetrievalSpec(path.clone()),
                )?;
                self.specs.insert(
                    path.clone(),
                    RetrievalFunctionSpec::anchored(backend, source.clone()),
                );
                self.anchors.insert(path.clone(), path.clone());
            }
        }

        let selections = self.selections;
        let selected = selections.get(path);
        for argument in metamodel.arguments(path) {
            let Some(parameter) = metamodel.parameter(argument) else {
                bail!("\"{argument}\" is not a parameter vertex of the metamodel");
            };
            let supplied = selected.and_then(|field| field.argument(&parameter.name));
            self.connect_parameter(argument, supplied)?;
        }

        for companion in [metamodel.last_updated_of(path), metamodel.entity_id_of(path)]
            .into_iter()
            .flatten()
        {
            trace!(%path, %companion, "connecting companion attribute");
            self.connect_source(&companion)?;
        }
        Ok(())
    }

    /// Binds the parameter at `path` to a caller value, a schema default, or a matching source
    /// vertex, in that order. A parameter with none of these fails, nullable or not.
    fn connect_parameter(
        &mut self,
        path: &OperationPath,
        supplied: Option<&Node<ast::Value>>,
    ) -> Result<(), MaterializerError> {
        if self.graph.in_edges(path).next().is_some() {
            return Ok(());
        }
        let metamodel = self.metamodel;
        let Some(vertex) = metamodel.vertex(path) else {
            bail!("\"{path}\" is not a vertex of the metamodel");
        };
        let Some(parameter) = vertex.as_parameter() else {
            bail!("\"{path}\" is not a parameter vertex");
        };
        self.graph = mem::take(&mut self.graph).with_vertex(path.clone(), vertex.clone());

        if let Some(value) = supplied {
            if let Some(converted) = convert_value(value, self.variables, path)? {
                let origin = match value.as_ref() {
                    ast::Value::Variable(_) => ValueOrigin::Variable,
                    _ => ValueOrigin::Literal,
                };
                return self.materialize(parameter, converted, origin);
            }
        }
        if let Some(default) = metamodel.default_value(path) {
            return self.materialize(parameter, default.clone(), ValueOrigin::Default);
        }
        if matches!(vertex, Vertex::ParameterJunction(_)) {
            for input_field in metamodel.input_fields(path) {
                self.connect_parameter(input_field, None)?;
            }
            return Ok(());
        }

        match self.find_match(parameter) {
            Some(matched) => {
                debug!(parameter = %path, source = %matched, "matched parameter");
                self.connect_source(&matched)?;
                self.graph = mem::take(&mut self.graph).with_edge(
                    matched,
                    path.clone(),
                    RequestEdge::DependentValue(Extractor::identity()),
                )?;
                self.bind(parameter);
                Ok(())
            }
            None => Err(MaterializerError::unresolved(
                format!("no value source for parameter \"{path}\""),
                vec![path.clone()],
            )),
        }
    }

    fn materialize(
        &mut self,
        parameter: &ParameterVertex,
        value: serde_json_bytes::Value,
        origin: ValueOrigin,
    ) -> Result<(), MaterializerError> {
        trace!(parameter = %parameter.path, ?origin, "materialized parameter");
        self.graph = mem::take(&mut self.graph).with_edge(
            parameter.owner.clone(),
            parameter.path.clone(),
            RequestEdge::MaterializedValue { value, origin },
        )?;
        self.bind(parameter);
        Ok(())
    }

    /// Adds a bound parameter to the spec covering its owner.
    fn bind(&mut self, parameter: &ParameterVertex) {
        let spec = self
            .anchors
            .get(&parameter.owner)
            .and_then(|anchor| self.specs.get_mut(anchor));
        match spec {
            Some(spec) => *spec = spec.with_parameter(parameter.clone()),
            None => trace!(parameter = %parameter.path, "owner has no retrieval spec"),
        }
    }

    /// The source vertex a parameter's value is taken from: aliases first, then the parameter's
    /// own name; for each name, selected or connected vertices of the owner's domain (closest
    /// first), then vertices of other domains.
    fn find_match(&self, parameter: &ParameterVertex) -> Option<OperationPath> {
        let metamodel = self.metamodel;
        let mut names = metamodel.aliases_of(&parameter.path);
        names.insert(parameter.name.clone());
        let domain = metamodel
            .source(&parameter.owner)
            .map(|owner| owner.domain.clone());

        names.iter().find_map(|name| {
            let mut candidates: Vec<(bool, usize, &OperationPath)> = metamodel
                .paths_named(name)
                .filter(|candidate| {
                    *candidate != &parameter.owner && !parameter.owner.is_ancestor_of(candidate)
                })
                .filter(|candidate| {
                    self.selections.contains_key(*candidate)
                        || self.graph.contains_vertex(candidate)
                })
                .filter(|candidate| !metamodel.backends(candidate).is_empty())
                .filter_map(|candidate| {
                    let source = metamodel.source(candidate)?;
                    Some((
                        Some(&source.domain) == domain.as_ref(),
                        candidate.common_prefix_len(&parameter.owner),
                        candidate,
                    ))
                })
                .collect();
            candidates.sort_by(|left, right| right.0.cmp(&left.0).then(right.1.cmp(&left.1)));
            candidates.first().map(|(_, _, candidate)| (*candidate).clone())
        })
    }
}
