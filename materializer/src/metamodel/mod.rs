//! The metamodel: a read-only snapshot of every path a request may select, built once per schema.
//!
//! The snapshot owns the containment graph of those paths and the indices derived from it. It is
//! shared between requests and never mutated after [`Metamodel::build`] returns.
use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::Serialize;
use serde_json_bytes::Value;
use sha2::Digest;
use sha2::Sha256;

use crate::backend::BackendKey;
use crate::configuration::MetamodelConfig;
use crate::error::MaterializerError;
use crate::graph::PersistentGraph;
use crate::path::FieldCoordinates;
use crate::path::OperationPath;

mod builder;
pub mod registry;

use self::registry::AliasRegistry;
use self::registry::CompanionRegistry;

/// A field reached through a path. Source vertices are answered by backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceVertex {
    pub path: OperationPath,
    pub coordinates: FieldCoordinates,
    /// The name of the domain root this field was reached from.
    pub domain: Name,
    /// The named type the field returns.
    pub type_name: Name,
    /// How many list wrappers the field's type has.
    pub list_depth: usize,
}

/// An argument, or a field of an input-object argument. Parameter vertices are inputs of the
/// retrieval of their owning field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterVertex {
    pub path: OperationPath,
    /// The path of the field the argument belongs to.
    pub owner: OperationPath,
    pub name: Name,
    pub type_name: Name,
    /// The parameter's type is non-null.
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Vertex {
    /// A domain root field of the query type.
    SourceRoot(SourceVertex),
    /// A field returning a composite type.
    SourceJunction(SourceVertex),
    /// A field returning a scalar or an enum.
    SourceLeaf(SourceVertex),
    /// An argument (or input field) of input-object type.
    ParameterJunction(ParameterVertex),
    /// An argument (or input field) of scalar or enum type.
    ParameterLeaf(ParameterVertex),
}

impl Vertex {
    pub fn path(&self) -> &OperationPath {
        match self {
            Vertex::SourceRoot(source)
            | Vertex::SourceJunction(source)
            | Vertex::SourceLeaf(source) => &source.path,
            Vertex::ParameterJunction(parameter) | Vertex::ParameterLeaf(parameter) => {
                &parameter.path
            }
        }
    }

    pub fn as_source(&self) -> Option<&SourceVertex> {
        match self {
            Vertex::SourceRoot(source)
            | Vertex::SourceJunction(source)
            | Vertex::SourceLeaf(source) => Some(source),
            _ => None,
        }
    }

    pub fn as_parameter(&self) -> Option<&ParameterVertex> {
        match self {
            Vertex::ParameterJunction(parameter) | Vertex::ParameterLeaf(parameter) => {
                Some(parameter)
            }
            _ => None,
        }
    }

    pub fn is_source(&self) -> bool {
        self.as_source().is_some()
    }

    pub fn is_parameter(&self) -> bool {
        self.as_parameter().is_some()
    }

    pub fn is_junction(&self) -> bool {
        matches!(
            self,
            Vertex::SourceRoot(_) | Vertex::SourceJunction(_) | Vertex::ParameterJunction(_)
        )
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vertex::SourceRoot(source) => write!(f, "SourceRoot({})", source.coordinates),
            Vertex::SourceJunction(source) => write!(f, "SourceJunction({})", source.coordinates),
            Vertex::SourceLeaf(source) => write!(f, "SourceLeaf({})", source.coordinates),
            Vertex::ParameterJunction(parameter) => {
                write!(f, "ParameterJunction({})", parameter.path)
            }
            Vertex::ParameterLeaf(parameter) => write!(f, "ParameterLeaf({})", parameter.path),
        }
    }
}

/// How a metamodel vertex is nested in its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Containment {
    Field,
    Argument,
    InputField,
}

impl fmt::Display for Containment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Containment::Field => f.write_str("field"),
            Containment::Argument => f.write_str("argument"),
            Containment::InputField => f.write_str("input field"),
        }
    }
}

/// The hex SHA-256 digest of the schema's SDL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SchemaVersion(String);

impl SchemaVersion {
    pub fn of(schema: &Schema) -> Self {
        Self(hex::encode(Sha256::digest(schema.to_string().as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a domain root covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDescriptor {
    pub name: Name,
    pub root_path: OperationPath,
    pub root_type: Name,
    /// Every source path below (and including) the root.
    pub source_paths: IndexSet<OperationPath>,
    pub parameter_paths: IndexSet<OperationPath>,
}

#[derive(Debug, PartialEq)]
pub(crate) struct Indices {
    version: SchemaVersion,
    max_operation_depth: usize,
    graph: PersistentGraph<OperationPath, Vertex, Containment>,
    coordinates_by_path: IndexMap<OperationPath, FieldCoordinates>,
    paths_by_coordinates: IndexMap<FieldCoordinates, IndexSet<OperationPath>>,
    backends_by_path: IndexMap<OperationPath, Vec<BackendKey>>,
    /// Top-level arguments by the path of the field they belong to.
    arguments_by_path: IndexMap<OperationPath, IndexSet<OperationPath>>,
    arguments_by_name: IndexMap<Name, IndexSet<OperationPath>>,
    /// Converted, non-null default values.
    default_arguments: IndexMap<OperationPath, Value>,
    paths_by_field_name: IndexMap<Name, IndexSet<OperationPath>>,
    domains: IndexMap<Name, DomainDescriptor>,
    last_updated: CompanionRegistry,
    entity_ids: CompanionRegistry,
    aliases: AliasRegistry,
}

/// A read-only, cheaply cloneable metamodel snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Metamodel {
    indices: Arc<Indices>,
}

impl Metamodel {
    /// Traverses the schema from its domain roots. Fails as a whole on the first structural
    /// problem found.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn build(
        schema: &Valid<Schema>,
        config: &MetamodelConfig,
    ) -> Result<Self, MaterializerError> {
        let indices = builder::build(schema, config)?;
        tracing::debug!(
            version = %indices.version,
            vertices = indices.graph.vertex_count(),
            "built metamodel"
        );
        Ok(Self {
            indices: Arc::new(indices),
        })
    }

    /// Parses and validates `sdl`, then builds its metamodel.
    pub fn parse(sdl: &str, config: &MetamodelConfig) -> Result<Self, MaterializerError> {
        let schema = Schema::parse_and_validate(sdl, "schema.graphql")
            .map_err(|invalid| MaterializerError::schema_integrity(invalid.errors.to_string()))?;
        Self::build(&schema, config)
    }

    pub fn version(&self) -> &SchemaVersion {
        &self.indices.version
    }

    pub fn max_operation_depth(&self) -> usize {
        self.indices.max_operation_depth
    }

    /// The containment graph of every path.
    pub fn graph(&self) -> &PersistentGraph<OperationPath, Vertex, Containment> {
        &self.indices.graph
    }

    pub fn vertex(&self, path: &OperationPath) -> Option<&Vertex> {
        self.indices.graph.vertex(path)
    }

    pub fn source(&self, path: &OperationPath) -> Option<&SourceVertex> {
        self.vertex(path).and_then(Vertex::as_source)
    }

    pub fn parameter(&self, path: &OperationPath) -> Option<&ParameterVertex> {
        self.vertex(path).and_then(Vertex::as_parameter)
    }

    pub fn coordinates(&self, path: &OperationPath) -> Option<&FieldCoordinates> {
        self.indices.coordinates_by_path.get(path)
    }

    pub fn paths_for(&self, coordinates: &FieldCoordinates) -> Option<&IndexSet<OperationPath>> {
        self.indices.paths_by_coordinates.get(coordinates)
    }

    /// The backends declared for (or inherited by) the field at `path`.
    pub fn backends(&self, path: &OperationPath) -> &[BackendKey] {
        self.indices
            .backends_by_path
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The top-level arguments of the field at `path`.
    pub fn arguments(&self, path: &OperationPath) -> impl Iterator<Item = &OperationPath> {
        self.indices
            .arguments_by_path
            .get(path)
            .into_iter()
            .flatten()
    }

    pub fn arguments_named(&self, name: &str) -> impl Iterator<Item = &OperationPath> {
        self.indices
            .arguments_by_name
            .get(name)
            .into_iter()
            .flatten()
    }

    /// The nested input fields of an input-object parameter.
    pub fn input_fields<'a>(
        &'a self,
        path: &'a OperationPath,
    ) -> impl Iterator<Item = &'a OperationPath> + 'a {
        self.indices
            .graph
            .out_edges(path)
            .filter(|(_, containment)| **containment == Containment::InputField)
            .map(|(child, _)| child)
    }

    pub fn default_value(&self, path: &OperationPath) -> Option<&Value> {
        self.indices.default_arguments.get(path)
    }

    pub fn default_values(&self) -> impl Iterator<Item = (&OperationPath, &Value)> {
        self.indices.default_arguments.iter()
    }

    /// Source paths whose last segment is a field named `name`.
    pub fn paths_named(&self, name: &str) -> impl Iterator<Item = &OperationPath> {
        self.indices
            .paths_by_field_name
            .get(name)
            .into_iter()
            .flatten()
    }

    pub fn domains(&self) -> impl Iterator<Item = &DomainDescriptor> {
        self.indices.domains.values()
    }

    pub fn domain(&self, name: &str) -> Option<&DomainDescriptor> {
        self.indices.domains.get(name)
    }

    /// The last-updated sibling of the field at `path`, when its type declares one.
    pub fn last_updated_of(&self, path: &OperationPath) -> Option<OperationPath> {
        self.companion(&self.indices.last_updated, path)
    }

    /// The entity-identifier sibling of the field at `path`, when its type declares one.
    pub fn entity_id_of(&self, path: &OperationPath) -> Option<OperationPath> {
        self.companion(&self.indices.entity_ids, path)
    }

    fn companion(
        &self,
        registry: &CompanionRegistry,
        path: &OperationPath,
    ) -> Option<OperationPath> {
        let coordinates = self.coordinates(path)?;
        registry
            .companion_of(path, &coordinates.type_name)
            .filter(|companion| self.indices.graph.contains_vertex(companion))
    }

    pub fn aliases_of(&self, argument: &OperationPath) -> IndexSet<Name> {
        self.indices.aliases.aliases_of(argument)
    }
}

#[cfg(test)]
mod tests;
