use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::FieldDefinition;
use apollo_compiler::ast::InputValueDefinition;
use apollo_compiler::ast::Type;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexMap;
use indexmap::IndexSet;

use super::Containment;
use super::DomainDescriptor;
use super::Indices;
use super::ParameterVertex;
use super::SchemaVersion;
use super::SourceVertex;
use super::Vertex;
use super::registry::AliasRegistry;
use super::registry::CompanionRegistry;
use crate::backend::BackendKey;
use crate::configuration::MetamodelConfig;
use crate::error::MaterializerError;
use crate::graph::PersistentGraph;
use crate::path::FieldCoordinates;
use crate::path::OperationPath;
use crate::value::Variables;
use crate::value::convert_value;

/// A composite type waiting to have its fields expanded at `path`.
#[derive(Debug, Clone)]
struct Expansion {
    path: OperationPath,
    type_name: Name,
    /// Backends inherited by fields that declare none.
    backends: Vec<BackendKey>,
}

struct MetamodelBuilder<'a> {
    schema: &'a Schema,
    config: &'a MetamodelConfig,
    /// The domain being traversed.
    domain: Name,
    graph: PersistentGraph<OperationPath, Vertex, Containment>,
    coordinates_by_path: IndexMap<OperationPath, FieldCoordinates>,
    paths_by_coordinates: IndexMap<FieldCoordinates, IndexSet<OperationPath>>,
    backends_by_path: IndexMap<OperationPath, Vec<BackendKey>>,
    arguments_by_path: IndexMap<OperationPath, IndexSet<OperationPath>>,
    arguments_by_name: IndexMap<Name, IndexSet<OperationPath>>,
    default_arguments: IndexMap<OperationPath, serde_json_bytes::Value>,
    paths_by_field_name: IndexMap<Name, IndexSet<OperationPath>>,
    domains: IndexMap<Name, DomainDescriptor>,
    last_updated: CompanionRegistry,
    entity_ids: CompanionRegistry,
    aliases: AliasRegistry,
}

pub(super) fn build(schema: &Schema, config: &MetamodelConfig) -> Result<Indices, MaterializerError> {
    let mut builder = MetamodelBuilder::new(schema, config)?;
    for domain in config.domains.names() {
        builder.add_domain(domain)?;
    }
    Ok(builder.finish())
}

fn name(value: &str) -> Result<Name, MaterializerError> {
    Name::new(value).map_err(|e| MaterializerError::schema_integrity(e.to_string()))
}

fn list_depth(ty: &Type) -> usize {
    let mut depth = 0;
    let mut ty = ty;
    loop {
        match ty {
            Type::Named(_) | Type::NonNullNamed(_) => return depth,
            Type::List(inner) | Type::NonNullList(inner) => {
                depth += 1;
                ty = inner;
            }
        }
    }
}

impl<'a> MetamodelBuilder<'a> {
    fn new(schema: &'a Schema, config: &'a MetamodelConfig) -> Result<Self, MaterializerError> {
        let mut aliases = AliasRegistry::default();
        for (argument, fields) in &config.aliases {
            let argument = name(argument)?;
            for field in fields {
                aliases.register_name(argument.clone(), name(field)?);
            }
        }
        Ok(Self {
            schema,
            config,
            domain: name("_")?,
            graph: PersistentGraph::new(),
            coordinates_by_path: Default::default(),
            paths_by_coordinates: Default::default(),
            backends_by_path: Default::default(),
            arguments_by_path: Default::default(),
            arguments_by_name: Default::default(),
            default_arguments: Default::default(),
            paths_by_field_name: Default::default(),
            domains: Default::default(),
            last_updated: Default::default(),
            entity_ids: Default::default(),
            aliases,
        })
    }

    fn finish(self) -> Indices {
        Indices {
            version: SchemaVersion::of(self.schema),
            max_operation_depth: self.config.max_operation_depth,
            graph: self.graph,
            coordinates_by_path: self.coordinates_by_path,
            paths_by_coordinates: self.paths_by_coordinates,
            backends_by_path: self.backends_by_path,
            arguments_by_path: self.arguments_by_path,
            arguments_by_name: self.arguments_by_name,
            default_arguments: self.default_arguments,
            paths_by_field_name: self.paths_by_field_name,
            domains: self.domains,
            last_updated: self.last_updated,
            entity_ids: self.entity_ids,
            aliases: self.aliases,
        }
    }

    /// Adds the domain rooted at the query field `domain`, breadth first.
    ///
    /// A type is expanded in full the first time it is reached. Reaching it again is a
    /// back-reference: the pair goes to a worklist that is drained afterwards, still breadth
    /// first, until the maximum operation depth is reached.
    fn add_domain(&mut self, domain: &str) -> Result<(), MaterializerError> {
        let schema = self.schema;
        let query_type = schema
            .schema_definition
            .query
            .as_ref()
            .ok_or_else(|| MaterializerError::schema_integrity("the schema has no query type"))?;
        let Some(ExtendedType::Object(query)) = schema.types.get(&query_type.name) else {
            return Err(MaterializerError::schema_integrity(format!(
                "query type {} is not an object type",
                query_type.name
            )));
        };
        let field_name = name(domain)?;
        let field = query.fields.get(&field_name).ok_or_else(|| {
            MaterializerError::schema_integrity(format!(
                "query type {} has no domain root field \"{domain}\"",
                query.name
            ))
        })?;
        let root_type = field.ty.inner_named_type().clone();
        if !matches!(
            schema.types.get(&root_type),
            Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
        ) {
            return Err(MaterializerError::schema_integrity(format!(
                "domain root \"{domain}\" returns {root_type}, which has no fields"
            )));
        }

        self.domain = field_name.clone();
        let root_path = OperationPath::root().field(field_name.clone());
        self.domains.insert(
            field_name.clone(),
            DomainDescriptor {
                name: field_name.clone(),
                root_path: root_path.clone(),
                root_type: root_type.clone(),
                source_paths: Default::default(),
                parameter_paths: Default::default(),
            },
        );
        let backends = self.declared_backends(&field.directives)?;
        let root = SourceVertex {
            path: root_path.clone(),
            coordinates: FieldCoordinates::new(query.name.clone(), field_name.clone()),
            domain: field_name,
            type_name: root_type.clone(),
            list_depth: list_depth(&field.ty),
        };
        self.add_source(None, Vertex::SourceRoot(root), backends.clone())?;
        self.add_arguments(&root_path, &field.arguments)?;

        let mut visited = IndexSet::from([root_type.clone()]);
        let mut queue = VecDeque::from([Expansion {
            path: root_path,
            type_name: root_type,
            backends,
        }]);
        let mut back_references = VecDeque::new();
        while let Some(expansion) = queue.pop_front() {
            for child in self.expand(&expansion)? {
                if visited.insert(child.type_name.clone()) {
                    queue.push_back(child);
                } else {
                    back_references.push_back(child);
                }
            }
        }

        let mut dropped = 0;
        while let Some(expansion) = back_references.pop_front() {
            if expansion.path.operation_depth() >= self.config.max_operation_depth {
                tracing::trace!(path = %expansion.path, "back-reference at maximum depth");
                dropped += 1;
                continue;
            }
            back_references.extend(self.expand(&expansion)?);
        }
        if dropped > 0 {
            tracing::warn!(
                domain,
                dropped,
                max_operation_depth = self.config.max_operation_depth,
                "recursive types were cut off at the maximum operation depth"
            );
        }
        Ok(())
    }

    /// Adds the fields of the composite type of `expansion`, returning the composite-typed ones
    /// for further expansion.
    fn expand(&mut self, expansion: &Expansion) -> Result<Vec<Expansion>, MaterializerError> {
        let schema = self.schema;
        let mut discovered = Vec::new();
        match schema.types.get(&expansion.type_name) {
            Some(ExtendedType::Object(object)) => {
                for field in object.fields.values() {
                    discovered.extend(self.add_field(expansion, &expansion.path, &object.name, field)?);
                }
            }
            Some(ExtendedType::Interface(interface)) => {
                for field in interface.fields.values() {
                    discovered.extend(self.add_field(
                        expansion,
                        &expansion.path,
                        &interface.name,
                        field,
                    )?);
                }
                let implementations = schema.types.values().filter_map(|ty| match ty {
                    ExtendedType::Object(object)
                        if object
                            .implements_interfaces
                            .iter()
                            .any(|implemented| implemented.name == interface.name) =>
                    {
                        Some(object)
                    }
                    _ => None,
                });
                for object in implementations {
                    let base = expansion.path.inline_fragment(object.name.clone());
                    for field in object.fields.values() {
                        discovered.extend(self.add_field(expansion, &base, &object.name, field)?);
                    }
                }
            }
            Some(ExtendedType::Union(union_)) => {
                for member in &union_.members {
                    let Some(ExtendedType::Object(object)) = schema.types.get(&member.name) else {
                        return Err(MaterializerError::schema_integrity(format!(
                            "union member {} of {} is not an object type",
                            member.name, union_.name
                        )));
                    };
                    let base = expansion.path.inline_fragment(object.name.clone());
                    for field in object.fields.values() {
                        discovered.extend(self.add_field(expansion, &base, &object.name, field)?);
                    }
                }
            }
            _ => {
                return Err(MaterializerError::schema_integrity(format!(
                    "{} at \"{}\" is not a composite type",
                    expansion.type_name, expansion.path
                )));
            }
        }
        Ok(discovered)
    }

    fn add_field(
        &mut self,
        parent: &Expansion,
        base: &OperationPath,
        type_name: &Name,
        field: &FieldDefinition,
    ) -> Result<Option<Expansion>, MaterializerError> {
        let schema = self.schema;
        let path = base.field(field.name.clone());
        let declared = self.declared_backends(&field.directives)?;
        let backends = if declared.is_empty() {
            parent.backends.clone()
        } else {
            declared
        };
        if backends.is_empty() && !field.arguments.is_empty() {
            return Err(MaterializerError::schema_integrity(format!(
                "{}.{} at \"{path}\" takes arguments but has no @{} and inherits none",
                type_name, field.name, self.config.directives.source
            )));
        }
        let field_type = field.ty.inner_named_type();
        let source = SourceVertex {
            path: path.clone(),
            coordinates: FieldCoordinates::new(type_name.clone(), field.name.clone()),
            domain: self.domain.clone(),
            type_name: field_type.clone(),
            list_depth: list_depth(&field.ty),
        };
        let (vertex, expansion) = match schema.types.get(field_type) {
            Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_)) => {
                let expansion = Expansion {
                    path: path.clone(),
                    type_name: field_type.clone(),
                    backends: backends.clone(),
                };
                (Vertex::SourceJunction(source), Some(expansion))
            }
            Some(ExtendedType::Scalar(_) | ExtendedType::Enum(_)) => {
                if backends.is_empty() {
                    return Err(MaterializerError::schema_integrity(format!(
                        "{}.{} at \"{path}\" has no @{} and inherits none",
                        type_name, field.name, self.config.directives.source
                    )));
                }
                (Vertex::SourceLeaf(source), None)
            }
            _ => {
                return Err(MaterializerError::schema_integrity(format!(
                    "{}.{} returns {field_type}, which is not an output type",
                    type_name, field.name
                )));
            }
        };

        if field.directives.has(&self.config.directives.last_updated) {
            self.register_companion(true, type_name, &field.name)?;
        }
        if field.directives.has(&self.config.directives.entity_id) {
            self.register_companion(false, type_name, &field.name)?;
        }
        self.add_source(Some(&parent.path), vertex, backends)?;
        self.add_arguments(&path, &field.arguments)?;
        Ok(expansion)
    }

    fn register_companion(
        &mut self,
        last_updated: bool,
        type_name: &Name,
        field_name: &Name,
    ) -> Result<(), MaterializerError> {
        let (registry, directive) = if last_updated {
            (&mut self.last_updated, &self.config.directives.last_updated)
        } else {
            (&mut self.entity_ids, &self.config.directives.entity_id)
        };
        match registry.register(type_name.clone(), field_name.clone()) {
            None => Ok(()),
            Some(previous) => Err(MaterializerError::schema_integrity(format!(
                "{type_name} declares @{directive} on both {previous} and {field_name}"
            ))),
        }
    }

    fn add_source(
        &mut self,
        parent: Option<&OperationPath>,
        vertex: Vertex,
        backends: Vec<BackendKey>,
    ) -> Result<(), MaterializerError> {
        let Some(source) = vertex.as_source().cloned() else {
            return Err(crate::error::internal_error!("{vertex} is not a source vertex"));
        };
        let path = source.path;
        self.graph = mem::take(&mut self.graph).with_vertex(path.clone(), vertex);
        if let Some(parent) = parent {
            self.graph = mem::take(&mut self.graph).with_edge(
                parent.clone(),
                path.clone(),
                Containment::Field,
            )?;
        }
        self.coordinates_by_path
            .insert(path.clone(), source.coordinates.clone());
        self.paths_by_coordinates
            .entry(source.coordinates.clone())
            .or_default()
            .insert(path.clone());
        self.paths_by_field_name
            .entry(source.coordinates.field_name)
            .or_default()
            .insert(path.clone());
        self.backends_by_path.insert(path.clone(), backends);
        if let Some(domain) = self.domains.get_mut(&self.domain) {
            domain.source_paths.insert(path);
        }
        Ok(())
    }

    fn add_arguments(
        &mut self,
        owner: &OperationPath,
        arguments: &[apollo_compiler::Node<InputValueDefinition>],
    ) -> Result<(), MaterializerError> {
        for argument in arguments {
            self.add_parameter(owner, owner, argument, 0)?;
        }
        Ok(())
    }

    fn add_parameter(
        &mut self,
        owner: &OperationPath,
        parent: &OperationPath,
        definition: &InputValueDefinition,
        nesting: usize,
    ) -> Result<(), MaterializerError> {
        let schema = self.schema;
        let path = parent.argument(definition.name.clone());
        let type_name = definition.ty.inner_named_type();
        let parameter = ParameterVertex {
            path: path.clone(),
            owner: owner.clone(),
            name: definition.name.clone(),
            type_name: type_name.clone(),
            required: definition.ty.is_non_null(),
        };
        let top_level = parent == owner;
        let (vertex, input_fields) = match schema.types.get(type_name) {
            Some(ExtendedType::InputObject(input)) => {
                (Vertex::ParameterJunction(parameter), Some(&input.fields))
            }
            Some(ExtendedType::Scalar(_) | ExtendedType::Enum(_)) => {
                (Vertex::ParameterLeaf(parameter), None)
            }
            _ => {
                return Err(MaterializerError::schema_integrity(format!(
                    "argument \"{path}\" has type {type_name}, which is not an input type"
                )));
            }
        };
        self.graph = mem::take(&mut self.graph).with_vertex(path.clone(), vertex);
        let containment = if top_level {
            Containment::Argument
        } else {
            Containment::InputField
        };
        self.graph = mem::take(&mut self.graph).with_edge(
            parent.clone(),
            path.clone(),
            containment,
        )?;
        if top_level {
            self.arguments_by_path
                .entry(owner.clone())
                .or_default()
                .insert(path.clone());
            self.arguments_by_name
                .entry(definition.name.clone())
                .or_default()
                .insert(path.clone());
        }
        if let Some(domain) = self.domains.get_mut(&self.domain) {
            domain.parameter_paths.insert(path.clone());
        }

        if let Some(default) = &definition.default_value {
            match convert_value(default, &Variables::new(), &path)? {
                Some(value) if !value.is_null() => {
                    self.default_arguments.insert(path.clone(), value);
                }
                _ => {}
            }
        }
        for directive in definition
            .directives
            .get_all(&self.config.directives.matches)
        {
            let target = directive
                .specified_argument_by_name("field")
                .and_then(|value| value.as_str())
                .ok_or_else(|| {
                    MaterializerError::schema_integrity(format!(
                        "@{} on \"{path}\" needs a string `field` argument",
                        self.config.directives.matches
                    ))
                })?;
            self.aliases.register_argument(path.clone(), name(target)?);
        }

        if let Some(input_fields) = input_fields {
            if nesting < self.config.max_operation_depth {
                for field in input_fields.values() {
                    self.add_parameter(owner, &path, field, nesting + 1)?;
                }
            }
        }
        Ok(())
    }

    /// The backend keys named by the source directives of a field, in declaration order.
    fn declared_backends(
        &self,
        directives: &ast::DirectiveList,
    ) -> Result<Vec<BackendKey>, MaterializerError> {
        let mut backends: Vec<BackendKey> = Vec::new();
        for directive in directives.get_all(&self.config.directives.source) {
            let backend = directive
                .specified_argument_by_name("name")
                .and_then(|value| value.as_str())
                .ok_or_else(|| {
                    MaterializerError::schema_integrity(format!(
                        "@{} needs a string `name` argument",
                        self.config.directives.source
                    ))
                })?;
            if !backends.iter().any(|known| &**known == backend) {
                backends.push(Arc::from(backend));
            }
        }
        Ok(backends)
    }
}
