//! Registries of schema-declared relationships between fields.
use apollo_compiler::Name;
use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::path::OperationPath;
use crate::path::PathSegment;

/// Per container type, the single field playing a role (last-updated, entity-identifier).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanionRegistry {
    by_type: IndexMap<Name, Name>,
}

impl CompanionRegistry {
    /// Records `field_name` as the companion of `type_name`. Returns the previously registered
    /// field, if it differs.
    pub(crate) fn register(&mut self, type_name: Name, field_name: Name) -> Option<Name> {
        match self.by_type.insert(type_name, field_name.clone()) {
            Some(previous) if previous != field_name => Some(previous),
            _ => None,
        }
    }

    pub fn field_for(&self, type_name: &Name) -> Option<&Name> {
        self.by_type.get(type_name)
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// The companion path of the field at `path`, declared by `type_name` (the type containing
    /// that field). `None` when the type declares no companion or the field is the companion.
    pub fn companion_of(&self, path: &OperationPath, type_name: &Name) -> Option<OperationPath> {
        let field = self.field_for(type_name)?;
        if path.field_name() == Some(field) {
            return None;
        }
        let parent = path.parent()?;
        Some(parent.child(PathSegment::Field(field.clone())))
    }
}

/// Field names an argument may be matched against, besides its own name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasRegistry {
    /// Declared on argument definitions, keyed by argument path.
    by_argument: IndexMap<OperationPath, IndexSet<Name>>,
    /// Configured globally, keyed by argument name.
    by_name: IndexMap<Name, IndexSet<Name>>,
}

impl AliasRegistry {
    pub(crate) fn register_argument(&mut self, argument: OperationPath, field_name: Name) {
        self.by_argument
            .entry(argument)
            .or_default()
            .insert(field_name);
    }

    pub(crate) fn register_name(&mut self, argument_name: Name, field_name: Name) {
        self.by_name
            .entry(argument_name)
            .or_default()
            .insert(field_name);
    }

    /// Alias targets of the argument at `argument`: declared ones first, then global ones.
    pub fn aliases_of(&self, argument: &OperationPath) -> IndexSet<Name> {
        let mut aliases = self
            .by_argument
            .get(argument)
            .cloned()
            .unwrap_or_default();
        if let Some(PathSegment::Argument(name)) = argument.last() {
            if let Some(global) = self.by_name.get(name) {
                aliases.extend(global.iter().cloned());
            }
        }
        aliases
    }
}
