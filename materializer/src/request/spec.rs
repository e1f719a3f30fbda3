use std::fmt;

use indexmap::IndexSet;

use crate::backend::BackendKey;
use crate::error::MaterializerError;
use crate::metamodel::ParameterVertex;
use crate::metamodel::SourceVertex;
use crate::path::OperationPath;

/// A batch of vertices answered by one call to one backend.
///
/// The first source vertex is the anchor: the call returns its value, and the values of the
/// other sources are extracted from it. Adding a vertex returns a new spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalFunctionSpec {
    backend: BackendKey,
    anchor: OperationPath,
    sources: IndexSet<SourceVertex>,
    parameters: IndexSet<ParameterVertex>,
}

impl RetrievalFunctionSpec {
    /// A spec anchored at `anchor`, covering nothing else yet.
    pub fn anchored(backend: BackendKey, anchor: SourceVertex) -> Self {
        Self {
            backend,
            anchor: anchor.path.clone(),
            sources: IndexSet::from([anchor]),
            parameters: IndexSet::new(),
        }
    }

    /// Assembles a spec from its parts, checking that it has an anchor and that every
    /// parameter belongs to one of its sources.
    pub fn try_new(
        backend: BackendKey,
        sources: impl IntoIterator<Item = SourceVertex>,
        parameters: impl IntoIterator<Item = ParameterVertex>,
    ) -> Result<Self, MaterializerError> {
        let sources: IndexSet<SourceVertex> = sources.into_iter().collect();
        let Some(anchor) = sources.first().map(|source| source.path.clone()) else {
            return Err(MaterializerError::Internal {
                message: format!("a retrieval spec for {backend} needs a source"),
            });
        };
        let spec = Self {
            backend,
            anchor,
            sources,
            parameters: parameters.into_iter().collect(),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Checks that every parameter belongs to one of the sources.
    pub fn validate(&self) -> Result<(), MaterializerError> {
        match self
            .parameters
            .iter()
            .find(|parameter| !self.covers(&parameter.owner))
        {
            Some(orphan) => Err(MaterializerError::Internal {
                message: format!(
                    "parameter \"{}\" does not belong to a source of the spec anchored at \"{}\"",
                    orphan.path, self.anchor
                ),
            }),
            None => Ok(()),
        }
    }

    pub fn with_source(&self, source: SourceVertex) -> Self {
        let mut next = self.clone();
        next.sources.insert(source);
        next
    }

    pub fn with_parameter(&self, parameter: ParameterVertex) -> Self {
        let mut next = self.clone();
        next.parameters.insert(parameter);
        next
    }

    pub fn backend(&self) -> &BackendKey {
        &self.backend
    }

    pub fn anchor(&self) -> &OperationPath {
        &self.anchor
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceVertex> {
        self.sources.iter()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &ParameterVertex> {
        self.parameters.iter()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn covers(&self, path: &OperationPath) -> bool {
        self.sources.iter().any(|source| &source.path == path)
    }

    pub fn has_parameter(&self, path: &OperationPath) -> bool {
        self.parameters.iter().any(|parameter| &parameter.path == path)
    }
}

impl fmt::Display for RetrievalFunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.backend)?;
        for (index, source) in self.sources.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", source.path)?;
        }
        f.write_str(")")
    }
}
