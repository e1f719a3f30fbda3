//! Errors produced while building metamodels, request graphs and dispatch plans.
//!
//! Graph construction failures are fatal for the schema (metamodel) or for the request (request
//! graph, dispatch plan) and are reported as [`MaterializerError`]. Failures of individual
//! backend calls are reported per field as [`FieldError`] and never abort sibling fields.
use serde::Serialize;

use crate::backend::BackendKey;
use crate::path::OperationPath;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MaterializerError {
    /// The schema is missing an element the metamodel requires. Aborts the whole build.
    #[error("invalid schema: {message}")]
    SchemaIntegrity { message: String },

    /// A vertex could not be matched to a value source, or a retrieval spec never became
    /// dispatchable.
    #[error("unresolved dependency: {message}")]
    UnresolvedDependency {
        message: String,
        /// The paths that could not be resolved.
        paths: Vec<OperationPath>,
    },

    #[error(
        "source \"{path}\" maps to more than one backend ({})",
        .backends.join(", ")
    )]
    AmbiguousBackend {
        path: OperationPath,
        backends: Vec<BackendKey>,
    },

    /// A literal or default value could not be converted into a JSON value.
    #[error("cannot convert value for \"{path}\": {message}")]
    Conversion {
        path: OperationPath,
        message: String,
        #[source]
        cause: Option<BoxError>,
    },

    #[error("unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl MaterializerError {
    pub(crate) fn schema_integrity(message: impl Into<String>) -> Self {
        Self::SchemaIntegrity {
            message: message.into(),
        }
    }

    pub(crate) fn unresolved(message: impl Into<String>, paths: Vec<OperationPath>) -> Self {
        Self::UnresolvedDependency {
            message: message.into(),
            paths,
        }
    }

    pub(crate) fn conversion(path: &OperationPath, message: impl Into<String>) -> Self {
        Self::Conversion {
            path: path.clone(),
            message: message.into(),
            cause: None,
        }
    }

    pub(crate) fn conversion_caused(
        path: &OperationPath,
        message: impl Into<String>,
        cause: impl Into<BoxError>,
    ) -> Self {
        Self::Conversion {
            path: path.clone(),
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// A stable, machine readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaIntegrity { .. } => "SCHEMA_INTEGRITY",
            Self::UnresolvedDependency { .. } => "UNRESOLVED_DEPENDENCY",
            Self::AmbiguousBackend { .. } => "AMBIGUOUS_BACKEND",
            Self::Conversion { .. } => "CONVERSION",
            Self::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// The paths this error is about, if any.
    pub fn paths(&self) -> Vec<OperationPath> {
        match self {
            Self::UnresolvedDependency { paths, .. } => paths.clone(),
            Self::AmbiguousBackend { path, .. } | Self::Conversion { path, .. } => {
                vec![path.clone()]
            }
            _ => Vec::new(),
        }
    }
}

/// A failure attached to a single field of the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct FieldError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<OperationPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attaches the path unless one is already set; the innermost path wins.
    pub fn at(mut self, path: &OperationPath) -> Self {
        if self.path.is_none() {
            self.path = Some(path.clone());
        }
        self
    }
}

impl From<MaterializerError> for FieldError {
    fn from(error: MaterializerError) -> Self {
        FieldError::new(error.to_string()).with_code(error.code())
    }
}

macro_rules! internal_error {
    ( $( $arg:tt )+ ) => {
        $crate::error::MaterializerError::Internal {
            message: format!( $( $arg )+ ),
        }
    }
}

/// Break out of the current function, returning an internal error.
macro_rules! bail {
    ( $( $arg:tt )+ ) => {
        return Err($crate::error::internal_error!( $( $arg )+ ).into())
    };
}

pub(crate) use bail;
pub(crate) use internal_error;
