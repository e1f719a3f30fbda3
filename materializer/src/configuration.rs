//! Configuration of the materializer, loadable from YAML.
use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::error::MaterializerError;

/// Top level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// How the metamodel is derived from the schema.
    #[serde(default)]
    pub metamodel: MetamodelConfig,

    /// Promotion of calculated values into the tracking store.
    #[serde(default)]
    pub tracking: TrackingConfig,
}

impl Configuration {
    pub fn from_yaml(yaml: &str) -> Result<Self, MaterializerError> {
        serde_yaml::from_str(yaml).map_err(|e| MaterializerError::Internal {
            message: format!("invalid configuration: {e}"),
        })
    }

    /// The JSON schema of the configuration file.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Configuration)
    }
}

/// Options for building metamodels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MetamodelConfig {
    /// Back-references (recursive types) are expanded only up to this many nested fields.
    /// default: 6
    #[serde(default = "default_max_operation_depth")]
    pub max_operation_depth: usize,

    /// Names of the query root fields that act as domain roots.
    #[serde(default)]
    pub domains: DomainRoots,

    /// Names of the schema directives the metamodel reads.
    #[serde(default)]
    pub directives: DirectiveNames,

    /// Global parameter aliases: argument name to the field names it may be matched against.
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
}

fn default_max_operation_depth() -> usize {
    6
}

impl Default for MetamodelConfig {
    fn default() -> Self {
        Self {
            max_operation_depth: default_max_operation_depth(),
            domains: Default::default(),
            directives: Default::default(),
            aliases: Default::default(),
        }
    }
}

/// Query root field names for each domain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct DomainRoots {
    /// default: "dataElements"
    pub data_elements: String,
    /// default: "transformers"
    pub transformers: String,
    /// default: "features"
    pub features: String,
}

impl DomainRoots {
    pub fn names(&self) -> [&str; 3] {
        [&self.data_elements, &self.transformers, &self.features]
    }
}

impl Default for DomainRoots {
    fn default() -> Self {
        Self {
            data_elements: "dataElements".to_string(),
            transformers: "transformers".to_string(),
            features: "features".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct DirectiveNames {
    /// Declares the backend(s) of a field. default: "source"
    pub source: String,
    /// Marks the last-updated attribute of a type. default: "lastUpdated"
    pub last_updated: String,
    /// Marks the entity identifier attribute of a type. default: "entityId"
    pub entity_id: String,
    /// Declares which field an argument may be matched against. default: "matches"
    pub matches: String,
}

impl Default for DirectiveNames {
    fn default() -> Self {
        Self {
            source: "source".to_string(),
            last_updated: "lastUpdated".to_string(),
            entity_id: "entityId".to_string(),
            matches: "matches".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct TrackingConfig {
    /// Publish promoted values to the tracking store.
    /// enabled by default
    pub enabled: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
