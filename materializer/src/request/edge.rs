//! Edges of the request graph, and the extraction functions carried by dependent values.
use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use serde_json_bytes::Value;

use crate::error::MaterializerError;
use crate::error::bail;
use crate::metamodel::Metamodel;
use crate::path::OperationPath;
use crate::path::PathSegment;

/// Where a materialized parameter value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueOrigin {
    Literal,
    Variable,
    /// The default declared by the schema.
    Default,
}

/// An edge of the request graph.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEdge {
    /// From the owning field to a parameter whose value is already known.
    MaterializedValue { value: Value, origin: ValueOrigin },
    /// From a source vertex to a vertex whose value is extracted from the source's value: a
    /// child attached to its ancestor's retrieval, or a parameter matched to a field.
    DependentValue(Extractor),
    /// From the anchor of a retrieval spec to every vertex the spec covers (the anchor itself
    /// included).
    RetrievalSpec(OperationPath),
}

impl RequestEdge {
    pub fn is_retrieval_spec(&self) -> bool {
        matches!(self, RequestEdge::RetrievalSpec(_))
    }
}

impl fmt::Display for RequestEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestEdge::MaterializedValue { value, origin } => {
                write!(f, "{origin:?} {value}")
            }
            RequestEdge::DependentValue(extractor) => write!(f, "extract {extractor}"),
            RequestEdge::RetrievalSpec(anchor) => write!(f, "spec {anchor}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExtractionStep {
    /// Descend into an object member.
    Key(Name),
    /// Apply the rest of the extraction to every element of a list.
    AnyIndex,
}

/// A pure function from a JSON value to a JSON value, made of [`ExtractionStep`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Extractor {
    steps: Arc<[ExtractionStep]>,
}

impl Extractor {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn new(steps: impl IntoIterator<Item = ExtractionStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    pub fn steps(&self) -> &[ExtractionStep] {
        &self.steps
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    /// Applies `self`, then `next`.
    pub fn then(&self, next: &Extractor) -> Self {
        Self::new(self.steps.iter().chain(next.steps.iter()).cloned())
    }

    /// The extraction of the value of `descendant` from the value of `ancestor`.
    ///
    /// Every field from `ancestor` down to (but excluding) `descendant` widens the extraction by
    /// one [`ExtractionStep::AnyIndex`] per list wrapper of its type. Inline fragments do not
    /// change the shape of the value.
    pub fn between(
        metamodel: &Metamodel,
        ancestor: &OperationPath,
        descendant: &OperationPath,
    ) -> Result<Self, MaterializerError> {
        let Some(relative) = descendant.relative_to(ancestor) else {
            bail!("\"{ancestor}\" is not an ancestor of \"{descendant}\"");
        };
        let list_depth = |path: &OperationPath| -> Result<usize, MaterializerError> {
            match metamodel.source(path) {
                Some(source) => Ok(source.list_depth),
                None => bail!("\"{path}\" is not a source vertex"),
            }
        };
        let mut steps = Vec::new();
        let mut current = ancestor.clone();
        steps.extend(std::iter::repeat_n(
            ExtractionStep::AnyIndex,
            list_depth(&current)?,
        ));
        for (index, segment) in relative.iter().enumerate() {
            current = current.child(segment.clone());
            match segment {
                PathSegment::Field(name) => {
                    steps.push(ExtractionStep::Key(name.clone()));
                    if index + 1 < relative.len() {
                        steps.extend(std::iter::repeat_n(
                            ExtractionStep::AnyIndex,
                            list_depth(&current)?,
                        ));
                    }
                }
                PathSegment::InlineFragment(_) => {}
                PathSegment::Argument(_) => {
                    bail!("cannot extract argument \"{descendant}\" from a field value")
                }
            }
        }
        Ok(Self::new(steps))
    }

    /// Applies the extraction. Missing members and nulls extract to null.
    pub fn extract(&self, value: &Value) -> Value {
        extract(&self.steps, value)
    }
}

fn extract(steps: &[ExtractionStep], value: &Value) -> Value {
    let Some((step, rest)) = steps.split_first() else {
        return value.clone();
    };
    match (step, value) {
        (ExtractionStep::Key(key), Value::Object(object)) => match object.get(key.as_str()) {
            Some(member) => extract(rest, member),
            None => Value::Null,
        },
        (ExtractionStep::AnyIndex, Value::Array(items)) => {
            Value::Array(items.iter().map(|item| extract(rest, item)).collect())
        }
        _ => Value::Null,
    }
}

impl fmt::Display for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str(".");
        }
        for step in self.steps.iter() {
            match step {
                ExtractionStep::Key(key) => write!(f, ".{key}")?,
                ExtractionStep::AnyIndex => f.write_str("[]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;
    use serde_json_bytes::json;

    use super::*;
    use crate::configuration::MetamodelConfig;

    fn path(s: &str) -> OperationPath {
        s.parse().unwrap()
    }

    fn metamodel() -> Metamodel {
        Metamodel::parse(
            include_str!("../../tests/fixtures/schema.graphql"),
            &MetamodelConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn widens_below_list_fields() {
        let extractor = Extractor::between(
            &metamodel(),
            &path("dataElements.customer"),
            &path("dataElements.customer.orders.total"),
        )
        .unwrap();
        assert_eq!(
            extractor.steps(),
            &[
                ExtractionStep::Key(name!("orders")),
                ExtractionStep::AnyIndex,
                ExtractionStep::Key(name!("total")),
            ]
        );
        assert_eq!(extractor.to_string(), ".orders[].total");

        let customer = json!({
            "name": "Ada",
            "orders": [{ "total": 10.5 }, { "total": 3 }, {}],
        });
        assert_eq!(extractor.extract(&customer), json!([10.5, 3, null]));
    }

    #[test]
    fn starts_widened_when_the_ancestor_is_a_list() {
        let extractor = Extractor::between(
            &metamodel(),
            &path("dataElements.customer.orders"),
            &path("dataElements.customer.orders.currency"),
        )
        .unwrap();
        assert_eq!(extractor.to_string(), "[].currency");
        assert_eq!(
            extractor.extract(&json!([{ "currency": "EUR" }, { "currency": "USD" }])),
            json!(["EUR", "USD"])
        );
    }

    #[test]
    fn fragments_do_not_change_the_shape() {
        let extractor = Extractor::between(
            &metamodel(),
            &path("features.node"),
            &path("features.node~Product.sku"),
        )
        .unwrap();
        assert_eq!(extractor.to_string(), ".sku");
    }

    #[test]
    fn extracting_through_nulls_gives_null() {
        let extractor = Extractor::new([
            ExtractionStep::Key(name!("a")),
            ExtractionStep::Key(name!("b")),
        ]);
        assert_eq!(extractor.extract(&json!({ "a": null })), Value::Null);
        assert_eq!(extractor.extract(&json!("scalar")), Value::Null);
        assert_eq!(Extractor::identity().extract(&json!(7)), json!(7));
    }

    #[test]
    fn composition_concatenates_steps() {
        let first = Extractor::new([ExtractionStep::Key(name!("orders"))]);
        let second = Extractor::new([ExtractionStep::AnyIndex, ExtractionStep::Key(name!("total"))]);
        assert_eq!(first.then(&second).to_string(), ".orders[].total");
        assert!(Extractor::identity().then(&Extractor::identity()).is_identity());
    }

    #[test]
    fn rejects_unrelated_paths() {
        assert!(Extractor::between(
            &metamodel(),
            &path("dataElements.customer"),
            &path("features.risk"),
        )
        .is_err());
    }
}
