//! Hierarchical addresses of requested fields and arguments.
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;
use std::str::FromStr;
use std::sync::Arc;

use apollo_compiler::Name;
use serde::Serialize;
use serde::Serializer;

const ARGUMENT_SEPARATOR: char = '@';
const FIELD_SEPARATOR: char = '.';
const FRAGMENT_SEPARATOR: char = '~';

/// One step of an [`OperationPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(Name),
    Argument(Name),
    /// An inline fragment narrowing the parent to the named type.
    InlineFragment(Name),
}

impl PathSegment {
    pub fn name(&self) -> &Name {
        match self {
            PathSegment::Field(name)
            | PathSegment::Argument(name)
            | PathSegment::InlineFragment(name) => name,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PathSegment::Field(_) => 0,
            PathSegment::Argument(_) => 1,
            PathSegment::InlineFragment(_) => 2,
        }
    }

    fn separator(&self) -> char {
        match self {
            PathSegment::Field(_) => FIELD_SEPARATOR,
            PathSegment::Argument(_) => ARGUMENT_SEPARATOR,
            PathSegment::InlineFragment(_) => FRAGMENT_SEPARATOR,
        }
    }
}

impl Ord for PathSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.name().as_str().cmp(other.name().as_str()))
    }
}

impl PartialOrd for PathSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An immutable sequence of [`PathSegment`]s.
///
/// Paths are cheap to clone: the segments are shared, and `child` copies them once into a new
/// allocation. Two paths are equal iff their segment sequences are equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OperationPath {
    segments: Arc<[PathSegment]>,
}

impl OperationPath {
    pub fn root() -> Self {
        Self {
            segments: Arc::from(Vec::new()),
        }
    }

    pub fn new(segments: impl IntoIterator<Item = PathSegment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// The number of field segments, which is what the maximum operation depth bounds.
    pub fn operation_depth(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, PathSegment::Field(_)))
            .count()
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment);
        Self {
            segments: segments.into(),
        }
    }

    pub fn field(&self, name: Name) -> Self {
        self.child(PathSegment::Field(name))
    }

    pub fn argument(&self, name: Name) -> Self {
        self.child(PathSegment::Argument(name))
    }

    pub fn inline_fragment(&self, type_name: Name) -> Self {
        self.child(PathSegment::InlineFragment(type_name))
    }

    pub fn parent(&self) -> Option<Self> {
        self.prefix(self.segments.len().checked_sub(1)?)
    }

    fn prefix(&self, len: usize) -> Option<Self> {
        (len <= self.segments.len()).then(|| Self {
            segments: self.segments[..len].into(),
        })
    }

    /// Every strict ancestor, nearest first. The root path is not included.
    pub fn ancestors(&self) -> impl Iterator<Item = OperationPath> + '_ {
        (1..self.segments.len())
            .rev()
            .filter_map(|len| self.prefix(len))
    }

    /// Strict ancestors whose last segment is a field, nearest first.
    pub fn field_ancestors(&self) -> impl Iterator<Item = OperationPath> + '_ {
        self.ancestors()
            .filter(|ancestor| matches!(ancestor.last(), Some(PathSegment::Field(_))))
    }

    pub fn starts_with(&self, prefix: &OperationPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    pub fn is_ancestor_of(&self, other: &OperationPath) -> bool {
        other.segments.len() > self.segments.len() && other.starts_with(self)
    }

    /// The segments leading from `ancestor` to this path, if `ancestor` is a prefix of it.
    pub fn relative_to(&self, ancestor: &OperationPath) -> Option<&[PathSegment]> {
        self.starts_with(ancestor)
            .then(|| &self.segments[ancestor.segments.len()..])
    }

    pub fn common_prefix_len(&self, other: &OperationPath) -> usize {
        self.segments
            .iter()
            .zip(other.segments.iter())
            .take_while(|(left, right)| left == right)
            .count()
    }

    /// The name of the last segment when it is a field.
    pub fn field_name(&self) -> Option<&Name> {
        match self.last()? {
            PathSegment::Field(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_argument(&self) -> bool {
        matches!(self.last(), Some(PathSegment::Argument(_)))
    }

    /// For an argument path (possibly nested in an input object), the path of the field the
    /// argument belongs to.
    pub fn owning_field(&self) -> Option<Self> {
        let position = self
            .segments
            .iter()
            .position(|segment| matches!(segment, PathSegment::Argument(_)))?;
        self.prefix(position)
    }
}

impl Default for OperationPath {
    fn default() -> Self {
        Self::root()
    }
}

impl Ord for OperationPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.iter().cmp(other.segments.iter())
    }
}

impl PartialOrd for OperationPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for OperationPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 || !matches!(segment, PathSegment::Field(_)) {
                write!(f, "{}", segment.separator())?;
            }
            write!(f, "{}", segment.name())?;
        }
        Ok(())
    }
}

impl fmt::Debug for OperationPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "OperationPath({self})")
    }
}

impl Serialize for OperationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid operation path \"{input}\": {reason}")]
pub struct PathParseError {
    input: String,
    reason: String,
}

impl FromStr for OperationPath {
    type Err = PathParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let error = |reason: String| PathParseError {
            input: input.to_owned(),
            reason,
        };
        if input.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        let mut separator = FIELD_SEPARATOR;
        let mut start = 0;
        let bounds = input
            .char_indices()
            .filter(|(_, c)| [FIELD_SEPARATOR, ARGUMENT_SEPARATOR, FRAGMENT_SEPARATOR].contains(c))
            .chain(std::iter::once((input.len(), FIELD_SEPARATOR)));
        for (end, next_separator) in bounds {
            let raw = &input[start..end];
            if raw.is_empty() {
                // A leading argument or fragment marker yields an empty first chunk.
                if end == 0 {
                    separator = next_separator;
                    start = end + next_separator.len_utf8();
                    continue;
                }
                return Err(error(format!("empty segment at offset {start}")));
            }
            let name = Name::new(raw).map_err(|e| error(e.to_string()))?;
            segments.push(match separator {
                ARGUMENT_SEPARATOR => PathSegment::Argument(name),
                FRAGMENT_SEPARATOR => PathSegment::InlineFragment(name),
                _ => PathSegment::Field(name),
            });
            separator = next_separator;
            start = end + next_separator.len_utf8();
        }
        Ok(Self::new(segments))
    }
}

/// The (type, field) identity of a schema element, independent of the path it is reached by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldCoordinates {
    pub type_name: Name,
    pub field_name: Name,
}

impl FieldCoordinates {
    pub fn new(type_name: Name, field_name: Name) -> Self {
        Self {
            type_name,
            field_name,
        }
    }
}

impl Display for FieldCoordinates {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn path(s: &str) -> OperationPath {
        s.parse().unwrap()
    }

    #[rstest]
    #[case("")]
    #[case("dataElements")]
    #[case("dataElements.customer.orders@limit")]
    #[case("features.node~Product.sku")]
    #[case("transformers.normalize@input@scale")]
    fn canonical_form_round_trips(#[case] input: &str) {
        assert_eq!(path(input).to_string(), input);
    }

    #[test]
    fn segments_are_parsed_by_kind() {
        let parsed = path("features.node~Product.sku@unit");
        assert_eq!(
            parsed.segments(),
            &[
                PathSegment::Field(name!("features")),
                PathSegment::Field(name!("node")),
                PathSegment::InlineFragment(name!("Product")),
                PathSegment::Field(name!("sku")),
                PathSegment::Argument(name!("unit")),
            ]
        );
        assert_eq!(parsed.operation_depth(), 3);
    }

    #[test]
    fn rejects_empty_segments() {
        assert!("dataElements..customer".parse::<OperationPath>().is_err());
        assert!("dataElements.".parse::<OperationPath>().is_err());
    }

    #[test]
    fn ancestors_are_nearest_first() {
        let ancestors: Vec<_> = path("a.b~T.c@x").ancestors().map(|p| p.to_string()).collect();
        assert_eq!(ancestors, vec!["a.b~T.c", "a.b~T", "a.b", "a"]);

        let field_ancestors: Vec<_> = path("a.b~T.c@x")
            .field_ancestors()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(field_ancestors, vec!["a.b~T.c", "a.b", "a"]);
    }

    #[test]
    fn child_and_parent_are_inverse() {
        let base = path("dataElements.customer");
        let child = base.field(name!("name"));
        assert_eq!(child.parent(), Some(base.clone()));
        assert!(base.is_ancestor_of(&child));
        assert!(!child.is_ancestor_of(&base));
        assert!(!base.is_ancestor_of(&base));
        assert_eq!(
            child.relative_to(&base),
            Some(&[PathSegment::Field(name!("name"))][..])
        );
        assert_eq!(OperationPath::root().parent(), None);
    }

    #[test]
    fn owning_field_of_nested_argument() {
        assert_eq!(
            path("transformers.normalize@input@scale").owning_field(),
            Some(path("transformers.normalize"))
        );
        assert_eq!(path("transformers.normalize").owning_field(), None);
    }

    #[test]
    fn equality_is_by_segments() {
        assert_eq!(path("a.b"), OperationPath::root().field(name!("a")).field(name!("b")));
        assert_ne!(path("a.b"), path("a@b"));
        assert!(path("a.b") < path("a.c"));
        assert!(path("a") < path("a.b"));
    }
}
