//! Flattening of an operation's selection sets into the selected paths.
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::executable;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use indexmap::IndexSet;
use indexmap::map::Entry;

use crate::error::MaterializerError;
use crate::metamodel::Metamodel;
use crate::path::OperationPath;
use crate::value::Variables;

/// A field selected by the operation, after fragments are flattened and aliases resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedField {
    pub path: OperationPath,
    /// The keys the field appears under in the response (aliases or the field name).
    pub response_keys: IndexSet<Name>,
    /// The arguments as written in the operation.
    pub arguments: Vec<Node<ast::Argument>>,
}

impl SelectedField {
    pub fn argument(&self, name: &Name) -> Option<&Node<ast::Value>> {
        self.arguments
            .iter()
            .find(|argument| &argument.name == name)
            .map(|argument| &argument.value)
    }
}

/// The boolean `if` argument of the named directive, read through `variables` when it is a
/// variable. `None` when the directive is absent.
fn eval_directive(
    directives: &executable::DirectiveList,
    name: &str,
    variables: &Variables,
) -> Option<bool> {
    match directives.get(name)?.specified_argument_by_name("if")?.as_ref() {
        ast::Value::Boolean(value) => Some(*value),
        ast::Value::Variable(variable) => variables.get(variable.as_str())?.as_bool(),
        _ => None,
    }
}

/// Whether `@skip` or `@include` excludes a selection.
fn is_skipped(directives: &executable::DirectiveList, variables: &Variables) -> bool {
    eval_directive(directives, "skip", variables) == Some(true)
        || eval_directive(directives, "include", variables) == Some(false)
}

struct SelectionCollector<'a> {
    metamodel: &'a Metamodel,
    document: &'a ExecutableDocument,
    variables: &'a Variables,
    selected: IndexMap<OperationPath, SelectedField>,
}

/// Collects the fields selected by the operation, parents before children.
pub(crate) fn collect_selections(
    metamodel: &Metamodel,
    document: &Valid<ExecutableDocument>,
    operation_name: Option<&str>,
    variables: &Variables,
) -> Result<IndexMap<OperationPath, SelectedField>, MaterializerError> {
    let operation = document.operations.get(operation_name).map_err(|_| {
        MaterializerError::UnsupportedOperation {
            message: match operation_name {
                Some(name) => format!("the document has no operation named \"{name}\""),
                None => "the document must contain exactly one operation when no name is given"
                    .to_string(),
            },
        }
    })?;
    if operation.operation_type != OperationType::Query {
        return Err(MaterializerError::UnsupportedOperation {
            message: format!("{} operations are not supported", operation.operation_type),
        });
    }
    let mut collector = SelectionCollector {
        metamodel,
        document,
        variables,
        selected: IndexMap::new(),
    };
    collector.collect(&OperationPath::root(), &operation.selection_set)?;
    Ok(collector.selected)
}

impl SelectionCollector<'_> {
    fn collect(
        &mut self,
        base: &OperationPath,
        selection_set: &executable::SelectionSet,
    ) -> Result<(), MaterializerError> {
        for selection in &selection_set.selections {
            match selection {
                executable::Selection::Field(field) => {
                    if is_skipped(&field.directives, self.variables)
                        || field.name.starts_with("__")
                    {
                        continue;
                    }
                    let path = base.field(field.name.clone());
                    self.check_known(&path)?;
                    match self.selected.entry(path.clone()) {
                        Entry::Occupied(mut entry) => {
                            if !same_arguments(&entry.get().arguments, &field.arguments) {
                                return Err(MaterializerError::UnsupportedOperation {
                                    message: format!(
                                        "\"{path}\" is selected more than once with different arguments"
                                    ),
                                });
                            }
                            entry
                                .get_mut()
                                .response_keys
                                .insert(field.response_key().clone());
                        }
                        Entry::Vacant(entry) => {
                            entry.insert(SelectedField {
                                path: path.clone(),
                                response_keys: IndexSet::from([field.response_key().clone()]),
                                arguments: field.arguments.clone(),
                            });
                        }
                    }
                    self.collect(&path, &field.selection_set)?;
                }
                executable::Selection::InlineFragment(inline) => {
                    if is_skipped(&inline.directives, self.variables) {
                        continue;
                    }
                    let base = self.narrow(base, &selection_set.ty, inline.type_condition.as_ref());
                    self.collect(&base, &inline.selection_set)?;
                }
                executable::Selection::FragmentSpread(spread) => {
                    if is_skipped(&spread.directives, self.variables) {
                        continue;
                    }
                    let document = self.document;
                    let Some(fragment) = document.fragments.get(&spread.fragment_name) else {
                        return Err(MaterializerError::UnsupportedOperation {
                            message: format!("unknown fragment {}", spread.fragment_name),
                        });
                    };
                    let base =
                        self.narrow(base, &selection_set.ty, Some(fragment.type_condition()));
                    self.collect(&base, &fragment.selection_set)?;
                }
            }
        }
        Ok(())
    }

    /// A type condition adds an inline-fragment segment only when it narrows an abstract type,
    /// which is when the metamodel has paths behind that segment.
    fn narrow(
        &self,
        base: &OperationPath,
        parent_type: &Name,
        condition: Option<&Name>,
    ) -> OperationPath {
        match condition {
            Some(condition) if condition != parent_type && !base.is_root() => {
                let narrowed = base.inline_fragment(condition.clone());
                let has_fragment_paths = self
                    .metamodel
                    .graph()
                    .successors(base)
                    .iter()
                    .any(|child| child.starts_with(&narrowed));
                if has_fragment_paths {
                    narrowed
                } else {
                    base.clone()
                }
            }
            _ => base.clone(),
        }
    }

    fn check_known(&self, path: &OperationPath) -> Result<(), MaterializerError> {
        if self.metamodel.source(path).is_some() {
            return Ok(());
        }
        let message = if path.len() == 1 {
            format!("\"{path}\" is not a domain root")
        } else if path.operation_depth() > self.metamodel.max_operation_depth() {
            format!(
                "\"{path}\" is deeper than the maximum operation depth of {}",
                self.metamodel.max_operation_depth()
            )
        } else {
            format!("\"{path}\" is not part of the metamodel")
        };
        Err(MaterializerError::UnsupportedOperation { message })
    }
}

fn same_arguments(left: &[Node<ast::Argument>], right: &[Node<ast::Argument>]) -> bool {
    left.len() == right.len()
        && left.iter().all(|argument| {
            right
                .iter()
                .any(|other| other.name == argument.name && other.value == argument.value)
        })
}
