use apollo_compiler::Schema;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;

use super::*;
use crate::configuration::MetamodelConfig;
use crate::request::edge::ValueOrigin;

const SCHEMA: &str = include_str!("../../tests/fixtures/schema.graphql");

fn path(s: &str) -> OperationPath {
    s.parse().unwrap()
}

fn metamodel() -> (Valid<Schema>, Metamodel) {
    let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
    let metamodel = Metamodel::build(&schema, &MetamodelConfig::default()).unwrap();
    (schema, metamodel)
}

fn build(query: &str, variables: Value) -> Result<RequestGraph, MaterializerError> {
    let (schema, metamodel) = metamodel();
    let document =
        ExecutableDocument::parse_and_validate(&schema, query, "query.graphql").unwrap();
    let Value::Object(variables) = variables else {
        panic!("variables must be an object");
    };
    build_request_graph(&metamodel, &document, None, &variables)
}

fn origin_of(graph: &RequestGraph, owner: &str, parameter: &str) -> Option<ValueOrigin> {
    graph
        .graph()
        .edges_between(&path(owner), &path(parameter))
        .iter()
        .find_map(|edge| match edge {
            RequestEdge::MaterializedValue { origin, .. } => Some(*origin),
            _ => None,
        })
}

#[test]
fn children_attach_to_the_ancestor_retrieval() {
    let graph = build(
        r#"{ dataElements { customer(id: "c1") { name orders { total } } } }"#,
        json!({}),
    )
    .unwrap();

    let anchors: Vec<_> = graph.specs().keys().map(ToString::to_string).collect();
    assert_eq!(anchors, vec!["dataElements.customer"]);

    let spec = graph.spec(&path("dataElements.customer")).unwrap();
    assert_eq!(&**spec.backend(), "crm");
    let sources: Vec<_> = spec.sources().map(|source| source.path.to_string()).collect();
    assert_eq!(
        sources,
        vec![
            "dataElements.customer",
            "dataElements.customer.name",
            "dataElements.customer.updatedAt",
            "dataElements.customer.id",
            "dataElements.customer.orders",
            "dataElements.customer.orders.total",
        ]
    );
    let parameters: Vec<_> = spec
        .parameters()
        .map(|parameter| parameter.path.to_string())
        .collect();
    assert_eq!(
        parameters,
        vec!["dataElements.customer@id", "dataElements.customer.orders@limit"]
    );

    assert_eq!(
        graph
            .extractor(&path("dataElements.customer.orders.total"))
            .unwrap()
            .to_string(),
        ".orders[].total"
    );
    assert!(graph
        .extractor(&path("dataElements.customer"))
        .unwrap()
        .is_identity());
}

#[test]
fn parameters_take_literals_variables_and_defaults() {
    let graph = build(
        r#"query($c: ID!) { dataElements { customer(id: $c) { orders { total } } exchangeRate } }"#,
        json!({ "c": "c9" }),
    )
    .unwrap();

    assert_eq!(
        graph.binding(&path("dataElements.customer@id")),
        Some(ParameterBinding::Materialized(&json!("c9")))
    );
    assert_eq!(
        origin_of(&graph, "dataElements.customer", "dataElements.customer@id"),
        Some(ValueOrigin::Variable)
    );
    assert_eq!(
        graph.binding(&path("dataElements.customer.orders@limit")),
        Some(ParameterBinding::Materialized(&json!(10)))
    );
    assert_eq!(
        origin_of(
            &graph,
            "dataElements.customer.orders",
            "dataElements.customer.orders@limit"
        ),
        Some(ValueOrigin::Default)
    );
    assert_eq!(
        origin_of(
            &graph,
            "dataElements.exchangeRate",
            "dataElements.exchangeRate@currency"
        ),
        Some(ValueOrigin::Default)
    );
}

#[test]
fn input_object_literals_are_materialized_whole() {
    let graph = build(
        r#"{ transformers { normalize(input: { value: 2.5 }) } }"#,
        json!({}),
    )
    .unwrap();
    assert_eq!(
        graph.binding(&path("transformers.normalize@input")),
        Some(ParameterBinding::Materialized(&json!({ "value": 2.5 })))
    );
    assert!(!graph
        .graph()
        .contains_vertex(&path("transformers.normalize@input@scale")));
}

#[test]
fn companion_attributes_are_connected_with_their_field() {
    let graph = build(
        r#"{ dataElements { customer(id: "c1") { name } } }"#,
        json!({}),
    )
    .unwrap();
    assert!(graph.is_connected(&path("dataElements.customer.updatedAt")));
    assert!(graph.is_connected(&path("dataElements.customer.id")));
    assert!(!graph.is_connected(&path("dataElements.customer.region")));
    assert!(!graph.selections().contains_key(&path("dataElements.customer.updatedAt")));
}

#[test]
fn a_child_with_another_backend_gets_its_own_anchor() {
    let graph = build(
        r#"{ dataElements { customer(id: "c1") { accountId } } }"#,
        json!({}),
    )
    .unwrap();
    let anchors: Vec<_> = graph.specs().keys().map(ToString::to_string).collect();
    assert_eq!(
        anchors,
        vec!["dataElements.customer", "dataElements.customer.accountId"]
    );
    assert_eq!(
        &**graph
            .spec_for(&path("dataElements.customer.accountId"))
            .unwrap()
            .backend(),
        "billing"
    );
}

#[test]
fn unsatisfied_parameters_are_matched_to_selected_fields() {
    let graph = build(
        r#"
        query($account: ID!, $customer: ID!) {
          dataElements {
            customer(id: "c1") { id region accountId }
            ledger(accountId: $account)
          }
          features { risk(customerId: $customer) }
        }
        "#,
        json!({}),
    )
    .unwrap();

    let accounts = path("dataElements.customer.accountId");
    let ids = path("dataElements.customer.id");
    let regions = path("dataElements.customer.region");
    assert_eq!(
        graph.binding(&path("dataElements.ledger@accountId")),
        Some(ParameterBinding::Dependent {
            source: &accounts,
            extractor: &Extractor::identity(),
        })
    );
    assert_eq!(
        graph.binding(&path("features.risk@customerId")),
        Some(ParameterBinding::Dependent {
            source: &ids,
            extractor: &Extractor::identity(),
        })
    );
    assert_eq!(
        graph.binding(&path("features.risk@region")),
        Some(ParameterBinding::Dependent {
            source: &regions,
            extractor: &Extractor::identity(),
        })
    );
    assert!(graph
        .spec(&path("features.risk"))
        .unwrap()
        .has_parameter(&path("features.risk@customerId")));
}

#[test]
fn optional_parameters_without_a_source_are_unresolved() {
    let error = build(
        r#"{ dataElements { customer(id: "c1") { id } } features { risk(customerId: "c1") } }"#,
        json!({}),
    )
    .unwrap_err();
    assert!(matches!(
        error,
        MaterializerError::UnresolvedDependency { .. }
    ));
    assert_eq!(error.paths(), vec![path("features.risk@region")]);
}

#[test]
fn required_parameters_without_a_source_are_unresolved() {
    let error = build(
        r#"query($customer: ID!) { features { risk(customerId: $customer) } }"#,
        json!({}),
    )
    .unwrap_err();
    assert_eq!(error.paths(), vec![path("features.risk@customerId")]);
    insta::assert_snapshot!(
        error.to_string(),
        @r###"unresolved dependency: no value source for parameter "features.risk@customerId""###
    );
}

#[test]
fn more_than_one_backend_is_ambiguous() {
    let error = build(r#"{ features { merged } }"#, json!({})).unwrap_err();
    assert!(matches!(error, MaterializerError::AmbiguousBackend { .. }));
    assert_eq!(error.paths(), vec![path("features.merged")]);
}

#[test]
fn connecting_twice_changes_nothing() {
    let (schema, metamodel) = metamodel();
    let document = ExecutableDocument::parse_and_validate(
        &schema,
        r#"{ dataElements { customer(id: "c1") { name orders { total } } } }"#,
        "query.graphql",
    )
    .unwrap();
    let variables = Variables::new();
    let selections =
        selection::collect_selections(&metamodel, &document, None, &variables).unwrap();
    let mut connector = Connector::new(&metamodel, &variables, &selections);
    for path in selections.keys() {
        connector.connect_source(path).unwrap();
    }
    let once = connector.graph.clone();
    for path in selections.keys() {
        connector.connect_source(path).unwrap();
    }
    assert_eq!(connector.graph, once);
}

#[test]
fn renders_dot() {
    let graph = build(
        r#"{ dataElements { customer(id: "c1") { name } } }"#,
        json!({}),
    )
    .unwrap();
    let dot = graph.to_dot();
    assert!(dot.starts_with("digraph {"));
    assert!(dot.contains(r#"label="extract .name""#));
    assert!(dot.contains(r#"label="spec dataElements.customer""#));
}
