use apollo_compiler::name;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;

use super::*;

const SCHEMA: &str = include_str!("../../tests/fixtures/schema.graphql");

fn path(s: &str) -> OperationPath {
    s.parse().unwrap()
}

fn metamodel() -> Metamodel {
    Metamodel::parse(SCHEMA, &MetamodelConfig::default()).unwrap()
}

#[test]
fn records_paths_and_coordinates_both_ways() {
    let metamodel = metamodel();
    let name_path = path("dataElements.customer.name");
    let coordinates = FieldCoordinates::new(name!("Customer"), name!("name"));
    assert_eq!(metamodel.coordinates(&name_path), Some(&coordinates));

    let paths = metamodel.paths_for(&coordinates).unwrap();
    assert!(paths.contains(&name_path));
    assert!(paths.contains(&path("dataElements.customer.referrer.name")));
    assert!(matches!(
        metamodel.vertex(&name_path),
        Some(Vertex::SourceLeaf(_))
    ));
    assert!(matches!(
        metamodel.vertex(&path("dataElements")),
        Some(Vertex::SourceRoot(_))
    ));
    assert!(matches!(
        metamodel.vertex(&path("dataElements.customer.orders")),
        Some(Vertex::SourceJunction(SourceVertex { list_depth: 1, .. }))
    ));
}

#[test]
fn back_references_stop_at_the_maximum_depth() {
    let config = MetamodelConfig {
        max_operation_depth: 4,
        ..Default::default()
    };
    let metamodel = Metamodel::parse(SCHEMA, &config).unwrap();
    assert!(metamodel
        .vertex(&path("dataElements.customer.referrer.name"))
        .is_some());
    assert!(metamodel
        .vertex(&path("dataElements.customer.referrer.referrer"))
        .is_some());
    assert!(metamodel
        .vertex(&path("dataElements.customer.referrer.referrer.name"))
        .is_none());
    let deepest = metamodel
        .graph()
        .vertices()
        .map(|(path, _)| path.operation_depth())
        .max();
    assert_eq!(deepest, Some(4));
}

#[test]
fn backends_are_declared_or_inherited() {
    let metamodel = metamodel();
    let crm: Vec<BackendKey> = vec![Arc::from("crm")];
    assert_eq!(metamodel.backends(&path("dataElements.customer")), crm);
    assert_eq!(
        metamodel.backends(&path("dataElements.customer.orders.total")),
        crm
    );
    assert_eq!(
        metamodel.backends(&path("dataElements.customer.accountId")),
        vec![Arc::<str>::from("billing")]
    );
    assert_eq!(metamodel.backends(&path("features.merged")).len(), 2);
    assert!(metamodel.backends(&path("dataElements")).is_empty());
}

#[test]
fn arguments_become_parameter_vertices() {
    let metamodel = metamodel();
    let arguments: Vec<_> = metamodel
        .arguments(&path("features.risk"))
        .map(ToString::to_string)
        .collect();
    assert_eq!(arguments, vec!["features.risk@customerId", "features.risk@region"]);

    let risk = metamodel.parameter(&path("features.risk@customerId")).unwrap();
    assert_eq!(risk.owner, path("features.risk"));
    assert!(risk.required);

    assert!(matches!(
        metamodel.vertex(&path("transformers.normalize@input")),
        Some(Vertex::ParameterJunction(_))
    ));
    let input_fields: Vec<_> = metamodel
        .input_fields(&path("transformers.normalize@input"))
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        input_fields,
        vec![
            "transformers.normalize@input@value",
            "transformers.normalize@input@scale"
        ]
    );
    assert_eq!(
        metamodel.arguments_named("limit").count(),
        metamodel.paths_named("orders").count()
    );
}

#[test]
fn default_values_are_converted() {
    let metamodel = metamodel();
    assert_eq!(
        metamodel.default_value(&path("dataElements.customer.orders@limit")),
        Some(&json!(10))
    );
    assert_eq!(
        metamodel.default_value(&path("dataElements.exchangeRate@currency")),
        Some(&json!("EUR"))
    );
    assert_eq!(
        metamodel.default_value(&path("transformers.normalize@input@scale")),
        Some(&json!(1.0))
    );
    assert_eq!(
        metamodel.default_value(&path("dataElements.customer@id")),
        None
    );
}

#[test]
fn interfaces_expand_implementations_behind_fragments() {
    let metamodel = metamodel();
    assert_eq!(
        metamodel.coordinates(&path("features.node.key")),
        Some(&FieldCoordinates::new(name!("Node"), name!("key")))
    );
    assert_eq!(
        metamodel.coordinates(&path("features.node~Product.sku")),
        Some(&FieldCoordinates::new(name!("Product"), name!("sku")))
    );
    assert!(metamodel.vertex(&path("features.node~Product")).is_none());
}

#[test]
fn registries_link_companions_and_aliases() {
    let metamodel = metamodel();
    assert_eq!(
        metamodel.last_updated_of(&path("dataElements.customer.name")),
        Some(path("dataElements.customer.updatedAt"))
    );
    assert_eq!(
        metamodel.entity_id_of(&path("dataElements.customer.referrer.region")),
        Some(path("dataElements.customer.referrer.id"))
    );
    assert_eq!(
        metamodel.last_updated_of(&path("dataElements.customer.updatedAt")),
        None
    );
    assert_eq!(metamodel.last_updated_of(&path("features.risk")), None);
    assert!(metamodel
        .aliases_of(&path("features.risk@customerId"))
        .contains("id"));
}

#[test]
fn domains_describe_their_subtrees() {
    let metamodel = metamodel();
    let names: Vec<_> = metamodel.domains().map(|domain| domain.name.as_str()).collect();
    assert_eq!(names, vec!["dataElements", "transformers", "features"]);

    let features = metamodel.domain("features").unwrap();
    assert_eq!(features.root_type, name!("Features"));
    assert!(features.source_paths.contains(&path("features.node~Product.sku")));
    assert!(features.parameter_paths.contains(&path("features.risk@region")));
    assert!(!features.source_paths.contains(&path("dataElements.customer")));
}

#[test]
fn rebuilding_an_unchanged_schema_gives_equal_indices() {
    let first = metamodel();
    let second = metamodel();
    assert!(!Arc::ptr_eq(&first.indices, &second.indices));
    assert_eq!(first, second);
    assert_eq!(first.version(), second.version());
    assert_eq!(first.version().as_str().len(), 64);

    let changed = Metamodel::parse(
        &SCHEMA.replace("sku: String", "sku: String\n  price: Float"),
        &MetamodelConfig::default(),
    )
    .unwrap();
    assert_ne!(first.version(), changed.version());
    assert_ne!(first, changed);
}

#[test]
fn leaf_without_backend_is_rejected() {
    let sdl = r#"
        directive @source(name: String!) repeatable on FIELD_DEFINITION
        type Query { dataElements: D transformers: D features: D }
        type D { orphan: Int }
    "#;
    let error = Metamodel::parse(sdl, &MetamodelConfig::default()).unwrap_err();
    assert!(matches!(error, MaterializerError::SchemaIntegrity { .. }));
    insta::assert_snapshot!(
        error.to_string(),
        @r###"invalid schema: D.orphan at "dataElements.orphan" has no @source and inherits none"###
    );
}

#[test]
fn arguments_without_a_backend_are_rejected() {
    let sdl = r#"
        directive @source(name: String!) repeatable on FIELD_DEFINITION
        type Query { dataElements: D transformers: D features: D }
        type D { customer(id: ID!): C }
        type C { name: String @source(name: "crm") }
    "#;
    let error = Metamodel::parse(sdl, &MetamodelConfig::default()).unwrap_err();
    assert!(matches!(error, MaterializerError::SchemaIntegrity { .. }));
    insta::assert_snapshot!(
        error.to_string(),
        @r###"invalid schema: D.customer at "dataElements.customer" takes arguments but has no @source and inherits none"###
    );
}

#[test]
fn missing_domain_root_is_rejected() {
    let sdl = r#"
        directive @source(name: String!) repeatable on FIELD_DEFINITION
        type Query { dataElements: D }
        type D { value: Int @source(name: "x") }
    "#;
    let error = Metamodel::parse(sdl, &MetamodelConfig::default()).unwrap_err();
    insta::assert_snapshot!(
        error.to_string(),
        @r###"invalid schema: query type Query has no domain root field "transformers""###
    );
}

#[test]
fn invalid_sdl_is_a_schema_integrity_error() {
    let error = Metamodel::parse("type Query {", &MetamodelConfig::default()).unwrap_err();
    assert_eq!(error.code(), "SCHEMA_INTEGRITY");
}
