use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use pretty_assertions::assert_eq;
use request_materializer::BackendRegistry;
use request_materializer::Configuration;
use request_materializer::Metamodel;
use request_materializer::build_request_graph;
use request_materializer::dispatch;
use request_materializer::publish::InMemoryTrackingStore;
use request_materializer::request::ParameterBinding;
use request_materializer::resolve_all;
use serde_json_bytes::Map;
use serde_json_bytes::json;

use crate::common::MockBackend;
use crate::common::path;

const SDL: &str = r#"
directive @origin(name: String!) repeatable on FIELD_DEFINITION

type Query {
  data: Data
  ops: Ops
  signals: Signals
}

type Data {
  customer: Customer @origin(name: "crm")
}

type Customer {
  customerNumber: ID
  referrer: Customer
}

type Ops {
  noop: Int @origin(name: "math")
}

type Signals {
  score(subject: ID): Float @origin(name: "scoring")
}
"#;

const CONFIG: &str = r#"
metamodel:
  max_operation_depth: 3
  domains:
    data_elements: data
    transformers: ops
    features: signals
  directives:
    source: origin
  aliases:
    subject: [customerNumber]
tracking:
  enabled: false
"#;

#[tokio::test]
async fn configured_names_drive_the_whole_pipeline() {
    let config = Configuration::from_yaml(CONFIG).unwrap();
    let schema = Schema::parse_and_validate(SDL, "schema.graphql").unwrap();
    let metamodel = Metamodel::build(&schema, &config.metamodel).unwrap();
    assert_eq!(metamodel.max_operation_depth(), 3);
    assert!(metamodel.vertex(&path("data.customer.referrer")).is_some());
    assert!(metamodel
        .vertex(&path("data.customer.referrer.customerNumber"))
        .is_none());

    let document = ExecutableDocument::parse_and_validate(
        &schema,
        "{ data { customer { customerNumber } } signals { score } }",
        "query.graphql",
    )
    .unwrap();
    let graph = build_request_graph(&metamodel, &document, None, &Map::new()).unwrap();
    match graph.binding(&path("signals.score@subject")) {
        Some(ParameterBinding::Dependent { source, extractor }) => {
            assert_eq!(source, &path("data.customer.customerNumber"));
            assert!(extractor.is_identity());
        }
        other => panic!("unexpected binding {other:?}"),
    }

    let scoring = MockBackend::batch(|_, _| Ok(json!(0.4)));
    let backends = BackendRegistry::new()
        .register(
            "crm",
            MockBackend::batch(|_, _| Ok(json!({ "customerNumber": "n-7" }))),
        )
        .register("scoring", scoring.clone());
    let store = Arc::new(InMemoryTrackingStore::new());
    let plan = dispatch(&graph, &metamodel, &backends, store.clone())
        .unwrap()
        .with_tracking(&config.tracking);
    let resolution = resolve_all(&plan).await;
    assert!(resolution.errors.is_empty());
    assert_eq!(
        resolution.data.get(&path("signals.score")),
        Some(&json!(0.4))
    );
    let (_, inputs) = scoring.seen().pop().unwrap();
    assert_eq!(inputs.get(&path("signals.score@subject")), Some(&json!("n-7")));
    assert!(store.is_empty());
}
