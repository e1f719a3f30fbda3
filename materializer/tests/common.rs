use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use async_trait::async_trait;
use request_materializer::FieldError;
use request_materializer::Metamodel;
use request_materializer::MaterializerError;
use request_materializer::OperationPath;
use request_materializer::RequestGraph;
use request_materializer::backend::Backend;
use request_materializer::backend::BatchRetrieval;
use request_materializer::backend::Capabilities;
use request_materializer::backend::RetrievalInputs;
use request_materializer::build_request_graph;
use request_materializer::configuration::MetamodelConfig;
use request_materializer::request::spec::RetrievalFunctionSpec;
use serde_json_bytes::Value;

pub(crate) const SCHEMA: &str = include_str!("fixtures/schema.graphql");

pub(crate) fn path(s: &str) -> OperationPath {
    s.parse().unwrap()
}

/// Connects `query` against `sdl` with the given JSON object of variables.
pub(crate) fn request(
    sdl: &str,
    query: &str,
    variables: Value,
) -> (Metamodel, Result<RequestGraph, MaterializerError>) {
    let schema = Schema::parse_and_validate(sdl, "schema.graphql").unwrap();
    let metamodel = Metamodel::build(&schema, &MetamodelConfig::default()).unwrap();
    let document = ExecutableDocument::parse_and_validate(&schema, query, "query.graphql").unwrap();
    let Value::Object(variables) = variables else {
        panic!("variables must be an object");
    };
    let graph = build_request_graph(&metamodel, &document, None, &variables);
    (metamodel, graph)
}

type Answer = dyn Fn(&OperationPath, &RetrievalInputs) -> Result<Value, FieldError> + Send + Sync;

/// A backend answering every retrieval through a closure, counting the calls it receives.
pub(crate) struct MockBackend {
    capabilities: Capabilities,
    answer: Arc<Answer>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(OperationPath, RetrievalInputs)>>>,
}

impl MockBackend {
    pub(crate) fn batch(
        answer: impl Fn(&OperationPath, &RetrievalInputs) -> Result<Value, FieldError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Self::with_capabilities(
            Capabilities {
                batch: true,
                cache: false,
            },
            answer,
        )
    }

    pub(crate) fn with_capabilities(
        capabilities: Capabilities,
        answer: impl Fn(&OperationPath, &RetrievalInputs) -> Result<Value, FieldError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            answer: Arc::new(answer),
            calls: Default::default(),
            seen: Default::default(),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Anchors and inputs of every call, in call order.
    pub(crate) fn seen(&self) -> Vec<(OperationPath, RetrievalInputs)> {
        self.seen.lock().unwrap().clone()
    }
}

impl Backend for MockBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn batch_retrieval(
        &self,
        spec: &RetrievalFunctionSpec,
    ) -> Result<Arc<dyn BatchRetrieval>, FieldError> {
        Ok(Arc::new(MockRetrieval {
            anchor: spec.anchor().clone(),
            answer: self.answer.clone(),
            calls: self.calls.clone(),
            seen: self.seen.clone(),
        }))
    }
}

struct MockRetrieval {
    anchor: OperationPath,
    answer: Arc<Answer>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(OperationPath, RetrievalInputs)>>>,
}

#[async_trait]
impl BatchRetrieval for MockRetrieval {
    async fn retrieve(&self, inputs: RetrievalInputs) -> Result<Value, FieldError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // leave room for concurrent consumers to pile up on the same handle
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.seen
            .lock()
            .unwrap()
            .push((self.anchor.clone(), inputs.clone()));
        (self.answer)(&self.anchor, &inputs)
    }
}
