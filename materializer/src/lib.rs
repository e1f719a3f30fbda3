//! Request materialization graphs.
//!
//! A GraphQL schema describes three domains of values (data elements, transformers and
//! features), each field answered by one backend. This crate turns the schema into a
//! [`Metamodel`], connects each query into a [`RequestGraph`] that batches the selected fields
//! into retrieval specs, schedules those specs into a [`DispatchPlan`] of shared, at-most-once
//! handles, and resolves fields from it while publishing trackable values to an external cache.
//!
//! ```ignore
//! let metamodel = Metamodel::parse(sdl, &config.metamodel)?;
//! let request = build_request_graph(&metamodel, &document, None, &variables)?;
//! let plan = dispatch(&request, &metamodel, &backends, store)?.with_tracking(&config.tracking);
//! let resolution = resolve_all(&plan).await;
//! ```

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

pub mod backend;
pub mod configuration;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod metamodel;
pub mod path;
pub mod publish;
pub mod request;
pub mod resolve;
pub(crate) mod utils;
pub mod value;

pub use crate::backend::Backend;
pub use crate::backend::BackendRegistry;
pub use crate::configuration::Configuration;
pub use crate::dispatch::DispatchPlan;
pub use crate::dispatch::dispatch;
pub use crate::error::FieldError;
pub use crate::error::MaterializerError;
pub use crate::metamodel::Metamodel;
pub use crate::path::OperationPath;
pub use crate::request::RequestGraph;
pub use crate::request::build_request_graph;
pub use crate::resolve::Resolution;
pub use crate::resolve::resolve_all;
pub use crate::resolve::resolve_field;
pub use crate::value::TrackableValue;
