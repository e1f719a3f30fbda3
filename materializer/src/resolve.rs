//! Field resolution on top of a dispatch plan.
use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json_bytes::Value;
use time::OffsetDateTime;

use crate::dispatch::DispatchPlan;
use crate::dispatch::SpecOutcome;
use crate::error::FieldError;
use crate::path::OperationPath;
use crate::publish::Publisher;
use crate::publish::TrackingKey;
use crate::value::TrackableValue;

/// The values of every requested field, with the errors of the fields that failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    /// Failed fields are null.
    pub data: IndexMap<OperationPath, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

/// Resolves the value of the field at `path`.
///
/// Calculated values of fields answered by a cache-capable backend are promoted and published
/// to the tracking store on the way out, unless tracking is disabled for the plan. A field is
/// published at most once per plan; later resolutions reuse the first outcome.
pub async fn resolve_field(path: &OperationPath, plan: &DispatchPlan) -> Result<Value, FieldError> {
    let Some(handle) = plan.handle(path) else {
        return Err(
            FieldError::new(format!("\"{path}\" is not part of the dispatch plan"))
                .with_code("INTERNAL")
                .at(path),
        );
    };
    let outcome = handle.outcome().await?;
    let value = match plan.backend_of(path) {
        Some((backend, capabilities))
            if plan.is_tracking()
                && capabilities.cache
                && matches!(outcome.value, TrackableValue::Calculated { .. }) =>
        {
            let publication = plan.publication(path);
            let mut published = publication.lock().await;
            match published.clone() {
                Some(result) => result?,
                None => {
                    let key = TrackingKey::new(backend.clone(), path.clone(), &outcome.inputs);
                    let result = publish(path, plan, key, outcome)
                        .await
                        .map_err(|error| error.at(path));
                    *published = Some(result.clone());
                    result?
                }
            }
        }
        _ => outcome.value,
    };
    Ok(value.into_value().unwrap_or(Value::Null))
}

async fn publish(
    path: &OperationPath,
    plan: &DispatchPlan,
    key: TrackingKey,
    outcome: SpecOutcome,
) -> Result<TrackableValue, FieldError> {
    let companion = plan
        .metamodel()
        .last_updated_of(path)
        .and_then(|companion| plan.handle(&companion).cloned());
    let last_updated = match companion {
        Some(companion) => match companion.value().await {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::debug!(%path, %error, "last-updated attribute unavailable");
                None
            }
        },
        None => None,
    };
    Publisher::new(plan.store().clone())
        .publish(
            key,
            outcome.value,
            &outcome.dependencies,
            last_updated.as_ref(),
            OffsetDateTime::now_utc(),
        )
        .await
}

/// Resolves every requested field concurrently. A failing field never fails its siblings.
pub async fn resolve_all(plan: &DispatchPlan) -> Resolution {
    let paths: Vec<&OperationPath> = plan.requested_paths().collect();
    let results = join_all(paths.iter().map(|path| resolve_field(path, plan))).await;
    let mut resolution = Resolution::default();
    for (path, result) in paths.into_iter().zip(results) {
        match result {
            Ok(value) => {
                resolution.data.insert(path.clone(), value);
            }
            Err(error) => {
                resolution.data.insert(path.clone(), Value::Null);
                resolution.errors.push(error);
            }
        }
    }
    resolution
}
