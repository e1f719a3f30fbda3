/// Emits a trace event carrying a snapshot of a graph-shaped value, so that the evolution of
/// request graphs and dispatch plans can be followed in the logs. Compiled out unless the
/// `snapshot_tracing` feature is enabled.
///
/// Pass a serializable value to have it rendered as JSON:
/// ```ignore
/// snapshot!(plan.rounds(), "dispatch rounds");
/// // trace!(snapshot = "&[Vec<OperationPath>]", data = "[..]", "dispatch rounds");
/// ```
/// or a name tag and an already rendered value:
/// ```ignore
/// snapshot!("RequestGraph", graph.to_string(), "connected request graph");
/// ```
macro_rules! snapshot {
    ($value:expr, $msg:literal) => {
        #[cfg(feature = "snapshot_tracing")]
        tracing::trace!(
            snapshot = std::any::type_name_of_val(&$value),
            data = serde_json::to_string(&$value)
                .unwrap_or_else(|error| format!("<unserializable: {error}>")),
            $msg
        );
    };
    ($name:literal, $value:expr, $msg:literal) => {
        #[cfg(feature = "snapshot_tracing")]
        tracing::trace!(snapshot = $name, data = $value, $msg);
    };
}

pub(crate) use snapshot;
