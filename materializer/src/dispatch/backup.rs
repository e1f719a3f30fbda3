//! Wiring of cache-first dispatches to their backup retrievals.
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::handle::Backup;
use super::handle::BackupSlot;
use crate::error::MaterializerError;
use crate::error::bail;
use crate::path::OperationPath;
use crate::request::ParameterBinding;
use crate::request::RequestGraph;

/// Orders cache-first dispatches so that a dispatch whose sources feed another's parameters
/// comes before it.
pub(super) fn wiring_order(
    request: &RequestGraph,
    cache_first: &[OperationPath],
) -> Result<Vec<OperationPath>, MaterializerError> {
    let mut graph = DiGraph::<OperationPath, ()>::new();
    let nodes: IndexMap<&OperationPath, _> = cache_first
        .iter()
        .map(|anchor| (anchor, graph.add_node(anchor.clone())))
        .collect();

    for (anchor, node) in &nodes {
        let Some(spec) = request.spec(anchor) else {
            bail!("no retrieval spec anchored at \"{anchor}\"");
        };
        for parameter in spec.parameters() {
            let Some(ParameterBinding::Dependent { source, .. }) = request.binding(&parameter.path)
            else {
                continue;
            };
            let feeding = request
                .anchor_of(source)
                .and_then(|feeding| nodes.get(feeding));
            if let Some(feeding) = feeding {
                if feeding != node {
                    graph.update_edge(*feeding, *node, ());
                }
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|node| graph[node].clone()).collect()),
        Err(cycle) => bail!(
            "cache-first dispatches depend on each other through \"{}\"",
            graph[cycle.node_id()]
        ),
    }
}

/// Fills the backup slot of every cache-first dispatch, in wiring order.
pub(super) fn wire(
    order: &[OperationPath],
    mut backups: IndexMap<OperationPath, (BackupSlot, Backup)>,
) -> Result<(), MaterializerError> {
    for anchor in order {
        let Some((slot, backup)) = backups.swap_remove(anchor) else {
            bail!("no backup prepared for \"{anchor}\"");
        };
        if slot.set(Arc::new(backup)).is_err() {
            bail!("backup of \"{anchor}\" was wired twice");
        }
        tracing::trace!(%anchor, "wired backup retrieval");
    }
    Ok(())
}
