// Output and analysis helpers for persistent graphs, going through `petgraph`.

use std::fmt::Display;
use std::hash::Hash;

use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::dot::Config;
use petgraph::dot::Dot;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;

use super::PersistentGraph;

fn escape(label: impl Display) -> String {
    label.to_string().replace('"', "\\\"")
}

fn to_petgraph<P, V, E>(
    graph: &PersistentGraph<P, V, E>,
    include_edge: impl Fn(&E) -> bool,
) -> (StableDiGraph<P, String>, IndexMap<P, NodeIndex>)
where
    P: Clone + Eq + Hash,
    V: Clone,
    E: Clone + PartialEq + Display,
{
    let mut petgraph = StableDiGraph::new();
    let mut indices = IndexMap::new();
    for (key, _) in graph.vertices() {
        indices.insert(key.clone(), petgraph.add_node(key.clone()));
    }
    for (from, to, edge) in graph.edges() {
        if !include_edge(edge) {
            continue;
        }
        if let (Some(from), Some(to)) = (indices.get(from), indices.get(to)) {
            petgraph.add_edge(*from, *to, edge.to_string());
        }
    }
    (petgraph, indices)
}

/// Renders the graph in GraphViz DOT format.
pub fn to_dot<P, V, E>(graph: &PersistentGraph<P, V, E>) -> String
where
    P: Clone + Eq + Hash + Display,
    V: Clone,
    E: Clone + PartialEq + Display,
{
    let (petgraph, _) = to_petgraph(graph, |_| true);
    let labelled = petgraph.map(|_, key| escape(key), |_, edge| escape(edge));
    // Note: Use attribute getters in order to quote the labels ourselves instead of relying on
    //       the default `Debug`-based labeling.
    let config = [Config::NodeNoLabel, Config::EdgeNoLabel];
    Dot::with_attr_getters(
        &labelled,
        &config,
        &(|_, er| format!("label=\"{}\"", er.weight())),
        &(|_, (_, node)| format!("label=\"{}\"", node)),
    )
    .to_string()
}

/// The strongly connected components of the graph that form cycles, restricted to the edges
/// accepted by `include_edge`. Self-loops count as cycles of one vertex.
pub fn dependency_cycles<P, V, E>(
    graph: &PersistentGraph<P, V, E>,
    include_edge: impl Fn(&E) -> bool,
) -> Vec<Vec<P>>
where
    P: Clone + Eq + Hash + Ord,
    V: Clone,
    E: Clone + PartialEq + Display,
{
    let (petgraph, _) = to_petgraph(graph, include_edge);
    let mut cycles: Vec<Vec<P>> = tarjan_scc(&petgraph)
        .into_iter()
        .filter(|component| match component.as_slice() {
            [single] => petgraph.contains_edge(*single, *single),
            _ => true,
        })
        .map(|component| {
            let mut members: Vec<P> = component
                .into_iter()
                .map(|index| petgraph[index].clone())
                .collect();
            members.sort();
            members
        })
        .collect();
    cycles.sort();
    cycles
}
