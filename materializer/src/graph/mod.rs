//! An immutable directed multigraph keyed by vertex keys (operation paths in practice).
//!
//! Every mutator returns a new graph value. The vertex table, the edge table and the two
//! adjacency indices are each held behind an [`Arc`] and copied on write, so a derived graph
//! shares every table it did not touch with the graph it was derived from.
use std::fmt;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::error::MaterializerError;
use crate::error::bail;

pub mod output;

type EdgeTable<P, E> = IndexMap<(P, P), Vec<E>>;
type Adjacency<P> = IndexMap<P, IndexSet<P>>;

/// A directed graph whose edges are keyed by (from, to) pairs, each pair carrying a set of edge
/// payloads.
///
/// Invariant: edges never reference absent vertices.
pub struct PersistentGraph<P, V, E> {
    vertices: Arc<IndexMap<P, V>>,
    edges: Arc<EdgeTable<P, E>>,
    successors: Arc<Adjacency<P>>,
    predecessors: Arc<Adjacency<P>>,
}

impl<P, V, E> Clone for PersistentGraph<P, V, E> {
    fn clone(&self) -> Self {
        Self {
            vertices: self.vertices.clone(),
            edges: self.edges.clone(),
            successors: self.successors.clone(),
            predecessors: self.predecessors.clone(),
        }
    }
}

impl<P, V, E> Default for PersistentGraph<P, V, E> {
    fn default() -> Self {
        Self {
            vertices: Default::default(),
            edges: Default::default(),
            successors: Default::default(),
            predecessors: Default::default(),
        }
    }
}

impl<P, V, E> PersistentGraph<P, V, E>
where
    P: Clone + Eq + Hash,
    V: Clone,
    E: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the vertex at `key`. Existing edges are kept.
    pub fn put_vertex(&self, key: P, value: V) -> Self {
        self.clone().with_vertex(key, value)
    }

    /// Adds `edge` to the set of edges between `from` and `to`.
    ///
    /// Both endpoints must already be vertices of the graph. Adding an edge equal to one already
    /// present between the same pair leaves the graph unchanged.
    pub fn put_edge(&self, from: P, to: P, edge: E) -> Result<Self, MaterializerError>
    where
        P: fmt::Debug,
    {
        self.clone().with_edge(from, to, edge)
    }

    /// Consuming form of [`put_vertex`](Self::put_vertex). Tables this graph owns alone are
    /// updated in place.
    pub fn with_vertex(mut self, key: P, value: V) -> Self {
        Arc::make_mut(&mut self.vertices).insert(key, value);
        self
    }

    /// Consuming form of [`put_edge`](Self::put_edge). Tables this graph owns alone are updated
    /// in place.
    pub fn with_edge(mut self, from: P, to: P, edge: E) -> Result<Self, MaterializerError>
    where
        P: fmt::Debug,
    {
        if !self.vertices.contains_key(&from) {
            bail!("edge source {from:?} is not a vertex of the graph");
        }
        if !self.vertices.contains_key(&to) {
            bail!("edge target {to:?} is not a vertex of the graph");
        }
        let pair = (from.clone(), to.clone());
        if self
            .edges
            .get(&pair)
            .is_some_and(|edges| edges.contains(&edge))
        {
            return Ok(self);
        }
        Arc::make_mut(&mut self.edges)
            .entry(pair)
            .or_default()
            .push(edge);
        Arc::make_mut(&mut self.successors)
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        Arc::make_mut(&mut self.predecessors)
            .entry(to)
            .or_default()
            .insert(from);
        Ok(self)
    }

    pub fn vertex(&self, key: &P) -> Option<&V> {
        self.vertices.get(key)
    }

    pub fn contains_vertex(&self, key: &P) -> bool {
        self.vertices.contains_key(key)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// The number of individual edges, counting every payload of every pair.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn vertices(&self) -> impl Iterator<Item = (&P, &V)> {
        self.vertices.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&P, &P, &E)> {
        self.edges
            .iter()
            .flat_map(|((from, to), edges)| edges.iter().map(move |edge| (from, to, edge)))
    }

    pub fn edges_between(&self, from: &P, to: &P) -> &[E] {
        self.edges
            .get(&(from.clone(), to.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn successors(&self, key: &P) -> IndexSet<P> {
        self.successors.get(key).cloned().unwrap_or_default()
    }

    pub fn predecessors(&self, key: &P) -> IndexSet<P> {
        self.predecessors.get(key).cloned().unwrap_or_default()
    }

    pub fn has_outgoing_edges(&self, key: &P) -> bool {
        self.successors.get(key).is_some_and(|to| !to.is_empty())
    }

    /// Edges leaving `key`, as (target, payload) pairs. The iterator borrows the graph only.
    pub fn out_edges<'a>(
        &'a self,
        key: &P,
    ) -> impl Iterator<Item = (&'a P, &'a E)> + use<'a, P, V, E> {
        self.successors
            .get_key_value(key)
            .into_iter()
            .flat_map(move |(from, targets)| {
                targets.iter().flat_map(move |to| {
                    self.edges_between(from, to)
                        .iter()
                        .map(move |edge| (to, edge))
                })
            })
    }

    /// Edges entering `key`, as (source, payload) pairs. The iterator borrows the graph only.
    pub fn in_edges<'a>(
        &'a self,
        key: &P,
    ) -> impl Iterator<Item = (&'a P, &'a E)> + use<'a, P, V, E> {
        self.predecessors
            .get_key_value(key)
            .into_iter()
            .flat_map(move |(to, sources)| {
                sources.iter().flat_map(move |from| {
                    self.edges_between(from, to)
                        .iter()
                        .map(move |edge| (from, edge))
                })
            })
    }

    pub fn map_vertices<V2: Clone>(&self, f: impl Fn(&P, &V) -> V2) -> PersistentGraph<P, V2, E> {
        PersistentGraph {
            vertices: Arc::new(
                self.vertices
                    .iter()
                    .map(|(key, value)| (key.clone(), f(key, value)))
                    .collect(),
            ),
            edges: self.edges.clone(),
            successors: self.successors.clone(),
            predecessors: self.predecessors.clone(),
        }
    }

    /// Replaces every vertex by the (key, value) pairs `f` returns for it. Edges are kept only
    /// where both endpoints are still present.
    pub fn flat_map_vertices<V2, I>(&self, f: impl Fn(&P, &V) -> I) -> PersistentGraph<P, V2, E>
    where
        V2: Clone,
        I: IntoIterator<Item = (P, V2)>,
    {
        let vertices: IndexMap<P, V2> = self
            .vertices
            .iter()
            .flat_map(|(key, value)| f(key, value))
            .collect();
        PersistentGraph::with_tables(Arc::new(vertices), self.edges.as_ref().clone())
    }

    /// Keeps the vertices matching `predicate` and drops every edge touching a removed vertex.
    pub fn filter_vertices(&self, predicate: impl Fn(&P, &V) -> bool) -> Self {
        let vertices: IndexMap<P, V> = self
            .vertices
            .iter()
            .filter(|(key, value)| predicate(key, value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if vertices.len() == self.vertices.len() {
            return self.clone();
        }
        PersistentGraph::with_tables(Arc::new(vertices), self.edges.as_ref().clone())
    }

    pub fn map_edges<E2: Clone + PartialEq>(
        &self,
        f: impl Fn(&P, &P, &E) -> E2,
    ) -> PersistentGraph<P, V, E2> {
        self.flat_map_edges(|from, to, edge| Some(f(from, to, edge)))
    }

    /// Replaces every edge by the payloads `f` returns for it, between the same pair.
    pub fn flat_map_edges<E2, I>(&self, f: impl Fn(&P, &P, &E) -> I) -> PersistentGraph<P, V, E2>
    where
        E2: Clone + PartialEq,
        I: IntoIterator<Item = E2>,
    {
        let mut edges: EdgeTable<P, E2> = IndexMap::new();
        for ((from, to), payloads) in self.edges.iter() {
            for payload in payloads {
                for mapped in f(from, to, payload) {
                    let set = edges.entry((from.clone(), to.clone())).or_default();
                    if !set.contains(&mapped) {
                        set.push(mapped);
                    }
                }
            }
        }
        PersistentGraph::with_tables(self.vertices.clone(), edges)
    }

    pub fn filter_edges(&self, predicate: impl Fn(&P, &P, &E) -> bool) -> Self {
        self.flat_map_edges(|from, to, edge| predicate(from, to, edge).then(|| edge.clone()))
    }

    /// Builds a graph from raw tables, dropping edges whose endpoints are absent and empty edge
    /// sets, and recomputing both adjacency indices.
    fn with_tables(vertices: Arc<IndexMap<P, V>>, edges: EdgeTable<P, E>) -> Self {
        let edges: EdgeTable<P, E> = edges
            .into_iter()
            .filter(|((from, to), payloads)| {
                !payloads.is_empty() && vertices.contains_key(from) && vertices.contains_key(to)
            })
            .collect();
        let mut successors: Adjacency<P> = IndexMap::new();
        let mut predecessors: Adjacency<P> = IndexMap::new();
        for (from, to) in edges.keys() {
            successors.entry(from.clone()).or_default().insert(to.clone());
            predecessors.entry(to.clone()).or_default().insert(from.clone());
        }
        Self {
            vertices,
            edges: Arc::new(edges),
            successors: Arc::new(successors),
            predecessors: Arc::new(predecessors),
        }
    }

    /// Whether both graphs share the same vertex table allocation.
    #[cfg(test)]
    pub(crate) fn shares_vertices_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.vertices, &other.vertices)
    }
}

impl<P, V, E> PartialEq for PersistentGraph<P, V, E>
where
    P: Eq + Hash,
    V: PartialEq,
    E: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.vertices == other.vertices
            && self.edges.len() == other.edges.len()
            && self.edges.iter().all(|(pair, payloads)| {
                other.edges.get(pair).is_some_and(|other_payloads| {
                    payloads.len() == other_payloads.len()
                        && payloads.iter().all(|payload| other_payloads.contains(payload))
                })
            })
    }
}

impl<P, V, E> fmt::Debug for PersistentGraph<P, V, E>
where
    P: fmt::Debug,
    V: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentGraph")
            .field("vertices", &self.vertices)
            .field("edges", &self.edges)
            .finish()
    }
}

impl<P, V, E> Display for PersistentGraph<P, V, E>
where
    P: Display + Clone + Eq + Hash,
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in self.vertices.keys() {
            writeln!(f, "{key}")?;
            if let Some(targets) = self.successors.get(key) {
                for to in targets {
                    for edge in self
                        .edges
                        .get(&(key.clone(), to.clone()))
                        .into_iter()
                        .flatten()
                    {
                        writeln!(f, "  -> {to} [{edge}]")?;
                    }
                }
            }
        }
        Ok(())
    }
}
