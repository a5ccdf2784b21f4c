// src/dag/graph.rs

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use super::DagError;

/// Anything that can sit in a DAG: it only has to expose a stable id.
pub trait DagNode {
    type Id: Clone + Eq + Hash + Debug;

    fn node_id(&self) -> Self::Id;
}

/// A directed edge `from -> to` between two node ids.
pub trait DagEdge<Id> {
    fn from_id(&self) -> Id;
    fn to_id(&self) -> Id;
}

/// Graph algorithms over any node/edge set.
///
/// Implementors only provide `nodes()` and `edges()`. Edges whose endpoints
/// are not both present in `nodes()` are ignored by the layering algorithm.
pub trait Dag {
    type Node: DagNode;
    type Edge: DagEdge<<Self::Node as DagNode>::Id>;

    fn nodes(&self) -> &[Self::Node];
    fn edges(&self) -> &[Self::Edge];

    /// DFS over every node, tracking the active path. A back-edge to a node
    /// still on the path (self-loops included) is a cycle.
    fn has_cycle(&self) -> bool {
        let adj: HashMap<<Self::Node as DagNode>::Id, Vec<_>> = adjacency(self.edges());
        let mut visited = HashSet::new();
        let mut in_path = HashSet::new();

        self.nodes().iter().any(|node| {
            let id = node.node_id();
            !visited.contains(&id) && dfs_finds_cycle(&id, &adj, &mut visited, &mut in_path)
        })
    }

    /// Kahn's algorithm.
    ///
    /// Layer `i` holds exactly the nodes whose in-degree drops to zero once
    /// layers `0..i` are removed. A trailing empty layer is always appended,
    /// so an empty graph yields `[[]]`. Within a layer nodes keep their
    /// insertion order, but callers should not rely on it.
    fn layers(&self) -> Result<Vec<Vec<&Self::Node>>, DagError> {
        if self.has_cycle() {
            return Err(DagError::CycleDetected);
        }

        let nodes = self.nodes();
        let mut in_degree: HashMap<<Self::Node as DagNode>::Id, usize> =
            nodes.iter().map(|n| (n.node_id(), 0)).collect();

        let mut adjacency: HashMap<<Self::Node as DagNode>::Id, Vec<_>> = HashMap::new();
        for edge in self.edges() {
            let (from, to) = (edge.from_id(), edge.to_id());
            if !in_degree.contains_key(&from) {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(&to) {
                *degree += 1;
                adjacency.entry(from).or_default().push(to);
            }
        }

        let mut remaining: Vec<&Self::Node> = nodes.iter().collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&Self::Node>, Vec<&Self::Node>) = remaining
                .into_iter()
                .partition(|n| in_degree.get(&n.node_id()).copied().unwrap_or(0) == 0);

            // Peeling stalled: whatever is left sits on a cycle.
            if ready.is_empty() {
                return Err(DagError::CycleDetected);
            }

            for node in &ready {
                let id = node.node_id();
                in_degree.remove(&id);
                if let Some(targets) = adjacency.get(&id) {
                    for to in targets {
                        if let Some(degree) = in_degree.get_mut(to) {
                            *degree = degree.saturating_sub(1);
                        }
                    }
                }
            }

            layers.push(ready);
            remaining = blocked;
        }

        layers.push(Vec::new());
        Ok(layers)
    }

    fn root_layer(&self) -> Result<Vec<&Self::Node>, DagError> {
        self.layers()?
            .into_iter()
            .next()
            .ok_or(DagError::NoLayerFound)
    }

    /// First layer `i` whose predecessor layer `i - 1` satisfies `f`.
    fn next_layer_by<F>(&self, f: F) -> Result<Vec<&Self::Node>, DagError>
    where
        F: Fn(&[&Self::Node]) -> bool,
    {
        let mut layers = self.layers()?;
        let found = (1..layers.len()).find(|&i| f(&layers[i - 1]));
        match found {
            Some(i) => Ok(layers.swap_remove(i)),
            None => Err(DagError::NoLayerFound),
        }
    }

    /// Like [`Dag::next_layer_by`], but falls back to the root layer when no
    /// layer satisfies `f` (nothing has been processed yet).
    fn next_layer_by_or_root<F>(&self, f: F) -> Result<Vec<&Self::Node>, DagError>
    where
        F: Fn(&[&Self::Node]) -> bool,
    {
        let mut layers = self.layers()?;
        if layers.len() == 1 {
            return Ok(layers.swap_remove(0));
        }
        let found = (1..layers.len()).find(|&i| f(&layers[i - 1])).unwrap_or(0);
        Ok(layers.swap_remove(found))
    }

    fn layer_by<F>(&self, f: F) -> Result<Vec<&Self::Node>, DagError>
    where
        F: Fn(&[&Self::Node]) -> bool,
    {
        self.layers()?
            .into_iter()
            .find(|layer| f(layer))
            .ok_or(DagError::NoLayerFound)
    }

    /// Same as [`Dag::layer_by`] but scanning from the last layer backwards.
    fn layer_by_reversed<F>(&self, f: F) -> Result<Vec<&Self::Node>, DagError>
    where
        F: Fn(&[&Self::Node]) -> bool,
    {
        self.layers()?
            .into_iter()
            .rev()
            .find(|layer| f(layer))
            .ok_or(DagError::NoLayerFound)
    }

    fn all_by<F>(&self, f: F) -> bool
    where
        F: Fn(&Self::Node) -> bool,
    {
        self.nodes().iter().all(f)
    }

    fn any_by<F>(&self, f: F) -> bool
    where
        F: Fn(&Self::Node) -> bool,
    {
        self.nodes().iter().any(f)
    }

    fn filter_nodes<F>(&self, f: F) -> Vec<&Self::Node>
    where
        F: Fn(&Self::Node) -> bool,
    {
        self.nodes().iter().filter(|n| f(*n)).collect()
    }
}

fn adjacency<Id, E>(edges: &[E]) -> HashMap<Id, Vec<Id>>
where
    Id: Clone + Eq + Hash,
    E: DagEdge<Id>,
{
    let mut adjacency: HashMap<Id, Vec<Id>> = HashMap::new();
    for edge in edges {
        adjacency.entry(edge.from_id()).or_default().push(edge.to_id());
    }
    adjacency
}

fn dfs_finds_cycle<Id>(
    id: &Id,
    adjacency: &HashMap<Id, Vec<Id>>,
    visited: &mut HashSet<Id>,
    in_path: &mut HashSet<Id>,
) -> bool
where
    Id: Clone + Eq + Hash,
{
    if in_path.contains(id) {
        return true;
    }
    if visited.contains(id) {
        return false;
    }

    visited.insert(id.clone());
    in_path.insert(id.clone());

    if let Some(neighbors) = adjacency.get(id) {
        for next in neighbors {
            if dfs_finds_cycle(next, adjacency, visited, in_path) {
                return true;
            }
        }
    }

    in_path.remove(id);
    false
}

/// Plain directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge<Id> {
    pub from: Id,
    pub to: Id,
}

impl<Id> Edge<Id> {
    pub fn new(from: Id, to: Id) -> Self {
        Self { from, to }
    }
}

impl<Id: Clone> DagEdge<Id> for Edge<Id> {
    fn from_id(&self) -> Id {
        self.from.clone()
    }

    fn to_id(&self) -> Id {
        self.to.clone()
    }
}

/// Owned node/edge lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph<N, E> {
    pub nodes: Vec<N>,
    pub edges: Vec<E>,
}

impl<N, E> Graph<N, E> {
    pub fn new(nodes: Vec<N>, edges: Vec<E>) -> Self {
        Self { nodes, edges }
    }

    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }
}

impl<N, E> Dag for Graph<N, E>
where
    N: DagNode,
    E: DagEdge<N::Id>,
{
    type Node = N;
    type Edge = E;

    fn nodes(&self) -> &[N] {
        &self.nodes
    }

    fn edges(&self) -> &[E] {
        &self.edges
    }
}
