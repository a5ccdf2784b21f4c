// src/resource/tree.rs

//! Parent-linked resources materialised as a strict tree.
//!
//! Traversal callbacks receive `(node, depth)` and return
//! `Ok(true)` to keep going, `Ok(false)` to stop quietly, or an error,
//! which aborts the walk and is returned to the caller.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;

use uuid::Uuid;

use super::model::Resource;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub resource: Resource,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            children: Vec::new(),
        }
    }

    /// Builder-style child attachment; also sets the child's `parent_id`.
    pub fn with_child(mut self, mut child: TreeNode) -> Self {
        child.resource.parent_id = Some(self.resource.id);
        self.children.push(child);
        self
    }

    pub fn id(&self) -> Uuid {
        self.resource.id
    }

    /// Rebuild the tree rooted at `root_id` from flat rows linked by
    /// `parent_id`. Rows not reachable from the root are ignored.
    pub fn from_resources(
        root_id: Uuid,
        resources: impl IntoIterator<Item = Resource>,
    ) -> Option<Self> {
        let mut root = None;
        let mut by_parent: HashMap<Uuid, Vec<Resource>> = HashMap::new();

        for resource in resources {
            if resource.id == root_id {
                root = Some(resource);
            } else if let Some(parent) = resource.parent_id {
                by_parent.entry(parent).or_default().push(resource);
            }
        }

        root.map(|r| Self::attach(r, &mut by_parent))
    }

    fn attach(resource: Resource, by_parent: &mut HashMap<Uuid, Vec<Resource>>) -> Self {
        let children = by_parent
            .remove(&resource.id)
            .unwrap_or_default()
            .into_iter()
            .map(|child| Self::attach(child, by_parent))
            .collect();
        Self { resource, children }
    }

    /// Node first, then children.
    pub fn traverse_pre_order<'a, E, F>(&'a self, mut callback: F) -> Result<(), E>
    where
        F: FnMut(&'a TreeNode, usize) -> Result<bool, E>,
    {
        pre_order(self, &mut callback, 0).map(|_| ())
    }

    /// Children first, then the node.
    pub fn traverse_post_order<'a, E, F>(&'a self, mut callback: F) -> Result<(), E>
    where
        F: FnMut(&'a TreeNode, usize) -> Result<bool, E>,
    {
        post_order(self, &mut callback, 0).map(|_| ())
    }

    /// Level by level.
    pub fn traverse_breadth_first<'a, E, F>(&'a self, mut callback: F) -> Result<(), E>
    where
        F: FnMut(&'a TreeNode, usize) -> Result<bool, E>,
    {
        let mut queue: VecDeque<(&'a TreeNode, usize)> = VecDeque::from([(self, 0)]);

        while let Some((node, depth)) = queue.pop_front() {
            if !callback(node, depth)? {
                return Ok(());
            }
            queue.extend(node.children.iter().map(|child| (child, depth + 1)));
        }
        Ok(())
    }

    /// First node (pre-order) matching `predicate`.
    pub fn find<P>(&self, predicate: P) -> Option<&TreeNode>
    where
        P: Fn(&TreeNode) -> bool,
    {
        let mut found = None;
        let _ = self.traverse_pre_order(|node, _| -> Result<bool, Infallible> {
            if predicate(node) {
                found = Some(node);
                return Ok(false);
            }
            Ok(true)
        });
        found
    }

    pub fn find_mut(&mut self, id: Uuid) -> Option<&mut TreeNode> {
        if self.resource.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// All nodes (pre-order) matching `predicate`.
    pub fn collect<P>(&self, predicate: P) -> Vec<&TreeNode>
    where
        P: Fn(&TreeNode) -> bool,
    {
        let mut out = Vec::new();
        let _ = self.traverse_pre_order(|node, _| -> Result<bool, Infallible> {
            if predicate(node) {
                out.push(node);
            }
            Ok(true)
        });
        out
    }

    /// Every node except the root itself.
    pub fn descendants(&self) -> Vec<&TreeNode> {
        let root_id = self.id();
        self.collect(|node| node.id() != root_id)
    }

    pub fn count_nodes(&self) -> usize {
        self.collect(|_| true).len()
    }

    /// Depth of the deepest node; the root is depth 0.
    pub fn max_depth(&self) -> usize {
        let mut max = 0;
        let _ = self.traverse_pre_order(|_, depth| -> Result<bool, Infallible> {
            max = max.max(depth);
            Ok(true)
        });
        max
    }

    /// Resources in pre-order.
    pub fn resources(&self) -> Vec<&Resource> {
        self.collect(|_| true)
            .into_iter()
            .map(|node| &node.resource)
            .collect()
    }

    /// Path from the root to the first node matching `predicate`, excluding
    /// that node. `None` if nothing matches.
    pub fn parents<P>(&self, predicate: P) -> Option<Vec<&TreeNode>>
    where
        P: Fn(&TreeNode) -> bool,
    {
        let mut path = self.ancestors(predicate)?;
        path.pop();
        Some(path)
    }

    /// Path from the root to the first node matching `predicate`, including
    /// that node. `None` if nothing matches.
    pub fn ancestors<P>(&self, predicate: P) -> Option<Vec<&TreeNode>>
    where
        P: Fn(&TreeNode) -> bool,
    {
        let mut path = Vec::new();
        find_path(self, &predicate, &mut path).then_some(path)
    }

    pub fn is_node_ready(&self) -> bool {
        self.resource.is_ready()
    }

    /// Root ready and every descendant ready.
    pub fn is_node_and_descendants_ready(&self) -> bool {
        let descendants = self.descendants();
        let ready = descendants.iter().filter(|n| n.is_node_ready()).count();
        self.is_node_ready() && ready == descendants.len()
    }
}

fn pre_order<'a, E, F>(node: &'a TreeNode, callback: &mut F, depth: usize) -> Result<bool, E>
where
    F: FnMut(&'a TreeNode, usize) -> Result<bool, E>,
{
    if !callback(node, depth)? {
        return Ok(false);
    }
    for child in &node.children {
        if !pre_order(child, callback, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn post_order<'a, E, F>(node: &'a TreeNode, callback: &mut F, depth: usize) -> Result<bool, E>
where
    F: FnMut(&'a TreeNode, usize) -> Result<bool, E>,
{
    for child in &node.children {
        if !post_order(child, callback, depth + 1)? {
            return Ok(false);
        }
    }
    callback(node, depth)
}

fn find_path<'a, P>(node: &'a TreeNode, predicate: &P, path: &mut Vec<&'a TreeNode>) -> bool
where
    P: Fn(&TreeNode) -> bool,
{
    path.push(node);
    if predicate(node) {
        return true;
    }
    for child in &node.children {
        if find_path(child, predicate, path) {
            return true;
        }
    }
    path.pop();
    false
}
