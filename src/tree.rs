//!
//! Phylogenetic tree collaborator backed by `petgraph::DiGraph`
//!
//! Edges point parent → child and carry the branch length above the child.
//! The root of a rooted topology has two children; an unrooted topology is
//! stored with a three-child root. Nodes are never removed, so
//! `NodeIndex::index()` is a stable dense id the engine uses for its
//! per-node buffers.
//!
use crate::error::{PhyloError, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Branch {
    pub length: f64,
}

///
/// Rooted or unrooted topology with branch lengths.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tree {
    graph: DiGraph<TreeNode, Branch>,
    root: NodeIndex,
}

impl Tree {
    ///
    /// A tree consisting of a lone root.
    ///
    pub fn new() -> Tree {
        let mut graph = DiGraph::new();
        let root = graph.add_node(TreeNode { name: None });
        Tree { graph, root }
    }
    ///
    /// Attach a new child below `parent` with the given branch length.
    /// Tips get a taxon name, internal nodes pass `None`.
    ///
    pub fn add_child(
        &mut self,
        parent: NodeIndex,
        name: Option<&str>,
        branch_length: f64,
    ) -> NodeIndex {
        let child = self.graph.add_node(TreeNode {
            name: name.map(|s| s.to_string()),
        });
        self.graph.add_edge(parent, child, Branch { length: branch_length });
        child
    }
    pub fn root(&self) -> NodeIndex {
        self.root
    }
    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }
    ///
    /// Children in insertion order.
    ///
    pub fn children(&self, node: NodeIndex) -> Vec<NodeIndex> {
        // petgraph iterates neighbors most-recent first
        let mut v: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        v.reverse();
        v
    }
    pub fn parent(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .neighbors_directed(node, Direction::Incoming)
            .next()
    }
    pub fn is_tip(&self, node: NodeIndex) -> bool {
        self.graph
            .neighbors_directed(node, Direction::Outgoing)
            .next()
            .is_none()
    }
    pub fn is_root(&self, node: NodeIndex) -> bool {
        node == self.root
    }
    pub fn name(&self, node: NodeIndex) -> Option<&str> {
        self.graph[node].name.as_deref()
    }
    ///
    /// Length of the branch above `node`; the root has none.
    ///
    pub fn branch_length(&self, node: NodeIndex) -> Option<f64> {
        self.parent(node).map(|p| {
            let e = self.graph.find_edge(p, node).unwrap();
            self.graph[e].length
        })
    }
    pub fn set_branch_length(&mut self, node: NodeIndex, length: f64) -> Result<()> {
        let p = self.parent(node).ok_or_else(|| {
            PhyloError::ModelConstraint("the root has no branch above it".to_string())
        })?;
        let e = self.graph.find_edge(p, node).unwrap();
        self.graph[e].length = length;
        Ok(())
    }
    ///
    /// Tips in post-order; this is the topology order that defines pattern
    /// keys during compression.
    ///
    pub fn tips(&self) -> Vec<NodeIndex> {
        self.post_order()
            .into_iter()
            .filter(|&n| self.is_tip(n))
            .collect()
    }
    pub fn tip_names(&self) -> Vec<String> {
        self.tips()
            .iter()
            .map(|&n| self.name(n).unwrap_or_default().to_string())
            .collect()
    }
    ///
    /// Every node, children strictly before parents, root last.
    ///
    pub fn post_order(&self) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.num_nodes());
        self.post_order_from(self.root, &mut order);
        order
    }
    fn post_order_from(&self, node: NodeIndex, order: &mut Vec<NodeIndex>) {
        for child in self.children(node) {
            self.post_order_from(child, order);
        }
        order.push(node);
    }
    ///
    /// Number of children of the root: 2 for a rooted topology, 3 for the
    /// unrooted convention. Anything else is rejected when the engine
    /// attaches to the tree.
    ///
    pub fn root_degree(&self) -> usize {
        self.children(self.root).len()
    }
}

impl Default for Tree {
    fn default() -> Tree {
        Tree::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ((A:0.1,B:0.2):0.05,C:0.3);
    fn three_taxon() -> (Tree, Vec<NodeIndex>) {
        let mut t = Tree::new();
        let ab = t.add_child(t.root(), None, 0.05);
        let a = t.add_child(ab, Some("A"), 0.1);
        let b = t.add_child(ab, Some("B"), 0.2);
        let c = t.add_child(t.root(), Some("C"), 0.3);
        (t, vec![a, b, c, ab])
    }

    #[test]
    fn topology_accessors() {
        let (t, nodes) = three_taxon();
        let (a, b, c, ab) = (nodes[0], nodes[1], nodes[2], nodes[3]);
        assert_eq!(t.num_nodes(), 5);
        assert_eq!(t.root_degree(), 2);
        assert_eq!(t.children(t.root()), vec![ab, c]);
        assert_eq!(t.children(ab), vec![a, b]);
        assert_eq!(t.parent(a), Some(ab));
        assert_eq!(t.parent(t.root()), None);
        assert!(t.is_tip(a) && t.is_tip(c) && !t.is_tip(ab));
        assert_eq!(t.name(b), Some("B"));
        assert_eq!(t.branch_length(b), Some(0.2));
        assert_eq!(t.branch_length(t.root()), None);
    }

    #[test]
    fn post_order_children_first() {
        let (t, _) = three_taxon();
        let order = t.post_order();
        assert_eq!(order.len(), 5);
        assert_eq!(*order.last().unwrap(), t.root());
        let pos = |n: NodeIndex| order.iter().position(|&x| x == n).unwrap();
        for n in order.iter() {
            for child in t.children(*n) {
                assert!(pos(child) < pos(*n));
            }
        }
        assert_eq!(t.tip_names(), vec!["A", "B", "C"]);
    }

    #[test]
    fn branch_length_updates() {
        let (mut t, nodes) = three_taxon();
        t.set_branch_length(nodes[0], 0.42).unwrap();
        assert_eq!(t.branch_length(nodes[0]), Some(0.42));
        assert!(t.set_branch_length(t.root(), 1.0).is_err());
    }

    #[test]
    fn unrooted_root_degree() {
        let mut t = Tree::new();
        t.add_child(t.root(), Some("A"), 0.1);
        t.add_child(t.root(), Some("B"), 0.1);
        t.add_child(t.root(), Some("C"), 0.1);
        assert_eq!(t.root_degree(), 3);
    }
}
