//! Dated phylogenies.
//!
//! Nodes live in a flat arena and are addressed by [`NodeId`]. Time runs
//! forward from the root at 0; a node's time is its parent's time plus its
//! branch length, so the branch above `v` spans
//! `[time(parent(v)), time(v)]`. The root carries an empty branch.
//!
//! The tree is immutable once built. Node times and the pre-order are
//! computed up front because the likelihood walks them on every move.

use rateshift_core::{RateShiftError, Result};

pub use rateshift_core::NodeId;

/// A single node of the arena.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Length of the branch above this node.
    pub branch_length: Option<f64>,
    pub name: Option<String>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A rooted tree with absolute node times.
#[derive(Debug, Clone)]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: NodeId,
    times: Vec<f64>,
    /// Parent before children, children left to right.
    preorder: Vec<NodeId>,
}

fn invalid(msg: String) -> RateShiftError {
    RateShiftError::InvalidInput(msg)
}

impl PhyloTree {
    /// Build a tree from an arena of nodes.
    ///
    /// Parent and child links must agree and every node must hang below
    /// `root`. Missing branch lengths count as zero; negative or
    /// non-finite ones are rejected.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Result<Self> {
        let n = nodes.len();
        if root >= n {
            return Err(invalid(format!("root index {} out of range ({} nodes)", root, n)));
        }
        if nodes[root].parent.is_some() {
            return Err(invalid(format!("root {} has a parent", root)));
        }
        for (i, node) in nodes.iter().enumerate() {
            if node.id != i {
                return Err(invalid(format!("node at slot {} claims id {}", i, node.id)));
            }
            if let Some(len) = node.branch_length {
                if !len.is_finite() || len < 0.0 {
                    return Err(invalid(format!("node {} has invalid branch length {}", i, len)));
                }
            }
            for &child in &node.children {
                if nodes.get(child).and_then(|c| c.parent) != Some(i) {
                    return Err(invalid(format!("child {} of node {} does not point back", child, i)));
                }
            }
        }

        let mut times = vec![0.0; n];
        let mut preorder = Vec::with_capacity(n);
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if preorder.len() == n {
                return Err(invalid("node links contain a cycle".into()));
            }
            preorder.push(id);
            for &child in nodes[id].children.iter().rev() {
                times[child] = times[id] + nodes[child].branch_length.unwrap_or(0.0);
                stack.push(child);
            }
        }
        if preorder.len() != n {
            return Err(invalid(format!(
                "{} of {} nodes are not reachable from the root",
                n - preorder.len(),
                n
            )));
        }

        Ok(Self {
            nodes,
            root,
            times,
            preorder,
        })
    }

    /// Parse a Newick string.
    pub fn from_newick(input: &str) -> Result<Self> {
        crate::newick::parse(input)
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder
            .iter()
            .copied()
            .filter(|&id| self.nodes[id].is_leaf())
            .collect()
    }

    /// Nodes with children, root included, in pre-order.
    pub fn interior_nodes(&self) -> Vec<NodeId> {
        self.preorder
            .iter()
            .copied()
            .filter(|&id| !self.nodes[id].is_leaf())
            .collect()
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name.as_deref() == Some(name))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    /// Absolute time of a node (root = 0).
    pub fn time(&self, id: NodeId) -> f64 {
        self.times[id]
    }

    /// Time at which the branch above `id` begins; the root's own time for
    /// the root.
    pub fn branch_start(&self, id: NodeId) -> f64 {
        self.nodes[id]
            .parent
            .map_or(self.times[id], |p| self.times[p])
    }

    pub fn branch_end(&self, id: NodeId) -> f64 {
        self.times[id]
    }

    /// Sum of all branch lengths below the root.
    pub fn total_branch_length(&self) -> f64 {
        self.preorder
            .iter()
            .map(|&id| self.branch_end(id) - self.branch_start(id))
            .sum()
    }

    /// Map a distance along the concatenated branches (in pre-order) to
    /// the branch it falls on and the absolute time there.
    ///
    /// Distances past the end clamp to the tip of the last branch. `None`
    /// only when the tree has no branch of positive length.
    pub fn locate(&self, position: f64) -> Option<(NodeId, f64)> {
        let mut remaining = position;
        let mut last = None;
        for &id in &self.preorder {
            let (start, end) = (self.branch_start(id), self.branch_end(id));
            if end <= start {
                continue;
            }
            if remaining < end - start {
                return Some((id, start + remaining));
            }
            remaining -= end - start;
            last = Some(id);
        }
        last.map(|id| (id, self.branch_end(id)))
    }

    pub fn iter_preorder(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.preorder.iter().copied()
    }

    /// Children before parents (the reverse of the pre-order).
    pub fn iter_postorder(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.preorder.iter().rev().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEWICK: &str = "((A:0.1,B:0.2)AB:0.3,(C:0.4,D:0.5)CD:0.6)root;";

    fn sample_tree() -> PhyloTree {
        PhyloTree::from_newick(NEWICK).unwrap()
    }

    fn leaf(id: NodeId, parent: NodeId, len: f64) -> Node {
        Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            branch_length: Some(len),
            name: None,
        }
    }

    fn cherry() -> Vec<Node> {
        vec![
            Node {
                id: 0,
                parent: None,
                children: vec![1, 2],
                branch_length: None,
                name: None,
            },
            leaf(1, 0, 1.0),
            leaf(2, 0, 2.0),
        ]
    }

    #[test]
    fn node_times_accumulate_from_root() {
        let tree = sample_tree();
        let a = tree.node_by_name("A").unwrap();
        assert!((tree.time(a) - 0.4).abs() < 1e-12);
        assert!((tree.branch_start(a) - 0.3).abs() < 1e-12);
        assert!((tree.branch_end(a) - 0.4).abs() < 1e-12);
        assert_eq!(tree.branch_start(tree.root()), tree.branch_end(tree.root()));
    }

    #[test]
    fn total_branch_length_sums_non_root() {
        assert!((sample_tree().total_branch_length() - 2.1).abs() < 1e-12);
    }

    #[test]
    fn locate_walks_preorder_branches() {
        let tree = sample_tree();
        // Pre-order: AB(0.3), A(0.1), B(0.2), CD(0.6), ...
        let (node, t) = tree.locate(0.35).unwrap();
        assert_eq!(node, tree.node_by_name("A").unwrap());
        assert!((t - 0.35).abs() < 1e-12);
        let (node, t) = tree.locate(0.7).unwrap();
        assert_eq!(node, tree.node_by_name("CD").unwrap());
        assert!((t - 0.1).abs() < 1e-12);
        let (node, t) = tree.locate(99.0).unwrap();
        assert_eq!(node, tree.node_by_name("D").unwrap());
        assert!((t - 1.1).abs() < 1e-12);
    }

    #[test]
    fn locate_needs_a_branch() {
        let tree = PhyloTree::from_newick("(A:0,B:0);").unwrap();
        assert!(tree.locate(0.0).is_none());
    }

    #[test]
    fn traversal_orders() {
        let tree = sample_tree();
        let pre: Vec<NodeId> = tree.iter_preorder().collect();
        assert_eq!(pre, vec![0, 1, 2, 3, 4, 5, 6]);
        let post: Vec<NodeId> = tree.iter_postorder().collect();
        for (i, &id) in post.iter().enumerate() {
            if let Some(p) = tree.parent(id) {
                assert!(post[i + 1..].contains(&p), "parent of {} visited first", id);
            }
        }
    }

    #[test]
    fn interior_nodes_include_root() {
        let tree = sample_tree();
        assert_eq!(tree.interior_nodes(), vec![0, 1, 4]);
        assert_eq!(tree.leaves().len(), tree.leaf_count());
    }

    #[test]
    fn arena_builder_accepts_consistent_links() {
        let tree = PhyloTree::from_nodes(cherry(), 0).unwrap();
        assert_eq!(tree.time(2), 2.0);
        assert_eq!(tree.total_branch_length(), 3.0);
    }

    #[test]
    fn negative_branch_rejected() {
        let mut nodes = cherry();
        nodes[1].branch_length = Some(-1.0);
        assert!(PhyloTree::from_nodes(nodes, 0).is_err());
    }

    #[test]
    fn one_sided_link_rejected() {
        let mut nodes = cherry();
        nodes[2].parent = Some(1);
        assert!(PhyloTree::from_nodes(nodes, 0).is_err());
    }

    #[test]
    fn unreachable_node_rejected() {
        let mut nodes = cherry();
        nodes[0].children.pop();
        assert!(PhyloTree::from_nodes(nodes, 0).is_err());
    }

    #[test]
    fn bad_root_rejected() {
        assert!(PhyloTree::from_nodes(cherry(), 5).is_err());
        assert!(PhyloTree::from_nodes(cherry(), 1).is_err());
    }
}
