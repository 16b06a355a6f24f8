//! Arena-backed union-find for clustering resources into connected components.
//!
//! Node identifiers are arena indices handed out in creation order, so the
//! union direction (smaller identifier becomes the root) depends only on the
//! order nodes were created in, never on thread scheduling. An arena lives for
//! exactly one grouping call.

/// Identifier of a node inside one [`DisjointSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Union-find with path compression and smallest-identifier roots.
///
/// `NodeId`s are only meaningful for the arena that created them.
#[derive(Debug, Clone, Default)]
pub struct DisjointSet {
    parents: Vec<NodeId>,
}

impl DisjointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            parents: Vec::with_capacity(capacity),
        }
    }

    /// Creates a singleton set and returns its node.
    pub fn make_node(&mut self) -> NodeId {
        let id = NodeId(self.parents.len());
        self.parents.push(id);
        id
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Returns the representative of `node`'s set, pointing every node on the
    /// way directly at it.
    pub fn find(&mut self, node: NodeId) -> NodeId {
        let mut root = node;
        while self.parents[root.0] != root {
            root = self.parents[root.0];
        }

        let mut current = node;
        while current != root {
            let next = self.parents[current.0];
            self.parents[current.0] = root;
            current = next;
        }

        root
    }

    /// Merges the sets of `a` and `b`. Returns `false` if they were already
    /// the same set.
    pub fn union(&mut self, a: NodeId, b: NodeId) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }

        let (root, child) = if root_a < root_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parents[child.0] = root;
        true
    }

    pub fn connected(&mut self, a: NodeId, b: NodeId) -> bool {
        self.find(a) == self.find(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_nodes_are_singletons() {
        let mut set = DisjointSet::new();
        let a = set.make_node();
        let b = set.make_node();

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(set.find(a), a);
        assert_eq!(set.find(b), b);
        assert!(!set.connected(a, b));
    }

    #[test]
    fn test_smaller_identifier_becomes_root() {
        let mut set = DisjointSet::new();
        let nodes: Vec<_> = (0..4).map(|_| set.make_node()).collect();

        // Union in "reverse" direction; the root must still be the smallest id.
        assert!(set.union(nodes[3], nodes[2]));
        assert_eq!(set.find(nodes[3]), nodes[2]);

        assert!(set.union(nodes[3], nodes[0]));
        assert_eq!(set.find(nodes[2]), nodes[0]);
        assert_eq!(set.find(nodes[3]), nodes[0]);
        assert_eq!(set.find(nodes[1]), nodes[1]);
    }

    #[test]
    fn test_union_of_connected_nodes_is_noop() {
        let mut set = DisjointSet::new();
        let a = set.make_node();
        let b = set.make_node();
        let c = set.make_node();

        assert!(set.union(a, b));
        assert!(set.union(b, c));
        assert!(!set.union(a, c));
        assert!(set.connected(a, c));
    }

    #[test]
    fn test_find_compresses_paths() {
        let mut set = DisjointSet::new();
        let nodes: Vec<_> = (0..5).map(|_| set.make_node()).collect();

        // Build the chain 4 -> 3 -> 2 -> 1 -> 0 by hand.
        for window in nodes.windows(2) {
            set.parents[window[1].0] = window[0];
        }

        assert_eq!(set.find(nodes[4]), nodes[0]);
        for node in &nodes {
            assert_eq!(set.parents[node.0], nodes[0]);
        }
    }
}
