//! The root's view of the overlay: a tree of admitted peers with branching
//! factor 2, built by BFS parent selection and pruned by liveness expiry.
//!
//! Ownership flows root -> children; parent links are relational only and
//! are represented as arena indices rather than real back-references, since
//! nothing here needs to keep a removed subtree alive.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Instant;

use codec::Address;

const MAX_CHILDREN: usize = 2;

type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    UnknownParent,
    ParentFull,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownParent => write!(f, "parent address is not present in the graph"),
            Self::ParentFull => write!(f, "parent already has {MAX_CHILDREN} children"),
        }
    }
}

impl std::error::Error for GraphError {}

struct Node {
    address: Address,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    last_seen: Instant,
}

/// The tree of admitted peers, rooted at the peer that owns this graph.
pub struct NetworkGraph {
    nodes: Vec<Node>,
    index: HashMap<Address, NodeId>,
    root: NodeId,
}

impl NetworkGraph {
    pub fn new(root_address: Address) -> Self {
        let mut index = HashMap::new();
        index.insert(root_address, 0);

        Self {
            nodes: vec![Node {
                address: root_address,
                parent: None,
                children: Vec::new(),
                last_seen: Instant::now(),
            }],
            index,
            root: 0,
        }
    }

    pub fn root_address(&self) -> Address {
        self.nodes[self.root].address
    }

    pub fn is_root(&self, address: &Address) -> bool {
        *address == self.root_address()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn parent_of(&self, address: &Address) -> Option<Address> {
        let id = *self.index.get(address)?;
        self.nodes[id].parent.map(|parent_id| self.nodes[parent_id].address)
    }

    pub fn children_of(&self, address: &Address) -> Vec<Address> {
        match self.index.get(address) {
            Some(&id) => self.nodes[id]
                .children
                .iter()
                .map(|&child| self.nodes[child].address)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn is_child(&self, parent: &Address, child: &Address) -> bool {
        self.parent_of(child).is_some_and(|p| p == *parent)
    }

    fn subtree_ids(&self, start: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }

            queue.extend(self.nodes[id].children.iter().copied());
        }

        seen
    }

    /// BFS from root for the shallowest node with fewer than
    /// [`MAX_CHILDREN`] children, skipping `sender`'s own subtree (if it is
    /// already present) so it can never become its own ancestor.
    pub fn find_parent_for_new_node(&self, sender: &Address) -> Address {
        let excluded = match self.index.get(sender) {
            Some(&id) => self.subtree_ids(id),
            None => HashSet::new(),
        };

        let mut queue = VecDeque::from([self.root]);

        while let Some(id) = queue.pop_front() {
            if excluded.contains(&id) {
                continue;
            }

            let node = &self.nodes[id];
            if node.children.len() < MAX_CHILDREN {
                return node.address;
            }

            queue.extend(node.children.iter().copied());
        }

        // With branching factor 2 this is only reachable once every level
        // down to depth 8 (511 nodes) is full; fall back to root rather
        // than panic on an over-full tree.
        self.root_address()
    }

    /// Insert `address` under `parent_address`. If `address` is already
    /// present it is detached from its current parent and reparented:
    /// a repeat Advertise Request reassigns rather than being ignored
    /// (see DESIGN.md, Open Question b). Refuses with [`GraphError::ParentFull`]
    /// if `parent_address` already has [`MAX_CHILDREN`] children that are not
    /// `address` itself, preserving the branching-factor-2 invariant even
    /// when a caller passes a stale or over-eager parent choice.
    pub fn insert(&mut self, address: Address, parent_address: &Address) -> Result<(), GraphError> {
        let parent_id = *self
            .index
            .get(parent_address)
            .ok_or(GraphError::UnknownParent)?;

        if let Some(&existing) = self.index.get(&address) {
            let already_child_here = self.nodes[existing].parent == Some(parent_id);
            if !already_child_here && self.nodes[parent_id].children.len() >= MAX_CHILDREN {
                return Err(GraphError::ParentFull);
            }

            self.detach(existing);
            self.nodes[existing].parent = Some(parent_id);
            self.nodes[parent_id].children.push(existing);
            return Ok(());
        }

        if self.nodes[parent_id].children.len() >= MAX_CHILDREN {
            return Err(GraphError::ParentFull);
        }

        let id = self.nodes.len();
        self.nodes.push(Node {
            address,
            parent: Some(parent_id),
            children: Vec::new(),
            last_seen: Instant::now(),
        });
        self.nodes[parent_id].children.push(id);
        self.index.insert(address, id);

        Ok(())
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent_id) = self.nodes[id].parent.take() {
            self.nodes[parent_id].children.retain(|&child| child != id);
        }
    }

    /// Remove `address` together with its entire subtree. Detached nodes
    /// keep their mutual parent/child links (the subtree is still
    /// structurally linked in the arena) but are dropped from the address
    /// index, so none of them can be found, reinserted under, or returned
    /// as a BFS candidate again.
    pub fn remove(&mut self, address: &Address) -> bool {
        let Some(&id) = self.index.get(address) else {
            return false;
        };

        if id == self.root {
            return false;
        }

        let subtree = self.subtree_ids(id);
        self.detach(id);

        for member in subtree {
            let member_address = self.nodes[member].address;
            self.index.remove(&member_address);
        }

        true
    }

    /// Refresh the liveness timestamp of a graph member. Returns `false` if
    /// the address is not (or no longer) present.
    pub fn touch_last_seen(&mut self, address: &Address, now: Instant) -> bool {
        match self.index.get(address) {
            Some(&id) => {
                self.nodes[id].last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Every non-root node reachable from root whose `last_seen` predates
    /// `threshold`.
    pub fn get_inactive_nodes(&self, threshold: Instant) -> Vec<Address> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([self.root]);

        while let Some(id) = queue.pop_front() {
            for &child in &self.nodes[id].children {
                if self.nodes[child].last_seen < threshold {
                    out.push(self.nodes[child].address);
                }

                queue.push_back(child);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr(port: u16) -> Address {
        Address::new([127, 0, 0, 1], port)
    }

    #[test]
    fn bfs_fills_root_before_descending() {
        let root = addr(5356);
        let mut graph = NetworkGraph::new(root);

        let a = addr(1);
        let parent = graph.find_parent_for_new_node(&a);
        assert_eq!(parent, root);
        graph.insert(a, &parent).unwrap();

        let b = addr(2);
        let parent = graph.find_parent_for_new_node(&b);
        assert_eq!(parent, root);
        graph.insert(b, &parent).unwrap();

        // root now has 2 children; a third client descends to a or b.
        let c = addr(3);
        let parent = graph.find_parent_for_new_node(&c);
        assert!(parent == a || parent == b);
        assert_ne!(parent, root);
    }

    #[test]
    fn bfs_skips_senders_existing_subtree() {
        let root = addr(5356);
        let mut graph = NetworkGraph::new(root);

        let a = addr(1);
        graph.insert(a, &root).unwrap();
        let b = addr(2);
        graph.insert(b, &a).unwrap();

        // Fill root's other slot and a's remaining slot so the only
        // available capacity is inside a's own subtree (at b).
        let c = addr(3);
        graph.insert(c, &root).unwrap();

        // a now has 1 child (b) and root is full (a, c); re-advertising `a`
        // itself must not return a or b as its own parent.
        let parent = graph.find_parent_for_new_node(&a);
        assert_ne!(parent, a);
        assert_ne!(parent, b);
    }

    #[test]
    fn remove_drops_entire_subtree_from_index() {
        let root = addr(5356);
        let mut graph = NetworkGraph::new(root);

        let a = addr(1);
        graph.insert(a, &root).unwrap();
        let b = addr(2);
        graph.insert(b, &a).unwrap();

        assert!(graph.remove(&a));

        assert!(!graph.contains(&a));
        assert!(!graph.contains(&b));
        assert!(graph.children_of(&root).is_empty());
    }

    #[test]
    fn removed_address_is_never_offered_as_parent_again() {
        let root = addr(5356);
        let mut graph = NetworkGraph::new(root);

        let a = addr(1);
        graph.insert(a, &root).unwrap();
        graph.remove(&a);

        let b = addr(2);
        let parent = graph.find_parent_for_new_node(&b);
        assert_eq!(parent, root);
    }

    #[test]
    fn get_inactive_nodes_never_returns_root() {
        let root = addr(5356);
        let mut graph = NetworkGraph::new(root);

        let a = addr(1);
        graph.insert(a, &root).unwrap();

        let past = Instant::now() - Duration::from_secs(60);
        graph.touch_last_seen(&a, past);

        let inactive = graph.get_inactive_nodes(Instant::now() - Duration::from_secs(30));
        assert_eq!(inactive, vec![a]);
    }

    #[test]
    fn repeated_advertise_reparents_existing_node() {
        let root = addr(5356);
        let mut graph = NetworkGraph::new(root);

        let a = addr(1);
        let b = addr(2);
        graph.insert(a, &root).unwrap();
        graph.insert(b, &root).unwrap();

        // Re-advertise `a` under `b`.
        graph.insert(a, &b).unwrap();

        assert_eq!(graph.parent_of(&a), Some(b));
        assert!(!graph.children_of(&root).contains(&a));
        assert!(graph.children_of(&b).contains(&a));
    }

    #[test]
    fn insert_refuses_a_parent_that_already_has_two_children() {
        let root = addr(5356);
        let mut graph = NetworkGraph::new(root);

        graph.insert(addr(1), &root).unwrap();
        graph.insert(addr(2), &root).unwrap();

        let err = graph.insert(addr(3), &root).unwrap_err();
        assert_eq!(err, GraphError::ParentFull);
        assert_eq!(graph.children_of(&root).len(), 2);
    }
}
