//! Nodes of the implication graph and the insertion-ordered sets the
//! propagator saturates.
//!
//! Each chaining task owns one [`ChainGraph`] arena; nodes refer to their
//! premises through `NodeId` back-references only, so the graph stays a DAG
//! and hints can replay a proof by walking `parents`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::grid::{cell_name, RegionKind};

use super::hints::ChainingHint;

/// Why an implication edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cause {
    None,
    /// The cell can contain only one value.
    NakedSingle,
    /// The value has only one position left in a block.
    HiddenBlock,
    /// The value has only one position left in a row.
    HiddenRow,
    /// The value has only one position left in a column.
    HiddenColumn,
    /// Derived through an auxiliary pattern rule or nested chain.
    Advanced,
}

impl Cause {
    pub fn for_region(kind: RegionKind) -> Cause {
        match kind {
            RegionKind::Block => Cause::HiddenBlock,
            RegionKind::Row => Cause::HiddenRow,
            RegionKind::Column => Cause::HiddenColumn,
        }
    }
}

/// Identity of a potential: (cell, value, polarity).
pub type PotentialKey = (u8, u8, bool);

/// Index of a node within its task's [`ChainGraph`].
pub type NodeId = u32;

/// A node in the implication graph.
///
/// Identity is `(cell, value, is_on)`; the proof metadata (`cause`,
/// `explanation`, `nested`, `parents`) is not part of identity.
#[derive(Debug, Clone)]
pub struct Potential {
    pub cell: u8,
    pub value: u8,
    pub is_on: bool,
    pub cause: Cause,
    pub explanation: String,
    /// Sub-hint whose reasoning produced this node (Advanced edges only).
    pub nested: Option<Arc<ChainingHint>>,
    pub parents: Vec<NodeId>,
}

impl Potential {
    pub fn new(cell: usize, value: u8, is_on: bool) -> Potential {
        Potential {
            cell: cell as u8,
            value,
            is_on,
            cause: Cause::None,
            explanation: String::new(),
            nested: None,
            parents: Vec::new(),
        }
    }

    pub fn with_parent(
        cell: usize,
        value: u8,
        is_on: bool,
        parent: NodeId,
        cause: Cause,
        explanation: impl Into<String>,
    ) -> Potential {
        Potential {
            cell: cell as u8,
            value,
            is_on,
            cause,
            explanation: explanation.into(),
            nested: None,
            parents: vec![parent],
        }
    }

    #[inline]
    pub fn key(&self) -> PotentialKey {
        (self.cell, self.value, self.is_on)
    }

    /// Identity of the opposite-polarity twin.
    #[inline]
    pub fn conjugate_key(&self) -> PotentialKey {
        (self.cell, self.value, !self.is_on)
    }
}

impl std::fmt::Display for Potential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            cell_name(self.cell as usize),
            if self.is_on { "=" } else { "<>" },
            self.value
        )
    }
}

/// Arena holding every potential created by one chaining task.
#[derive(Debug, Default)]
pub struct ChainGraph {
    nodes: Vec<Potential>,
}

impl ChainGraph {
    pub fn new() -> ChainGraph {
        ChainGraph { nodes: Vec::new() }
    }

    pub fn add(&mut self, potential: Potential) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(potential);
        id
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Potential {
        &self.nodes[id as usize]
    }

    #[inline]
    pub fn key(&self, id: NodeId) -> PotentialKey {
        self.node(id).key()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of distinct transitive parents, plus one for the node itself.
    ///
    /// Used to prefer the shortest of several simultaneous contradictions.
    pub fn ancestor_count(&self, id: NodeId) -> usize {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        seen.insert(id);
        queue.push_back(id);
        while let Some(current) = queue.pop_front() {
            for &parent in &self.node(current).parents {
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        seen.len()
    }

    /// Whether `ancestor`'s identity occurs on the first-parent chain above
    /// `child`.
    pub fn is_parent(&self, child: NodeId, ancestor: PotentialKey) -> bool {
        let mut current = child;
        while let Some(&parent) = self.node(current).parents.first() {
            if self.key(parent) == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }
}

/// Insertion-ordered set of potentials keyed on `(cell, value, polarity)`.
///
/// `get` returns the stored node id so callers can recover the
/// parent-annotated instance after an identity-only membership check.
#[derive(Debug, Clone, Default)]
pub struct PotentialSet {
    entries: Vec<(PotentialKey, NodeId)>,
    index: HashMap<PotentialKey, NodeId>,
}

impl PotentialSet {
    pub fn new() -> PotentialSet {
        PotentialSet::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: PotentialKey) -> bool {
        self.index.contains_key(&key)
    }

    /// The stored node with this identity, parents intact.
    pub fn get(&self, key: PotentialKey) -> Option<NodeId> {
        self.index.get(&key).copied()
    }

    /// Append `id` unless a node with the same identity is already present.
    /// Returns whether the set changed.
    pub fn insert(&mut self, graph: &ChainGraph, id: NodeId) -> bool {
        let key = graph.key(id);
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, id);
        self.entries.push((key, id));
        true
    }

    pub fn remove(&mut self, key: PotentialKey) -> Option<NodeId> {
        let id = self.index.remove(&key)?;
        self.entries.retain(|&(k, _)| k != key);
        Some(id)
    }

    /// Node ids in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|&(_, id)| id)
    }

    /// Keep only the entries whose identity also occurs in `other`,
    /// preserving this set's order.
    pub fn retain_intersection(&mut self, other: &PotentialSet) {
        self.entries.retain(|&(key, _)| other.contains(key));
        self.index.retain(|key, _| other.contains(*key));
    }

    /// Append all of `other`'s entries not already present, in `other`'s
    /// order.
    pub fn add_all(&mut self, other: &PotentialSet) {
        for &(key, id) in &other.entries {
            if !self.index.contains_key(&key) {
                self.index.insert(key, id);
                self.entries.push((key, id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_chain() -> (ChainGraph, NodeId, NodeId, NodeId) {
        let mut graph = ChainGraph::new();
        let root = graph.add(Potential::new(0, 4, true));
        let mid = graph.add(Potential::with_parent(1, 4, false, root, Cause::HiddenRow, ""));
        let leaf = graph.add(Potential::with_parent(1, 7, true, mid, Cause::NakedSingle, ""));
        (graph, root, mid, leaf)
    }

    #[test]
    fn ancestor_count_is_distinct_parents_plus_one() {
        let (mut graph, root, mid, leaf) = graph_with_chain();
        assert_eq!(graph.ancestor_count(root), 1);
        assert_eq!(graph.ancestor_count(mid), 2);
        assert_eq!(graph.ancestor_count(leaf), 3);

        // A diamond counts shared ancestors once.
        let other = graph.add(Potential::with_parent(2, 4, false, root, Cause::HiddenRow, ""));
        let join = graph.add(Potential {
            cell: 3,
            value: 4,
            is_on: true,
            cause: Cause::None,
            explanation: String::new(),
            nested: None,
            parents: vec![mid, other],
        });
        assert_eq!(graph.ancestor_count(join), 4);
    }

    #[test]
    fn is_parent_walks_first_parent_chain() {
        let (graph, root, _mid, leaf) = graph_with_chain();
        assert!(graph.is_parent(leaf, graph.key(root)));
        assert!(graph.is_parent(leaf, (1, 4, false)));
        assert!(!graph.is_parent(root, graph.key(leaf)));
    }

    #[test]
    fn set_preserves_insertion_order_and_stored_instance() {
        let (graph, root, mid, leaf) = graph_with_chain();
        let mut set = PotentialSet::new();
        assert!(set.insert(&graph, leaf));
        assert!(set.insert(&graph, root));
        assert!(!set.insert(&graph, leaf));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![leaf, root]);
        // get() hands back the stored, parent-annotated node.
        let stored = set.get((1, 7, true)).unwrap();
        assert_eq!(stored, leaf);
        assert!(!graph.node(stored).parents.is_empty());
        assert!(set.get(graph.key(mid)).is_none());
    }

    #[test]
    fn retain_intersection_preserves_order() {
        let (graph, root, mid, leaf) = graph_with_chain();
        let mut a = PotentialSet::new();
        a.insert(&graph, leaf);
        a.insert(&graph, mid);
        a.insert(&graph, root);
        let mut b = PotentialSet::new();
        b.insert(&graph, root);
        b.insert(&graph, leaf);
        a.retain_intersection(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![leaf, root]);
    }

    #[test]
    fn remove_then_insert_moves_to_end() {
        let (graph, root, mid, leaf) = graph_with_chain();
        let mut set = PotentialSet::new();
        set.insert(&graph, root);
        set.insert(&graph, mid);
        set.remove(graph.key(root));
        set.insert(&graph, root);
        set.insert(&graph, leaf);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![mid, root, leaf]);
    }
}
