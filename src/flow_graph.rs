//! Arena control-flow graph over instructions keyed by code pointer.
//!
//! Nodes are appended in line order; a branch to a key that has no node yet
//! stays pending until the first node with that key is added. Removing a node
//! empties it but keeps its edges, so it behaves as a no-op.

use std::collections::{BTreeSet, HashMap};

pub type NodeId = usize;

#[derive(Debug, Clone)]
struct Node<T> {
    key: usize,
    value: Option<T>,
    succ: Vec<NodeId>,
    pred: Vec<NodeId>,
    out: bool,
    /// The next node in line order is not a successor.
    ends_line: bool,
}

#[derive(Debug, Clone)]
pub struct FlowGraph<T> {
    nodes: Vec<Node<T>>,
    first_of_key: HashMap<usize, NodeId>,
    pending: HashMap<usize, Vec<NodeId>>,
    roots: BTreeSet<NodeId>,
}

impl<T> FlowGraph<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            first_of_key: HashMap::new(),
            pending: HashMap::new(),
            roots: BTreeSet::new(),
        }
    }

    /// Append a node with a fallthrough edge from the previous one, unless
    /// that one ends the line.
    pub fn add_node(&mut self, key: usize, value: T) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            key,
            value: Some(value),
            succ: Vec::new(),
            pred: Vec::new(),
            out: false,
            ends_line: false,
        });
        if id > 0 && !self.nodes[id - 1].ends_line {
            self.add_edge(id - 1, id);
        }
        if !self.first_of_key.contains_key(&key) {
            self.first_of_key.insert(key, id);
            for from in self.pending.remove(&key).unwrap_or_default() {
                self.add_edge(from, id);
            }
        }
        id
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if !self.nodes[from].succ.contains(&to) {
            self.nodes[from].succ.push(to);
            self.nodes[to].pred.push(from);
        }
    }

    /// Edge to the first node of `key`, now or once it is added.
    pub fn add_edge_to_key(&mut self, from: NodeId, key: usize) {
        match self.first_of_key.get(&key) {
            Some(&to) => self.add_edge(from, to),
            None => self.pending.entry(key).or_default().push(from),
        }
    }

    /// Control never falls through from `id` to the node added after it.
    pub fn end_line(&mut self, id: NodeId) {
        self.nodes[id].ends_line = true;
    }

    /// Control may leave the graph after `id`.
    pub fn mark_out_edge(&mut self, id: NodeId) {
        self.nodes[id].out = true;
    }

    /// Roots are the first nodes of `keys` plus every node without predecessors.
    pub fn set_roots(&mut self, keys: &[usize]) {
        self.roots = keys
            .iter()
            .filter_map(|key| self.first_of_key.get(key).copied())
            .chain((0..self.nodes.len()).filter(|&id| self.nodes[id].pred.is_empty()))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> std::ops::Range<NodeId> {
        0..self.nodes.len()
    }

    pub fn key(&self, id: NodeId) -> usize {
        self.nodes[id].key
    }

    pub fn first_of(&self, key: usize) -> Option<NodeId> {
        self.first_of_key.get(&key).copied()
    }

    pub fn value(&self, id: NodeId) -> Option<&T> {
        self.nodes[id].value.as_ref()
    }

    pub fn value_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes[id].value.as_mut()
    }

    pub fn replace(&mut self, id: NodeId, value: T) {
        self.nodes[id].value = Some(value);
    }

    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        self.nodes[id].value.take()
    }

    pub fn succ(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].succ
    }

    pub fn pred(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].pred
    }

    pub fn has_out_edge(&self, id: NodeId) -> bool {
        self.nodes[id].out
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        self.roots.contains(&id)
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots.iter().copied()
    }

    /// Several paths meet here, or it is entered from outside.
    pub fn is_join(&self, id: NodeId) -> bool {
        self.is_root(id) || self.nodes[id].pred.len() > 1
    }

    /// Branch targets that never got a node.
    pub fn unresolved_keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.pending.keys().copied()
    }

    /// Maximal straight-line runs in line order.
    pub fn blocks(&self) -> Vec<Vec<NodeId>> {
        let mut blocks: Vec<Vec<NodeId>> = Vec::new();
        for id in self.ids() {
            let continues = id > 0
                && !self.is_root(id)
                && self.nodes[id].pred == [id - 1]
                && self.nodes[id - 1].succ.len() == 1
                && !self.nodes[id - 1].out;
            match blocks.last_mut() {
                Some(block) if continues => block.push(id),
                _ => blocks.push(vec![id]),
            }
        }
        blocks
    }

    /// Surviving values in line order.
    pub fn into_values(self) -> impl Iterator<Item = T> {
        self.nodes.into_iter().filter_map(|node| node.value)
    }
}

impl<T> Default for FlowGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}
