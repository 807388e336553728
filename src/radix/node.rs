//! Tree nodes and edges.

use std::sync::Arc;

use bytes::Bytes;

use crate::util::bytes::concat;

/// Stored key-value pair at a node.
#[derive(Debug, Clone)]
pub(crate) struct Leaf<T> {
    pub key: Bytes,
    pub value: T,
}

/// Link from a node to a child, keyed by the child prefix's first byte.
#[derive(Debug, Clone)]
pub(crate) struct Edge<T> {
    pub label: u8,
    pub node: Arc<Node<T>>,
}

/// One tree node: an optional leaf, a shared prefix, and edges sorted by
/// label. `txn` records which transaction created the node; a running
/// transaction may mutate its own nodes in place, every other node is
/// frozen.
#[derive(Debug, Clone)]
pub(crate) struct Node<T> {
    pub txn: u64,
    pub leaf: Option<Leaf<T>>,
    pub prefix: Bytes,
    pub edges: Vec<Edge<T>>,
}

impl<T: Clone> Node<T> {
    /// The empty root node of a fresh tree.
    pub fn empty() -> Self {
        Self {
            txn: 0,
            leaf: None,
            prefix: Bytes::new(),
            edges: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }

    /// Binary search for the edge with the given label.
    pub fn edge_index(&self, label: u8) -> Result<usize, usize> {
        self.edges.binary_search_by_key(&label, |e| e.label)
    }

    pub fn get_edge(&self, label: u8) -> Option<&Arc<Node<T>>> {
        self.edge_index(label).ok().map(|idx| &self.edges[idx].node)
    }

    /// Insert an edge, keeping the list sorted by label.
    pub fn add_edge(&mut self, edge: Edge<T>) {
        match self.edge_index(edge.label) {
            Ok(idx) => self.edges[idx] = edge,
            Err(idx) => self.edges.insert(idx, edge),
        }
    }

    /// Remove the edge with the given label, if present.
    pub fn del_edge(&mut self, label: u8) {
        if let Ok(idx) = self.edge_index(label) {
            self.edges.remove(idx);
        }
    }

    /// Fold this node's single child into it: concatenate prefixes and
    /// inherit the child's leaf and edges. Caller guarantees exactly one
    /// outgoing edge.
    pub fn merge_child(&mut self) {
        let edge = self.edges.remove(0);
        let child = edge.node;
        self.prefix = concat(&self.prefix, &child.prefix);
        self.leaf = child.leaf.clone();
        self.edges = child.edges.clone();
    }

    /// Walk the subtree rooted here looking for `key`.
    pub fn get(&self, key: &[u8]) -> Option<&T> {
        let mut node = self;
        let mut search = key;
        loop {
            if search.is_empty() {
                return node.leaf.as_ref().map(|l| &l.value);
            }
            match node.get_edge(search[0]) {
                Some(child) if search.starts_with(&child.prefix) => {
                    search = &search[child.prefix.len()..];
                    node = child;
                }
                _ => return None,
            }
        }
    }
}
