//! Copy-on-write transactions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::util::bytes::longest_common_prefix;

use super::node::{Edge, Leaf, Node};
use super::RadixTree;

/// A transaction over one tree version.
///
/// The transaction captures the root it started from; `commit` publishes a
/// new tree sharing every node the transaction didn't touch. Nodes the
/// transaction created itself (tagged with its id) are mutated in place on
/// later operations instead of being cloned again; all other nodes are
/// cloned before mutation, so no published version ever changes.
pub struct Txn<T> {
    id: u64,
    root: Arc<Node<T>>,
    size: usize,
    counter: Arc<AtomicU64>,
}

impl<T: Clone> Txn<T> {
    pub(super) fn new(tree: &RadixTree<T>) -> Self {
        let (root, size, counter) = tree.parts();
        Self {
            id: counter.fetch_add(1, Ordering::Relaxed),
            root: Arc::clone(root),
            size,
            counter: Arc::clone(counter),
        }
    }

    /// Look up a key, observing this transaction's uncommitted changes.
    pub fn get(&self, key: &[u8]) -> Option<T> {
        self.root.get(key).cloned()
    }

    /// Number of keys, counting uncommitted changes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Check if the tree would be empty after this transaction.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Insert a key. Returns the previous value when the key was already
    /// present.
    pub fn insert(&mut self, key: &[u8], value: T) -> Option<T> {
        // Detach the root so in-place mutation sees a unique handle.
        let mut root = std::mem::replace(&mut self.root, Arc::new(Node::empty()));
        let old = self.insert_at(&mut root, key, 0, value);
        self.root = root;
        if old.is_none() {
            self.size += 1;
        }
        old
    }

    /// Delete a key. Returns the removed value, if any.
    pub fn delete(&mut self, key: &[u8]) -> Option<T> {
        let mut root = std::mem::replace(&mut self.root, Arc::new(Node::empty()));
        let removed = self.delete_at(&mut root, key, true);
        self.root = root;
        if removed.is_some() {
            self.size -= 1;
        }
        removed
    }

    /// Publish the transaction's result as a new tree.
    pub fn commit(self) -> RadixTree<T> {
        RadixTree::from_parts(self.root, self.size, self.counter)
    }

    /// Make the node in `slot` safe to mutate: nodes from older versions
    /// are cloned and tagged with this transaction's id, nodes this
    /// transaction already owns are handed back as-is.
    fn writable<'a>(&self, slot: &'a mut Arc<Node<T>>) -> &'a mut Node<T> {
        if slot.txn != self.id {
            let cloned = Node {
                txn: self.id,
                leaf: slot.leaf.clone(),
                prefix: slot.prefix.clone(),
                edges: slot.edges.clone(),
            };
            *slot = Arc::new(cloned);
        }
        Arc::make_mut(slot)
    }

    fn insert_at(
        &self,
        slot: &mut Arc<Node<T>>,
        key: &[u8],
        depth: usize,
        value: T,
    ) -> Option<T> {
        let search = &key[depth..];

        // Search exhausted: the key lives on this node.
        if search.is_empty() {
            let node = self.writable(slot);
            return node
                .leaf
                .replace(Leaf {
                    key: Bytes::copy_from_slice(key),
                    value,
                })
                .map(|l| l.value);
        }

        let label = search[0];
        let idx = match slot.edge_index(label) {
            Ok(idx) => idx,
            Err(_) => {
                // No edge for this byte: attach a fresh leaf node.
                let node = self.writable(slot);
                node.add_edge(Edge {
                    label,
                    node: Arc::new(Node {
                        txn: self.id,
                        leaf: Some(Leaf {
                            key: Bytes::copy_from_slice(key),
                            value,
                        }),
                        prefix: Bytes::copy_from_slice(search),
                        edges: Vec::new(),
                    }),
                });
                return None;
            }
        };

        let child_prefix = slot.edges[idx].node.prefix.clone();
        let common = longest_common_prefix(search, &child_prefix);

        // The child's prefix matches in full: descend.
        if common == child_prefix.len() {
            let node = self.writable(slot);
            return self.insert_at(&mut node.edges[idx].node, key, depth + common, value);
        }

        // Partial match: split the edge at the common prefix.
        let node = self.writable(slot);
        let child = Arc::clone(&node.edges[idx].node);

        let mut split = Node {
            txn: self.id,
            leaf: None,
            prefix: Bytes::copy_from_slice(&search[..common]),
            edges: Vec::new(),
        };

        // The old child keeps everything past the common prefix.
        let mut moved = (*child).clone();
        moved.txn = self.id;
        moved.prefix = child.prefix.slice(common..);
        split.add_edge(Edge {
            label: moved.prefix[0],
            node: Arc::new(moved),
        });

        let leaf = Leaf {
            key: Bytes::copy_from_slice(key),
            value,
        };
        let rest = &search[common..];
        if rest.is_empty() {
            // The new key ends exactly at the split point.
            split.leaf = Some(leaf);
        } else {
            split.add_edge(Edge {
                label: rest[0],
                node: Arc::new(Node {
                    txn: self.id,
                    leaf: Some(leaf),
                    prefix: Bytes::copy_from_slice(rest),
                    edges: Vec::new(),
                }),
            });
        }

        node.edges[idx].node = Arc::new(split);
        None
    }

    fn delete_at(&self, slot: &mut Arc<Node<T>>, search: &[u8], is_root: bool) -> Option<T> {
        if search.is_empty() {
            if !slot.is_leaf() {
                return None;
            }
            let node = self.writable(slot);
            let old = node.leaf.take();
            if !is_root && node.edges.len() == 1 {
                node.merge_child();
            }
            return old.map(|l| l.value);
        }

        let label = search[0];
        let idx = slot.edge_index(label).ok()?;
        let child_prefix_len = {
            let child = &slot.edges[idx].node;
            if !search.starts_with(&child.prefix) {
                return None;
            }
            child.prefix.len()
        };

        // Recurse on a detached handle so a miss leaves this node's path
        // completely untouched.
        let mut child = Arc::clone(&slot.edges[idx].node);
        let removed = self.delete_at(&mut child, &search[child_prefix_len..], false)?;

        let node = self.writable(slot);
        if !child.is_leaf() && child.edges.is_empty() {
            // The subtree emptied out: drop the edge entirely.
            node.del_edge(label);
            if !is_root && node.edges.len() == 1 && !node.is_leaf() {
                node.merge_child();
            }
        } else {
            node.edges[idx].node = child;
        }
        Some(removed)
    }
}
