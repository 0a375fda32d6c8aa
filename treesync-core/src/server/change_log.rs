//! Server change log.
//!
//! Records the mutations of one flush cycle in the order they happened.
//! Writes to the same map key within a cycle coalesce: the record keeps the
//! position of the first write and the content of the last one. List
//! operations are kept verbatim, since their indices depend on every
//! earlier operation.

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::protocol::{NodeChange, NodeFeature, NodeId};

type MapKey = (NodeId, NodeFeature, String);

#[derive(Debug, Default)]
pub struct ChangeLog {
    changes: Vec<NodeChange>,
    map_slots: HashMap<MapKey, usize>,
    /// Nodes whose parent changed during the cycle.
    touched: IndexSet<NodeId>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a map `put` or `remove`.
    pub fn record_map(&mut self, change: NodeChange) {
        let key = match &change {
            NodeChange::Put { node, feat, key, .. } | NodeChange::Remove { node, feat, key } => {
                (*node, *feat, key.clone())
            }
            _ => {
                self.changes.push(change);
                return;
            }
        };
        match self.map_slots.get(&key) {
            Some(&slot) => self.changes[slot] = change,
            None => {
                self.map_slots.insert(key, self.changes.len());
                self.changes.push(change);
            }
        }
    }

    /// Record a list operation.
    pub fn record_list(&mut self, change: NodeChange) {
        self.changes.push(change);
    }

    pub(crate) fn touch(&mut self, node: NodeId) {
        self.touched.insert(node);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.touched.is_empty()
    }

    /// Take the recorded changes and the set of touched nodes, leaving the
    /// log empty.
    pub(crate) fn take(&mut self) -> (Vec<NodeChange>, IndexSet<NodeId>) {
        self.map_slots.clear();
        (
            std::mem::take(&mut self.changes),
            std::mem::take(&mut self.touched),
        )
    }
}
