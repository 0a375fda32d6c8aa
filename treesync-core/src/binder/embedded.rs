//! Embedded component lifecycle.
//!
//! An embedded component is a virtual child hosted outside the bound
//! document tree. When its UI node is detached, the component is not
//! dropped at once: it may be moved and reattached by the host page. Each
//! heartbeat while detached counts as a miss; after `disconnect_heartbeats`
//! misses the client tells the server the component is gone, and the server
//! removes it from its parent's virtual children.

use indexmap::IndexMap;

use super::dom::Document;
use crate::client::StateTree;
use crate::protocol::NodeId;

/// Connection state of one embedded component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Connected,
    Disconnected { missed: u32 },
}

#[derive(Debug)]
pub struct EmbeddedComponents {
    tree: StateTree,
    disconnect_heartbeats: u32,
    components: IndexMap<NodeId, ComponentState>,
}

impl EmbeddedComponents {
    pub fn new(tree: StateTree, disconnect_heartbeats: u32) -> Self {
        Self {
            tree,
            disconnect_heartbeats: disconnect_heartbeats.max(1),
            components: IndexMap::new(),
        }
    }

    /// Start tracking `node` as a connected component.
    pub fn connect(&mut self, node: NodeId) {
        self.components.insert(node, ComponentState::Connected);
    }

    /// Note that the component's UI node left the document.
    pub fn disconnected(&mut self, node: NodeId) {
        if let Some(state @ ComponentState::Connected) = self.components.get_mut(&node) {
            tracing::debug!(%node, "embedded component disconnected");
            *state = ComponentState::Disconnected { missed: 0 };
        }
    }

    /// Note that the component's UI node is back. Cancels a pending removal.
    pub fn reconnected(&mut self, node: NodeId) {
        if let Some(state) = self.components.get_mut(&node) {
            if *state != ComponentState::Connected {
                tracing::debug!(%node, "embedded component reconnected");
                *state = ComponentState::Connected;
            }
        }
    }

    /// Derive connection changes from the document.
    pub fn observe(&mut self, document: &Document) {
        let ids: Vec<NodeId> = self.components.keys().copied().collect();
        for id in ids {
            let Some(dom) = self.tree.node(id).and_then(|node| node.dom_node()) else {
                continue;
            };
            if document.is_connected(dom) {
                self.reconnected(id);
            } else {
                self.disconnected(id);
            }
        }
    }

    /// Count a heartbeat. Returns the components given up on, each of which
    /// has been reported to the server.
    pub fn heartbeat(&mut self) -> Vec<NodeId> {
        let limit = self.disconnect_heartbeats;
        let mut expired = Vec::new();
        for (id, state) in self.components.iter_mut() {
            if let ComponentState::Disconnected { missed } = state {
                *missed += 1;
                if *missed >= limit {
                    expired.push(*id);
                }
            }
        }
        for id in &expired {
            self.components.shift_remove(id);
            tracing::debug!(node = %id, "embedded component timed out");
            self.tree.send_disconnected(*id);
        }
        expired
    }

    pub fn state(&self, node: NodeId) -> Option<ComponentState> {
        self.components.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
