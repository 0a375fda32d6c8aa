//! The client mirror of the state tree.
//!
//! # Batches
//!
//! Incoming changes are applied between `set_update_in_progress(true)` and
//! `set_update_in_progress(false)`. Structural bookkeeping is deferred to
//! the end of the batch: a node that lost its parent (or was explicitly
//! detached) is only unregistered if it still has no parent when the batch
//! ends. Removing a node from one list and inserting it into another within
//! the same batch is therefore a move, not a delete.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use serde_json::Value as Json;

use super::node::StateNode;
use crate::error::{CodecError, ProtocolError};
use crate::protocol::{codec, ClientRpc, NodeFeature, NodeId, Value};
use crate::registry::{ConstantPool, TemplateRegistry};
use crate::template::TemplateNode;

pub(crate) struct TreeInner {
    nodes: RefCell<HashMap<NodeId, StateNode>>,
    root: RefCell<Option<StateNode>>,
    update_in_progress: Cell<bool>,
    detach_candidates: RefCell<IndexSet<NodeId>>,
    constants: RefCell<ConstantPool>,
    templates: RefCell<TemplateRegistry>,
    outbox: RefCell<Vec<ClientRpc>>,
    resync_requested: Cell<bool>,
}

/// Handle to a client state tree. Clones share the tree.
#[derive(Clone)]
pub struct StateTree {
    inner: Rc<TreeInner>,
}

impl StateTree {
    /// Create a tree holding only the root node.
    pub fn new() -> Self {
        let tree = Self {
            inner: Rc::new(TreeInner {
                nodes: RefCell::new(HashMap::new()),
                root: RefCell::new(None),
                update_in_progress: Cell::new(false),
                detach_candidates: RefCell::new(IndexSet::new()),
                constants: RefCell::new(ConstantPool::default()),
                templates: RefCell::new(TemplateRegistry::default()),
                outbox: RefCell::new(Vec::new()),
                resync_requested: Cell::new(false),
            }),
        };
        let root = StateNode::new(NodeId::ROOT, &tree);
        tree.inner.nodes.borrow_mut().insert(NodeId::ROOT, root.clone());
        *tree.inner.root.borrow_mut() = Some(root);
        tree
    }

    pub(crate) fn upgrade(weak: &Weak<TreeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<TreeInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn root(&self) -> StateNode {
        match self.inner.root.borrow().as_ref() {
            Some(root) => root.clone(),
            None => StateNode::new(NodeId::ROOT, self),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<StateNode> {
        self.inner.nodes.borrow().get(&id).cloned()
    }

    /// Like [`node`](Self::node), but a missing node is a protocol error.
    pub fn require_node(&self, id: NodeId) -> Result<StateNode, ProtocolError> {
        self.node(id).ok_or(ProtocolError::UnknownNode { id })
    }

    /// The node with `id`, created and registered if it has not been seen.
    pub fn ensure_node(&self, id: NodeId) -> StateNode {
        if let Some(node) = self.node(id) {
            return node;
        }
        let node = StateNode::new(id, self);
        self.inner.nodes.borrow_mut().insert(id, node.clone());
        tracing::trace!(node = %id, "created node on first reference");
        node
    }

    /// Register `node` under its id.
    ///
    /// Registering the same instance twice is allowed; a different instance
    /// with an already registered id is a protocol violation.
    pub fn register_node(&self, node: StateNode) -> Result<(), ProtocolError> {
        let mut nodes = self.inner.nodes.borrow_mut();
        if let Some(existing) = nodes.get(&node.id()) {
            if *existing != node {
                return Err(ProtocolError::DuplicateNode { id: node.id() });
            }
            return Ok(());
        }
        nodes.insert(node.id(), node);
        Ok(())
    }

    /// Unregister `node` and every node it owns.
    pub fn unregister_node(&self, node: &StateNode) {
        if node.id() == NodeId::ROOT {
            tracing::warn!("refusing to unregister the root node");
            return;
        }

        let mut pending = vec![node.clone()];
        while let Some(current) = pending.pop() {
            let removed = {
                let mut nodes = self.inner.nodes.borrow_mut();
                match nodes.get(&current.id()) {
                    Some(registered) if *registered == current => nodes.remove(&current.id()),
                    _ => None,
                }
            };
            if removed.is_none() {
                continue;
            }
            for child in current.owned_children() {
                if let Some(child) = self.node(child) {
                    if child.parent_id() == Some(current.id()) {
                        pending.push(child);
                    }
                }
            }
            current.mark_unregistered();
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.nodes.borrow().contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.inner.update_in_progress.get()
    }

    /// Open or close a batch of changes.
    ///
    /// Closing a batch unregisters every node that lost its parent during
    /// the batch and did not get a new one.
    pub fn set_update_in_progress(&self, in_progress: bool) {
        let was = self.inner.update_in_progress.replace(in_progress);
        if was && !in_progress {
            self.collect_detached();
        }
    }

    fn collect_detached(&self) {
        let candidates = std::mem::take(&mut *self.inner.detach_candidates.borrow_mut());
        for id in candidates {
            let Some(node) = self.node(id) else {
                continue;
            };
            if id != NodeId::ROOT && node.parent_id().is_none() {
                tracing::debug!(node = %id, "unregistering detached node");
                self.unregister_node(&node);
            }
        }
    }

    /// Note that `id` was explicitly detached by the server.
    pub(crate) fn mark_detached(&self, id: NodeId) {
        self.inner.detach_candidates.borrow_mut().insert(id);
    }

    pub(crate) fn adopt_child(&self, parent: NodeId, child: NodeId) {
        self.ensure_node(child).set_parent(Some(parent));
    }

    pub(crate) fn release_child(&self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.node(child) {
            if node.parent_id() == Some(parent) {
                node.set_parent(None);
                self.inner.detach_candidates.borrow_mut().insert(child);
            }
        }
    }

    /// Drop every node except the root, clear the root and forget the
    /// registries. Used before applying a resynchronization snapshot.
    pub fn reset(&self) {
        let root = self.root();
        let others: Vec<StateNode> = self
            .inner
            .nodes
            .borrow()
            .values()
            .filter(|node| node.id() != NodeId::ROOT)
            .cloned()
            .collect();

        root.clear_features();
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            nodes.clear();
            nodes.insert(NodeId::ROOT, root);
        }
        for node in others {
            node.mark_unregistered();
        }
        self.inner.detach_candidates.borrow_mut().clear();
        self.inner.constants.borrow_mut().clear();
        self.inner.templates.borrow_mut().clear();
        tracing::debug!("state tree reset");
    }

    pub fn register_constant(&self, id: u32, value: Json) -> Result<(), ProtocolError> {
        self.inner.constants.borrow_mut().register(id, value)
    }

    pub fn constant(&self, id: u32) -> Result<Json, ProtocolError> {
        self.inner.constants.borrow().get(id).cloned()
    }

    pub fn register_template(&self, id: u32, node: TemplateNode) -> Result<(), ProtocolError> {
        self.inner.templates.borrow_mut().register(id, node)
    }

    pub fn template(&self, id: u32) -> Result<TemplateNode, ProtocolError> {
        self.inner.templates.borrow().get(id).cloned()
    }

    /// Queue an event for the server.
    pub fn send_event(
        &self,
        node: &StateNode,
        event_type: &str,
        event_data: Option<IndexMap<String, Json>>,
    ) {
        if node.is_unregistered() {
            tracing::warn!(node = %node.id(), event_type, "dropping event for unregistered node");
            return;
        }
        self.inner.outbox.borrow_mut().push(ClientRpc::Event {
            node: node.id(),
            event_type: event_type.to_string(),
            event_data,
        });
    }

    /// Store a property value changed on the client and queue it for the
    /// server.
    pub fn send_property_sync(
        &self,
        node: &StateNode,
        property: &str,
        value: Value,
    ) -> Result<(), CodecError> {
        let encoded = codec::encode_without_type_info(&value)?;
        node.map(NodeFeature::ElementProperties)
            .property(property)
            .set_value(value);
        self.inner.outbox.borrow_mut().push(ClientRpc::PropertySync {
            node: node.id(),
            property: property.to_string(),
            value: encoded,
        });
        Ok(())
    }

    /// Queue a notice that an embedded component is gone for good.
    pub fn send_disconnected(&self, node: NodeId) {
        self.inner
            .outbox
            .borrow_mut()
            .push(ClientRpc::Disconnected { node });
    }

    /// Ask the server for a full snapshot with the next outgoing message.
    pub fn request_resync(&self) {
        self.inner.resync_requested.set(true);
    }

    pub(crate) fn take_resync_request(&self) -> bool {
        self.inner.resync_requested.replace(false)
    }

    pub fn has_outgoing(&self) -> bool {
        self.inner.resync_requested.get() || !self.inner.outbox.borrow().is_empty()
    }

    /// Drain queued invocations.
    pub fn take_outbox(&self) -> Vec<ClientRpc> {
        std::mem::take(&mut *self.inner.outbox.borrow_mut())
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTree")
            .field("nodes", &self.node_count())
            .field("update_in_progress", &self.is_update_in_progress())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn children(node: &StateNode) -> crate::client::NodeList {
        node.list(NodeFeature::ElementChildren)
    }

    #[test]
    fn root_is_registered() {
        let tree = StateTree::new();
        assert_eq!(tree.root().id(), NodeId::ROOT);
        assert_eq!(tree.node(NodeId::ROOT), Some(tree.root()));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let tree = StateTree::new();
        let node = StateNode::new(NodeId::new(4), &tree);
        tree.register_node(node.clone()).unwrap();
        tree.register_node(node).unwrap();

        let impostor = StateNode::new(NodeId::new(4), &tree);
        assert_eq!(
            tree.register_node(impostor),
            Err(ProtocolError::DuplicateNode { id: NodeId::new(4) })
        );
    }

    #[test]
    fn move_within_batch_keeps_node() {
        let tree = StateTree::new();
        let a = tree.ensure_node(NodeId::new(2));
        let b = tree.ensure_node(NodeId::new(3));
        let child = tree.ensure_node(NodeId::new(4));
        children(&a).push(Value::Node(child.id()));

        tree.set_update_in_progress(true);
        children(&a).remove(0).unwrap();
        children(&b).push(Value::Node(child.id()));
        tree.set_update_in_progress(false);

        assert!(tree.contains(child.id()));
        assert_eq!(child.parent_id(), Some(b.id()));
    }

    #[test]
    fn removal_unregisters_subtree_at_batch_end() {
        let tree = StateTree::new();
        let parent = tree.ensure_node(NodeId::new(2));
        let child = tree.ensure_node(NodeId::new(3));
        let grandchild = tree.ensure_node(NodeId::new(4));
        children(&parent).push(Value::Node(child.id()));
        children(&child).push(Value::Node(grandchild.id()));

        tree.set_update_in_progress(true);
        children(&parent).remove(0).unwrap();
        assert!(tree.contains(child.id()));
        tree.set_update_in_progress(false);

        assert!(!tree.contains(child.id()));
        assert!(!tree.contains(grandchild.id()));
        assert!(grandchild.is_unregistered());
    }

    #[test]
    fn map_references_own_their_nodes() {
        let tree = StateTree::new();
        let host = tree.ensure_node(NodeId::new(2));
        let slot = tree.ensure_node(NodeId::new(3));

        let property = host.map(NodeFeature::Template).property("child");
        property.set_value(Value::Node(slot.id()));
        assert_eq!(slot.parent_id(), Some(host.id()));

        tree.set_update_in_progress(true);
        property.remove_value();
        tree.set_update_in_progress(false);
        assert!(!tree.contains(slot.id()));
    }

    #[test]
    fn reset_keeps_only_root() {
        let tree = StateTree::new();
        let child = tree.ensure_node(NodeId::new(2));
        children(&tree.root()).push(Value::Node(child.id()));
        tree.register_constant(1, serde_json::json!([])).unwrap();

        tree.reset();

        assert_eq!(tree.node_count(), 1);
        assert!(child.is_unregistered());
        assert!(children(&tree.root()).peek_values().is_empty());
        assert!(tree.constant(1).is_err());
    }

    #[test]
    fn property_sync_updates_tree_and_outbox() {
        let tree = StateTree::new();
        let input = tree.ensure_node(NodeId::new(2));

        tree.send_property_sync(&input, "value", Value::from("typed"))
            .unwrap();

        assert_eq!(
            input.peek_property(NodeFeature::ElementProperties, "value"),
            Some(Value::from("typed"))
        );
        assert_eq!(
            tree.take_outbox(),
            vec![ClientRpc::PropertySync {
                node: input.id(),
                property: "value".to_string(),
                value: Json::from("typed"),
            }]
        );
    }
}
