//! Authoritative state tree.
//!
//! Nodes live in an arena indexed by id and are never freed; a node that
//! leaves the tree keeps its state and may be attached again later. Every
//! mutation goes through the tree so it can be recorded in the
//! [`ChangeLog`] and parent links stay consistent with the client's rules:
//! a node value in any map, or in a children-holding list, makes the owner
//! the parent of the referenced node.

use std::collections::HashSet;

use indexmap::IndexMap;

use super::change_log::ChangeLog;
use crate::error::{CodecError, ProtocolError, Result};
use crate::protocol::{FeatureKind, NodeChange, NodeFeature, NodeId, Value};

#[derive(Debug, Clone, PartialEq)]
enum Feature {
    Map(IndexMap<String, Value>),
    List(Vec<Value>),
}

#[derive(Debug, Default)]
struct ServerNode {
    features: IndexMap<NodeFeature, Feature>,
    parent: Option<NodeId>,
    /// Attachment as of the last collected cycle.
    attached: bool,
}

impl ServerNode {
    /// Nodes referenced by values this node owns.
    fn referenced_children(&self) -> Vec<NodeId> {
        let mut children = Vec::new();
        for (feature, data) in &self.features {
            match data {
                Feature::Map(map) => children.extend(map.values().filter_map(Value::as_node)),
                Feature::List(list) if feature.holds_children() => {
                    children.extend(list.iter().filter_map(Value::as_node))
                }
                Feature::List(_) => {}
            }
        }
        children
    }
}

/// The server's copy of the state tree.
#[derive(Debug)]
pub struct StateTree {
    nodes: Vec<ServerNode>,
    log: ChangeLog,
}

impl StateTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![ServerNode {
                attached: true,
                ..ServerNode::default()
            }],
            log: ChangeLog::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Allocate a new, detached node.
    pub fn create_node(&mut self) -> NodeId {
        self.nodes.push(ServerNode::default());
        NodeId::new(self.nodes.len() as u32)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index(id).is_some()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn index(&self, id: NodeId) -> Option<usize> {
        let index = (id.raw() as usize).checked_sub(1)?;
        (index < self.nodes.len()).then_some(index)
    }

    fn node(&self, id: NodeId) -> std::result::Result<&ServerNode, ProtocolError> {
        self.index(id)
            .map(|index| &self.nodes[index])
            .ok_or(ProtocolError::UnknownNode { id })
    }

    fn node_mut(&mut self, id: NodeId) -> std::result::Result<&mut ServerNode, ProtocolError> {
        match self.index(id) {
            Some(index) => Ok(&mut self.nodes[index]),
            None => Err(ProtocolError::UnknownNode { id }),
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok().and_then(|node| node.parent)
    }

    /// Whether `id` is currently reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        let mut steps = 0;
        loop {
            if current == NodeId::ROOT {
                return true;
            }
            match self.parent(current) {
                Some(parent) if steps <= self.nodes.len() => {
                    current = parent;
                    steps += 1;
                }
                _ => return false,
            }
        }
    }

    pub fn has_feature(&self, id: NodeId, feature: NodeFeature) -> bool {
        self.node(id)
            .is_ok_and(|node| node.features.contains_key(&feature))
    }

    pub fn get(&self, id: NodeId, feature: NodeFeature, key: &str) -> Option<&Value> {
        match self.node(id).ok()?.features.get(&feature)? {
            Feature::Map(map) => map.get(key),
            Feature::List(_) => None,
        }
    }

    pub fn keys(&self, id: NodeId, feature: NodeFeature) -> Vec<String> {
        match self.node(id).ok().and_then(|node| node.features.get(&feature)) {
            Some(Feature::Map(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn list(&self, id: NodeId, feature: NodeFeature) -> &[Value] {
        match self.node(id).ok().and_then(|node| node.features.get(&feature)) {
            Some(Feature::List(list)) => list,
            _ => &[],
        }
    }

    fn check_kind(id: NodeId, feature: NodeFeature, kind: FeatureKind) -> std::result::Result<(), ProtocolError> {
        if feature.kind() != kind {
            return Err(ProtocolError::FeatureKindMismatch {
                node: id,
                feature,
                expected: kind.name(),
            });
        }
        Ok(())
    }

    fn map_mut(&mut self, id: NodeId, feature: NodeFeature) -> std::result::Result<&mut IndexMap<String, Value>, ProtocolError> {
        Self::check_kind(id, feature, FeatureKind::Map)?;
        let node = self.node_mut(id)?;
        match node
            .features
            .entry(feature)
            .or_insert_with(|| Feature::Map(IndexMap::new()))
        {
            Feature::Map(map) => Ok(map),
            Feature::List(_) => Err(ProtocolError::FeatureKindMismatch {
                node: id,
                feature,
                expected: FeatureKind::Map.name(),
            }),
        }
    }

    fn list_mut(&mut self, id: NodeId, feature: NodeFeature) -> std::result::Result<&mut Vec<Value>, ProtocolError> {
        Self::check_kind(id, feature, FeatureKind::List)?;
        let node = self.node_mut(id)?;
        match node
            .features
            .entry(feature)
            .or_insert_with(|| Feature::List(Vec::new()))
        {
            Feature::List(list) => Ok(list),
            Feature::Map(_) => Err(ProtocolError::FeatureKindMismatch {
                node: id,
                feature,
                expected: FeatureKind::List.name(),
            }),
        }
    }

    fn adopt(&mut self, parent: NodeId, value: &Value) -> std::result::Result<(), ProtocolError> {
        if let Some(child) = value.as_node() {
            self.node_mut(child)?.parent = Some(parent);
            self.log.touch(child);
        }
        Ok(())
    }

    fn release(&mut self, parent: NodeId, value: &Value) {
        if let Some(child) = value.as_node() {
            if let Ok(node) = self.node_mut(child) {
                if node.parent == Some(parent) {
                    node.parent = None;
                    self.log.touch(child);
                }
            }
        }
    }

    fn check_child(&self, value: &Value) -> std::result::Result<(), ProtocolError> {
        match value.as_node() {
            Some(child) => self.node(child).map(|_| ()),
            None => Ok(()),
        }
    }

    /// A node value may only be adopted by `parent` when it has no parent
    /// yet and is neither `parent` nor one of its ancestors.
    fn check_adoptable(&self, parent: NodeId, value: &Value) -> std::result::Result<(), ProtocolError> {
        let Some(child) = value.as_node() else {
            return Ok(());
        };
        if child == NodeId::ROOT {
            return Err(ProtocolError::ParentCycle { node: child, parent });
        }
        if let Some(existing) = self.node(child)?.parent {
            return Err(ProtocolError::AlreadyParented { node: child, parent: existing });
        }
        let mut current = Some(parent);
        while let Some(ancestor) = current {
            if ancestor == child {
                return Err(ProtocolError::ParentCycle { node: child, parent });
            }
            current = self.parent(ancestor);
        }
        Ok(())
    }

    /// Set a map property. Returns whether the value changed.
    pub fn put(&mut self, id: NodeId, feature: NodeFeature, key: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        let change = NodeChange::put(id, feature, key, &value)?;
        let previous = self.write_map(id, feature, key, Some(value))?;
        if previous.is_none() {
            return Ok(false);
        }
        self.log.record_map(change);
        Ok(true)
    }

    /// Remove a map property. Returns the removed value.
    pub fn remove(&mut self, id: NodeId, feature: NodeFeature, key: &str) -> Result<Option<Value>> {
        let Some(previous) = self.write_map(id, feature, key, None)? else {
            return Ok(None);
        };
        self.log.record_map(NodeChange::Remove {
            node: id,
            feat: feature,
            key: key.to_string(),
        });
        Ok(previous)
    }

    /// Store a value that came from the client. Nothing is recorded, so the
    /// value is not echoed back.
    pub(crate) fn put_from_client(&mut self, id: NodeId, feature: NodeFeature, key: &str, value: Value) -> Result<()> {
        self.write_map(id, feature, key, Some(value))?;
        Ok(())
    }

    /// Write a map entry. `None` when the entry already held `value`,
    /// otherwise the previous entry.
    fn write_map(
        &mut self,
        id: NodeId,
        feature: NodeFeature,
        key: &str,
        value: Option<Value>,
    ) -> std::result::Result<Option<Option<Value>>, ProtocolError> {
        Self::check_kind(id, feature, FeatureKind::Map)?;
        self.node(id)?;
        if self.get(id, feature, key) == value.as_ref() {
            return Ok(None);
        }
        if let Some(value) = &value {
            self.check_adoptable(id, value)?;
        }
        let map = self.map_mut(id, feature)?;
        let previous = match &value {
            Some(value) => map.insert(key.to_string(), value.clone()),
            None => map.shift_remove(key),
        };
        if let Some(previous) = &previous {
            self.release(id, previous);
        }
        if let Some(value) = &value {
            self.adopt(id, value)?;
        }
        Ok(Some(previous))
    }

    pub fn list_insert(&mut self, id: NodeId, feature: NodeFeature, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let change = NodeChange::list_insert(id, feature, index, &value)?;
        if feature.holds_children() {
            self.check_adoptable(id, &value)?;
        } else {
            self.check_child(&value)?;
        }
        let list = self.list_mut(id, feature)?;
        if index > list.len() {
            return Err(ProtocolError::IndexOutOfBounds {
                node: id,
                feature,
                index,
                len: list.len(),
            }
            .into());
        }
        list.insert(index, value.clone());
        if feature.holds_children() {
            self.adopt(id, &value)?;
        }
        self.log.record_list(change);
        Ok(())
    }

    pub fn list_push(&mut self, id: NodeId, feature: NodeFeature, value: impl Into<Value>) -> Result<()> {
        let len = self.list(id, feature).len();
        self.list_insert(id, feature, len, value)
    }

    pub fn list_remove(&mut self, id: NodeId, feature: NodeFeature, index: usize) -> Result<Value> {
        let list = self.list_mut(id, feature)?;
        if index >= list.len() {
            return Err(ProtocolError::IndexOutOfBounds {
                node: id,
                feature,
                index,
                len: list.len(),
            }
            .into());
        }
        let removed = list.remove(index);
        if feature.holds_children() {
            self.release(id, &removed);
        }
        self.log.record_list(NodeChange::ListRemove {
            node: id,
            feat: feature,
            index,
        });
        Ok(removed)
    }

    /// Move an entry within a list. Recorded as a remove and an insert; a
    /// moved child stays attached.
    pub fn list_move(&mut self, id: NodeId, feature: NodeFeature, from: usize, to: usize) -> Result<()> {
        let len = self.list(id, feature).len();
        if to >= len {
            return Err(ProtocolError::IndexOutOfBounds {
                node: id,
                feature,
                index: to,
                len,
            }
            .into());
        }
        if from == to {
            return Ok(());
        }
        let value = self.list_remove(id, feature, from)?;
        self.list_insert(id, feature, to, value)
    }

    pub fn list_clear(&mut self, id: NodeId, feature: NodeFeature) -> Result<()> {
        let list = self.list_mut(id, feature)?;
        if list.is_empty() {
            return Ok(());
        }
        let removed = std::mem::take(list);
        if feature.holds_children() {
            for value in &removed {
                self.release(id, value);
            }
        }
        self.log.record_list(NodeChange::Clear { node: id, feat: feature });
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        !self.log.is_empty()
    }

    /// Collect the changes of the current cycle and start a new one.
    ///
    /// Nodes that became attached are sent as `attach` followed by their
    /// complete state; changes to them recorded during the cycle are folded
    /// into that state. Nodes that became detached are sent as `detach`.
    /// Changes to nodes outside the tree are not sent.
    pub fn collect_changes(&mut self) -> std::result::Result<Vec<NodeChange>, CodecError> {
        let (recorded, touched) = self.log.take();

        let mut attached = Vec::new();
        let mut detached = Vec::new();
        for id in touched {
            self.refresh_attachment(id, &mut attached, &mut detached);
        }

        let fresh: HashSet<NodeId> = attached.iter().copied().collect();
        let mut changes = Vec::with_capacity(recorded.len());
        for id in &attached {
            changes.push(NodeChange::Attach { node: *id });
            self.write_state(*id, &mut changes)?;
        }
        changes.extend(recorded.into_iter().filter(|change| {
            let node = change.node();
            !fresh.contains(&node) && self.node(node).is_ok_and(|node| node.attached)
        }));
        changes.extend(detached.into_iter().map(|node| NodeChange::Detach { node }));

        tracing::debug!(changes = changes.len(), "collected changes");
        Ok(changes)
    }

    fn refresh_attachment(&mut self, id: NodeId, attached: &mut Vec<NodeId>, detached: &mut Vec<NodeId>) {
        let now = self.is_attached(id);
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Ok(node) = self.node_mut(current) else {
                continue;
            };
            if node.attached == now {
                continue;
            }
            node.attached = now;
            if now {
                attached.push(current);
            } else {
                detached.push(current);
            }
            let children = self.node(current).map(ServerNode::referenced_children).unwrap_or_default();
            for child in children.into_iter().rev() {
                if self.parent(child) == Some(current) {
                    pending.push(child);
                }
            }
        }
    }

    /// Append the records that rebuild the state of `id` from empty.
    fn write_state(&self, id: NodeId, out: &mut Vec<NodeChange>) -> std::result::Result<(), CodecError> {
        let Ok(node) = self.node(id) else {
            return Ok(());
        };
        for (feature, data) in &node.features {
            match data {
                Feature::Map(map) => {
                    for (key, value) in map {
                        out.push(NodeChange::put(id, *feature, key.as_str(), value)?);
                    }
                }
                Feature::List(list) => {
                    for (index, value) in list.iter().enumerate() {
                        out.push(NodeChange::list_insert(id, *feature, index, value)?);
                    }
                }
            }
        }
        Ok(())
    }

    /// Records rebuilding the whole attached tree from an empty root.
    pub fn snapshot(&self) -> std::result::Result<Vec<NodeChange>, CodecError> {
        let mut changes = Vec::new();
        let mut pending = vec![NodeId::ROOT];
        let mut seen = HashSet::new();
        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            if id != NodeId::ROOT {
                changes.push(NodeChange::Attach { node: id });
            }
            self.write_state(id, &mut changes)?;
            let children = self.node(id).map(ServerNode::referenced_children).unwrap_or_default();
            for child in children.into_iter().rev() {
                if self.parent(child) == Some(id) {
                    pending.push(child);
                }
            }
        }
        Ok(changes)
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::keys;
    use serde_json::json;

    fn element(tree: &mut StateTree, tag: &str) -> NodeId {
        let id = tree.create_node();
        tree.put(id, NodeFeature::ElementData, keys::TAG, tag).unwrap();
        id
    }

    #[test]
    fn detached_nodes_are_not_sent() {
        let mut tree = StateTree::new();
        let div = element(&mut tree, "div");
        tree.put(div, NodeFeature::ElementAttributes, "id", "main").unwrap();

        assert!(tree.collect_changes().unwrap().is_empty());
    }

    #[test]
    fn attach_sends_full_state_before_structure() {
        let mut tree = StateTree::new();
        let div = element(&mut tree, "div");
        tree.put(div, NodeFeature::ElementAttributes, "id", "main").unwrap();
        tree.list_push(tree.root(), NodeFeature::ElementChildren, div).unwrap();

        let changes = tree.collect_changes().unwrap();
        assert_eq!(changes[0], NodeChange::Attach { node: div });
        assert_eq!(
            changes[1],
            NodeChange::put(div, NodeFeature::ElementData, "tag", &Value::from("div")).unwrap()
        );
        assert_eq!(changes.len(), 4);
        assert!(matches!(
            &changes[3],
            NodeChange::ListInsert { node, value, .. } if *node == NodeId::ROOT && *value == json!([0, div.raw()])
        ));
        assert!(tree.is_attached(div));
    }

    #[test]
    fn removing_a_child_detaches_its_subtree() {
        let mut tree = StateTree::new();
        let list = element(&mut tree, "ul");
        let item = element(&mut tree, "li");
        tree.list_push(list, NodeFeature::ElementChildren, item).unwrap();
        tree.list_push(tree.root(), NodeFeature::ElementChildren, list).unwrap();
        tree.collect_changes().unwrap();

        tree.list_remove(tree.root(), NodeFeature::ElementChildren, 0).unwrap();
        let changes = tree.collect_changes().unwrap();

        assert_eq!(
            changes,
            vec![
                NodeChange::ListRemove {
                    node: NodeId::ROOT,
                    feat: NodeFeature::ElementChildren,
                    index: 0
                },
                NodeChange::Detach { node: list },
                NodeChange::Detach { node: item },
            ]
        );
    }

    #[test]
    fn moving_a_child_sends_only_structure() {
        let mut tree = StateTree::new();
        let a = element(&mut tree, "a");
        let b = element(&mut tree, "b");
        tree.list_push(tree.root(), NodeFeature::ElementChildren, a).unwrap();
        tree.list_push(tree.root(), NodeFeature::ElementChildren, b).unwrap();
        tree.collect_changes().unwrap();

        tree.list_move(tree.root(), NodeFeature::ElementChildren, 1, 0).unwrap();
        let changes = tree.collect_changes().unwrap();

        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|change| change.node() == NodeId::ROOT));
        assert_eq!(tree.list(tree.root(), NodeFeature::ElementChildren)[0], Value::Node(b));
    }

    #[test]
    fn equal_put_is_not_recorded() {
        let mut tree = StateTree::new();
        let root = tree.root();
        assert!(tree.put(root, NodeFeature::ElementProperties, "title", "x").unwrap());
        tree.collect_changes().unwrap();

        assert!(!tree.put(root, NodeFeature::ElementProperties, "title", "x").unwrap());
        assert!(!tree.has_changes());
    }

    #[test]
    fn kind_and_bounds_are_checked() {
        let mut tree = StateTree::new();
        let root = tree.root();

        assert!(matches!(
            tree.put(root, NodeFeature::ElementChildren, "x", 1),
            Err(crate::Error::Protocol(ProtocolError::FeatureKindMismatch { .. }))
        ));
        assert!(matches!(
            tree.list_insert(root, NodeFeature::ClassList, 2, "a"),
            Err(crate::Error::Protocol(ProtocolError::IndexOutOfBounds { .. }))
        ));
        assert!(matches!(
            tree.list_push(root, NodeFeature::ElementChildren, NodeId::new(99)),
            Err(crate::Error::Protocol(ProtocolError::UnknownNode { .. }))
        ));
    }

    #[test]
    fn snapshot_rebuilds_attached_tree() {
        let mut tree = StateTree::new();
        let div = element(&mut tree, "div");
        let orphan = element(&mut tree, "span");
        tree.list_push(tree.root(), NodeFeature::ElementChildren, div).unwrap();
        tree.collect_changes().unwrap();

        let snapshot = tree.snapshot().unwrap();
        assert!(snapshot.contains(&NodeChange::Attach { node: div }));
        assert!(!snapshot.iter().any(|change| change.node() == orphan));
        assert_eq!(
            snapshot.last().map(NodeChange::node),
            Some(div),
            "children follow their parent's records"
        );
    }

    #[test]
    fn second_parent_is_rejected() {
        let mut tree = StateTree::new();
        let a = element(&mut tree, "div");
        let b = element(&mut tree, "section");
        let c = element(&mut tree, "span");
        for parent in [a, b] {
            tree.list_push(tree.root(), NodeFeature::ElementChildren, parent).unwrap();
        }
        tree.list_push(a, NodeFeature::ElementChildren, c).unwrap();
        tree.collect_changes().unwrap();

        assert!(matches!(
            tree.list_push(b, NodeFeature::ElementChildren, c),
            Err(crate::Error::Protocol(ProtocolError::AlreadyParented { node, parent }))
                if node == c && parent == a
        ));
        assert!(matches!(
            tree.put(b, NodeFeature::TemplateOverrides, "1", c),
            Err(crate::Error::Protocol(ProtocolError::AlreadyParented { .. }))
        ));
        assert!(tree.list(b, NodeFeature::ElementChildren).is_empty());
        assert_eq!(tree.parent(c), Some(a));
        assert!(!tree.has_changes());

        // Leaving the first parent makes the node free to move.
        tree.list_remove(a, NodeFeature::ElementChildren, 0).unwrap();
        tree.list_push(b, NodeFeature::ElementChildren, c).unwrap();
        let changes = tree.collect_changes().unwrap();
        assert_eq!(tree.parent(c), Some(b));
        assert!(!changes.contains(&NodeChange::Detach { node: c }));
    }

    #[test]
    fn ancestors_cannot_become_children() {
        let mut tree = StateTree::new();
        let outer = element(&mut tree, "div");
        let inner = element(&mut tree, "span");
        tree.list_push(tree.root(), NodeFeature::ElementChildren, outer).unwrap();
        tree.list_push(outer, NodeFeature::ElementChildren, inner).unwrap();
        tree.collect_changes().unwrap();

        tree.list_remove(tree.root(), NodeFeature::ElementChildren, 0).unwrap();
        assert!(matches!(
            tree.list_push(inner, NodeFeature::ElementChildren, outer),
            Err(crate::Error::Protocol(ProtocolError::ParentCycle { .. }))
        ));
        assert!(matches!(
            tree.list_push(inner, NodeFeature::ElementChildren, inner),
            Err(crate::Error::Protocol(ProtocolError::ParentCycle { .. }))
        ));
        assert!(matches!(
            tree.list_push(inner, NodeFeature::ElementChildren, NodeId::ROOT),
            Err(crate::Error::Protocol(ProtocolError::ParentCycle { .. }))
        ));
        assert!(tree.list(inner, NodeFeature::ElementChildren).is_empty());
        assert_eq!(tree.parent(outer), None);
    }
}
