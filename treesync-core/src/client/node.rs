//! Client state nodes.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::list::NodeList;
use super::map::NodeMap;
use super::tree::{StateTree, TreeInner};
use crate::binder::DomId;
use crate::protocol::{FeatureKind, NodeFeature, NodeId, Value};
use crate::reactive::Registration;

#[derive(Clone)]
enum Feature {
    Map(NodeMap),
    List(NodeList),
}

type UnregisterListener = Box<dyn FnOnce(&StateNode)>;

pub(crate) struct NodeInner {
    id: NodeId,
    tree: Weak<TreeInner>,
    features: RefCell<BTreeMap<NodeFeature, Feature>>,
    parent: Cell<Option<NodeId>>,
    dom_node: Cell<Option<DomId>>,
    unregistered: Cell<bool>,
    unregister_listeners: RefCell<IndexMap<u64, UnregisterListener>>,
    next_listener: Cell<u64>,
}

/// A node of the client mirror.
///
/// Features are created lazily on first access. The parent and the bound
/// UI node are stored as ids and resolved through their owning registries.
#[derive(Clone)]
pub struct StateNode {
    inner: Rc<NodeInner>,
}

impl StateNode {
    /// Create a node for `tree` without registering it.
    pub fn new(id: NodeId, tree: &StateTree) -> Self {
        Self::with_tree(id, tree.downgrade())
    }

    pub(crate) fn with_tree(id: NodeId, tree: Weak<TreeInner>) -> Self {
        Self {
            inner: Rc::new(NodeInner {
                id,
                tree,
                features: RefCell::new(BTreeMap::new()),
                parent: Cell::new(None),
                dom_node: Cell::new(None),
                unregistered: Cell::new(false),
                unregister_listeners: RefCell::new(IndexMap::new()),
                next_listener: Cell::new(0),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn tree(&self) -> Option<StateTree> {
        StateTree::upgrade(&self.inner.tree)
    }

    /// The map feature `feature`, created on first access.
    ///
    /// `feature` must be a map feature; a list feature yields a detached
    /// empty map.
    pub fn map(&self, feature: NodeFeature) -> NodeMap {
        debug_assert!(feature.is_map(), "{feature:?} is not a map feature");
        match self.feature(feature) {
            Feature::Map(map) => map,
            Feature::List(_) => NodeMap::new(self.id(), feature, Weak::new()),
        }
    }

    /// The list feature `feature`, created on first access.
    ///
    /// `feature` must be a list feature; a map feature yields a detached
    /// empty list.
    pub fn list(&self, feature: NodeFeature) -> NodeList {
        debug_assert!(feature.is_list(), "{feature:?} is not a list feature");
        match self.feature(feature) {
            Feature::List(list) => list,
            Feature::Map(_) => NodeList::new(self.id(), feature, Weak::new()),
        }
    }

    fn feature(&self, feature: NodeFeature) -> Feature {
        let mut features = self.inner.features.borrow_mut();
        features
            .entry(feature)
            .or_insert_with(|| match feature.kind() {
                FeatureKind::Map => {
                    Feature::Map(NodeMap::new(self.id(), feature, self.inner.tree.clone()))
                }
                FeatureKind::List => {
                    Feature::List(NodeList::new(self.id(), feature, self.inner.tree.clone()))
                }
            })
            .clone()
    }

    pub fn has_feature(&self, feature: NodeFeature) -> bool {
        self.inner.features.borrow().contains_key(&feature)
    }

    /// Convenience for reading one map property without tracking.
    pub fn peek_property(&self, feature: NodeFeature, name: &str) -> Option<Value> {
        if !self.has_feature(feature) {
            return None;
        }
        self.map(feature).property(name).peek()
    }

    pub fn parent_id(&self) -> Option<NodeId> {
        self.inner.parent.get()
    }

    /// The parent node, resolved through the tree.
    pub fn parent(&self) -> Option<StateNode> {
        let parent = self.inner.parent.get()?;
        self.tree()?.node(parent)
    }

    pub(crate) fn set_parent(&self, parent: Option<NodeId>) {
        self.inner.parent.set(parent);
    }

    /// The UI node this state node is bound to.
    pub fn dom_node(&self) -> Option<DomId> {
        self.inner.dom_node.get()
    }

    pub(crate) fn set_dom_node(&self, dom: Option<DomId>) {
        self.inner.dom_node.set(dom);
    }

    pub fn is_unregistered(&self) -> bool {
        self.inner.unregistered.get()
    }

    /// Call `listener` once when the node is unregistered.
    pub fn add_unregister_listener<F>(&self, listener: F) -> Registration
    where
        F: FnOnce(&StateNode) + 'static,
    {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);
        self.inner
            .unregister_listeners
            .borrow_mut()
            .insert(id, Box::new(listener));

        let weak = Rc::downgrade(&self.inner);
        Registration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.unregister_listeners.borrow_mut().shift_remove(&id);
            }
        })
    }

    pub(crate) fn mark_unregistered(&self) {
        if self.inner.unregistered.replace(true) {
            return;
        }
        let listeners = std::mem::take(&mut *self.inner.unregister_listeners.borrow_mut());
        for (_, listener) in listeners {
            listener(self);
        }
    }

    /// Ids of nodes owned by this node: children list entries and node
    /// values of map features whose parent is this node.
    pub(crate) fn owned_children(&self) -> Vec<NodeId> {
        let features: Vec<(NodeFeature, Feature)> = self
            .inner
            .features
            .borrow()
            .iter()
            .map(|(feature, data)| (*feature, data.clone()))
            .collect();

        let mut children = Vec::new();
        for (feature, data) in features {
            match data {
                Feature::List(list) if feature.holds_children() => children.extend(
                    list.peek_values().iter().filter_map(Value::as_node),
                ),
                Feature::List(_) => {}
                Feature::Map(map) => children.extend(map.referenced_nodes()),
            }
        }
        children
    }

    /// Empty every feature. Features themselves stay, so existing bindings
    /// keep observing them. Used on the root when the tree is reset.
    pub(crate) fn clear_features(&self) {
        let features: Vec<Feature> = self.inner.features.borrow().values().cloned().collect();
        for feature in features {
            match feature {
                Feature::Map(map) => {
                    for property in map.properties() {
                        property.remove_value();
                    }
                }
                Feature::List(list) => list.clear(),
            }
        }
    }
}

impl PartialEq for StateNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for StateNode {}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("id", &self.inner.id)
            .field("parent", &self.inner.parent.get())
            .field("features", &self.inner.features.borrow().keys().collect::<Vec<_>>())
            .field("unregistered", &self.inner.unregistered.get())
            .finish()
    }
}
