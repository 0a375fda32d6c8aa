//! Map features.
//!
//! A [`NodeMap`] holds named [`MapProperty`] slots. Reading a property's
//! value inside a computation tracks that single property, so a binding
//! re-runs only when the slot it reads changes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::tree::{StateTree, TreeInner};
use crate::protocol::{NodeFeature, NodeId, Value};
use crate::reactive::{Observable, Registration};

type ChangeListener = Rc<dyn Fn(&MapPropertyChangeEvent)>;
type AddListener = Rc<dyn Fn(&MapProperty)>;

/// Fired after a property value changed.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPropertyChangeEvent {
    pub name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

struct PropertyInner {
    name: String,
    owner: NodeId,
    feature: NodeFeature,
    tree: Weak<TreeInner>,
    value: RefCell<Option<Value>>,
    observable: Observable,
    listeners: RefCell<IndexMap<u64, ChangeListener>>,
    next_listener: Cell<u64>,
}

/// One named slot of a map feature.
#[derive(Clone)]
pub struct MapProperty {
    inner: Rc<PropertyInner>,
}

impl MapProperty {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The current value, tracked.
    pub fn value(&self) -> Option<Value> {
        self.inner.observable.track();
        self.peek()
    }

    /// Whether the property holds a value, tracked.
    pub fn has_value(&self) -> bool {
        self.inner.observable.track();
        self.inner.value.borrow().is_some()
    }

    /// The current value without tracking.
    pub fn peek(&self) -> Option<Value> {
        self.inner.value.borrow().clone()
    }

    /// Set the value. Setting an equal value is a no-op.
    ///
    /// Returns whether the value changed.
    pub fn set_value(&self, value: Value) -> bool {
        self.replace(Some(value))
    }

    /// Clear the value. Returns whether there was one.
    pub fn remove_value(&self) -> bool {
        self.replace(None)
    }

    fn replace(&self, value: Option<Value>) -> bool {
        if *self.inner.value.borrow() == value {
            return false;
        }
        let old_value = self.inner.value.replace(value.clone());

        if let Some(tree) = StateTree::upgrade(&self.inner.tree) {
            if let Some(Value::Node(old)) = &old_value {
                tree.release_child(self.inner.owner, *old);
            }
            if let Some(Value::Node(new)) = &value {
                tree.adopt_child(self.inner.owner, *new);
            }
        }

        self.inner.observable.notify();

        let event = MapPropertyChangeEvent {
            name: self.inner.name.clone(),
            old_value,
            new_value: value,
        };
        let listeners: Vec<ChangeListener> =
            self.inner.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener(&event);
        }
        true
    }

    /// Call `listener` after every value change.
    pub fn add_change_listener<F>(&self, listener: F) -> Registration
    where
        F: Fn(&MapPropertyChangeEvent) + 'static,
    {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);
        self.inner.listeners.borrow_mut().insert(id, Rc::new(listener));

        let weak = Rc::downgrade(&self.inner);
        Registration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.borrow_mut().shift_remove(&id);
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn dependent_count(&self) -> usize {
        self.inner.observable.dependent_count()
    }
}

impl fmt::Debug for MapProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapProperty")
            .field("node", &self.inner.owner)
            .field("feature", &self.inner.feature)
            .field("name", &self.inner.name)
            .field("value", &self.inner.value.borrow())
            .finish()
    }
}

struct MapInner {
    owner: NodeId,
    feature: NodeFeature,
    tree: Weak<TreeInner>,
    properties: RefCell<IndexMap<String, MapProperty>>,
    add_listeners: RefCell<IndexMap<u64, AddListener>>,
    next_listener: Cell<u64>,
    structure: Observable,
}

/// A map feature of a state node.
#[derive(Clone)]
pub struct NodeMap {
    inner: Rc<MapInner>,
}

impl NodeMap {
    pub(crate) fn new(owner: NodeId, feature: NodeFeature, tree: Weak<TreeInner>) -> Self {
        Self {
            inner: Rc::new(MapInner {
                owner,
                feature,
                tree,
                properties: RefCell::new(IndexMap::new()),
                add_listeners: RefCell::new(IndexMap::new()),
                next_listener: Cell::new(0),
                structure: Observable::new(),
            }),
        }
    }

    pub fn feature(&self) -> NodeFeature {
        self.inner.feature
    }

    /// The named property, created empty on first access.
    pub fn property(&self, name: &str) -> MapProperty {
        if let Some(existing) = self.inner.properties.borrow().get(name) {
            return existing.clone();
        }

        let property = MapProperty {
            inner: Rc::new(PropertyInner {
                name: name.to_string(),
                owner: self.inner.owner,
                feature: self.inner.feature,
                tree: self.inner.tree.clone(),
                value: RefCell::new(None),
                observable: Observable::new(),
                listeners: RefCell::new(IndexMap::new()),
                next_listener: Cell::new(0),
            }),
        };
        self.inner
            .properties
            .borrow_mut()
            .insert(name.to_string(), property.clone());
        self.inner.structure.notify();

        let listeners: Vec<AddListener> =
            self.inner.add_listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener(&property);
        }
        property
    }

    /// Whether the named property exists and holds a value, tracked.
    pub fn has_property(&self, name: &str) -> bool {
        self.inner.structure.track();
        let property = self.inner.properties.borrow().get(name).cloned();
        property.is_some_and(|property| property.has_value())
    }

    /// Names of every property created so far, tracked.
    pub fn property_names(&self) -> Vec<String> {
        self.inner.structure.track();
        self.inner.properties.borrow().keys().cloned().collect()
    }

    /// Every property created so far, without tracking.
    pub fn properties(&self) -> Vec<MapProperty> {
        self.inner.properties.borrow().values().cloned().collect()
    }

    /// Call `listener` whenever a new property is created.
    pub fn add_property_add_listener<F>(&self, listener: F) -> Registration
    where
        F: Fn(&MapProperty) + 'static,
    {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);
        self.inner.add_listeners.borrow_mut().insert(id, Rc::new(listener));

        let weak = Rc::downgrade(&self.inner);
        Registration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.add_listeners.borrow_mut().shift_remove(&id);
            }
        })
    }

    /// Node ids referenced by property values, without tracking.
    pub(crate) fn referenced_nodes(&self) -> Vec<NodeId> {
        self.inner
            .properties
            .borrow()
            .values()
            .filter_map(|property| property.peek().and_then(|value| value.as_node()))
            .collect()
    }
}

impl fmt::Debug for NodeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.inner
                    .properties
                    .borrow()
                    .iter()
                    .map(|(name, property)| (name.clone(), property.peek())),
            )
            .finish()
    }
}
