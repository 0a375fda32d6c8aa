//! List features.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::tree::{StateTree, TreeInner};
use crate::error::ProtocolError;
use crate::protocol::{NodeFeature, NodeId, Value};
use crate::reactive::{Observable, Registration};

type SpliceListener = Rc<dyn Fn(&ListSpliceEvent)>;

/// Describes one structural change of a list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSpliceEvent {
    /// Position of the first removed or added entry.
    pub index: usize,
    pub removed: SmallVec<[Value; 4]>,
    pub added: SmallVec<[Value; 4]>,
    /// The list was emptied in one operation.
    pub clear: bool,
}

struct ListInner {
    owner: NodeId,
    feature: NodeFeature,
    tree: Weak<TreeInner>,
    values: RefCell<Vec<Value>>,
    observable: Observable,
    listeners: RefCell<IndexMap<u64, SpliceListener>>,
    next_listener: Cell<u64>,
}

/// An ordered list feature of a state node.
///
/// Entries of children features ([`NodeFeature::holds_children`]) are node
/// references whose parent is the owning node.
#[derive(Clone)]
pub struct NodeList {
    inner: Rc<ListInner>,
}

impl NodeList {
    pub(crate) fn new(owner: NodeId, feature: NodeFeature, tree: Weak<TreeInner>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                owner,
                feature,
                tree,
                values: RefCell::new(Vec::new()),
                observable: Observable::new(),
                listeners: RefCell::new(IndexMap::new()),
                next_listener: Cell::new(0),
            }),
        }
    }

    pub fn feature(&self) -> NodeFeature {
        self.inner.feature
    }

    /// Number of entries, tracked.
    pub fn len(&self) -> usize {
        self.inner.observable.track();
        self.inner.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The entry at `index`, tracked.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.observable.track();
        self.inner.values.borrow().get(index).cloned()
    }

    /// A copy of every entry, tracked.
    pub fn values(&self) -> Vec<Value> {
        self.inner.observable.track();
        self.peek_values()
    }

    /// A copy of every entry, without tracking.
    pub fn peek_values(&self) -> Vec<Value> {
        self.inner.values.borrow().clone()
    }

    /// Remove `remove_count` entries at `index` and insert `added` there.
    pub fn splice(
        &self,
        index: usize,
        remove_count: usize,
        added: impl IntoIterator<Item = Value>,
    ) -> Result<(), ProtocolError> {
        let added: SmallVec<[Value; 4]> = added.into_iter().collect();
        let removed: SmallVec<[Value; 4]> = {
            let mut values = self.inner.values.borrow_mut();
            let len = values.len();
            if index > len || index + remove_count > len {
                return Err(ProtocolError::IndexOutOfBounds {
                    node: self.inner.owner,
                    feature: self.inner.feature,
                    index: index + remove_count.saturating_sub(1),
                    len,
                });
            }
            values
                .splice(index..index + remove_count, added.iter().cloned())
                .collect()
        };
        if removed.is_empty() && added.is_empty() {
            return Ok(());
        }

        self.update_parents(&removed, &added);
        self.inner.observable.notify();
        self.fire(ListSpliceEvent {
            index,
            removed,
            added,
            clear: false,
        });
        Ok(())
    }

    pub fn insert(&self, index: usize, value: Value) -> Result<(), ProtocolError> {
        self.splice(index, 0, [value])
    }

    pub fn push(&self, value: Value) {
        let len = self.inner.values.borrow().len();
        // Appending is always in bounds.
        let _ = self.splice(len, 0, [value]);
    }

    pub fn remove(&self, index: usize) -> Result<(), ProtocolError> {
        self.splice(index, 1, [])
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let removed: SmallVec<[Value; 4]> = self.inner.values.borrow_mut().drain(..).collect();
        if removed.is_empty() {
            return;
        }
        self.update_parents(&removed, &[]);
        self.inner.observable.notify();
        self.fire(ListSpliceEvent {
            index: 0,
            removed,
            added: SmallVec::new(),
            clear: true,
        });
    }

    /// Call `listener` after every structural change.
    pub fn add_splice_listener<F>(&self, listener: F) -> Registration
    where
        F: Fn(&ListSpliceEvent) + 'static,
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

    fn update_parents(&self, removed: &[Value], added: &[Value]) {
        if !self.inner.feature.holds_children() {
            return;
        }
        let Some(tree) = StateTree::upgrade(&self.inner.tree) else {
            return;
        };
        for id in removed.iter().filter_map(Value::as_node) {
            tree.release_child(self.inner.owner, id);
        }
        for id in added.iter().filter_map(Value::as_node) {
            tree.adopt_child(self.inner.owner, id);
        }
    }

    fn fire(&self, event: ListSpliceEvent) {
        let listeners: Vec<SpliceListener> =
            self.inner.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener(&event);
        }
    }
}

impl fmt::Debug for NodeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.values.borrow().iter()).finish()
    }
}
