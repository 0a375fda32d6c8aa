//! Element Binder
//!
//! Binds state nodes of the client mirror to UI nodes of a [`Document`] and
//! keeps them in sync.
//!
//! # Binding model
//!
//! Binding is one-shot per state node: a node is bound to exactly one UI
//! node, and binding it again is rejected. Every value slot (a property, an
//! attribute, a style, a template model binding) gets its own computation,
//! so a changed value re-runs only the setter that reads it.
//!
//! Structural edits (inserting and removing children) are queued as flush
//! listeners. By the time they run, the whole change batch has been applied
//! and the children's own state is complete.
//!
//! A node's bindings live in a [`Scope`] that is disposed when the node is
//! unregistered from the tree.

mod dom;
mod element;
mod embedded;
mod expression;
mod scope;
mod strategy;
mod template;
mod text;

pub use dom::{DomEvent, DomId, Document};
pub use embedded::{ComponentState, EmbeddedComponents};
pub use expression::{Expression, ExpressionCache};
pub use scope::{Scope, WeakScope};
pub use strategy::BindingStrategy;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::client::{StateNode, StateTree};
use crate::error::{BindingError, Error, ErrorHandler, SystemErrorHandler};
use crate::protocol::NodeId;

struct BinderInner {
    tree: StateTree,
    document: Document,
    scopes: RefCell<HashMap<NodeId, Scope>>,
    expressions: RefCell<ExpressionCache>,
    error_handler: Rc<dyn ErrorHandler>,
}

/// Binds a state tree to a document. Clones share the binder.
#[derive(Clone)]
pub struct Binder {
    inner: Rc<BinderInner>,
}

#[derive(Clone)]
pub(crate) struct WeakBinder {
    inner: Weak<BinderInner>,
}

impl WeakBinder {
    pub(crate) fn upgrade(&self) -> Option<Binder> {
        self.inner.upgrade().map(|inner| Binder { inner })
    }
}

impl Binder {
    pub fn new(tree: StateTree, document: Document) -> Self {
        Self::with_error_handler(tree, document, Rc::new(SystemErrorHandler::new()))
    }

    pub fn with_error_handler(
        tree: StateTree,
        document: Document,
        error_handler: Rc<dyn ErrorHandler>,
    ) -> Self {
        Self {
            inner: Rc::new(BinderInner {
                tree,
                document,
                scopes: RefCell::new(HashMap::new()),
                expressions: RefCell::new(ExpressionCache::new()),
                error_handler,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakBinder {
        WeakBinder {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn tree(&self) -> &StateTree {
        &self.inner.tree
    }

    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    /// Bind the tree's root node to an existing element, typically the body.
    pub fn bind_root(&self, container: DomId) -> Result<(), BindingError> {
        let root = self.inner.tree.root();
        self.bind_with(&root, container, BindingStrategy::Element)
    }

    /// Bind `node` to an existing UI node.
    pub fn bind(&self, node: &StateNode, dom: DomId) -> Result<(), BindingError> {
        let strategy = BindingStrategy::find(node)
            .ok_or(BindingError::UnknownNodeKind { id: node.id() })?;
        self.bind_with(node, dom, strategy)
    }

    /// The UI node bound to `node`, creating and binding one if needed.
    ///
    /// A node that is already bound keeps its UI node, so moving a node
    /// between parents reuses it.
    pub fn create_and_bind(&self, node: &StateNode) -> Result<DomId, BindingError> {
        if let Some(dom) = node.dom_node() {
            return Ok(dom);
        }
        let strategy = BindingStrategy::find(node)
            .ok_or(BindingError::UnknownNodeKind { id: node.id() })?;
        let dom = strategy.create(self, node)?;
        self.bind_with(node, dom, strategy)?;
        Ok(dom)
    }

    fn bind_with(
        &self,
        node: &StateNode,
        dom: DomId,
        strategy: BindingStrategy,
    ) -> Result<(), BindingError> {
        if node.dom_node().is_some() || self.is_bound(node) {
            return Err(BindingError::AlreadyBound { id: node.id() });
        }

        let scope = Scope::new();
        node.set_dom_node(Some(dom));
        self.inner
            .scopes
            .borrow_mut()
            .insert(node.id(), scope.clone());

        let weak = self.downgrade();
        // Kept for the node's lifetime; the listener fires once.
        let unbind = node.add_unregister_listener(move |node| {
            if let Some(binder) = weak.upgrade() {
                binder.unbind(node);
            }
        });

        tracing::trace!(node = %node.id(), ?strategy, "binding node");
        let outcome = strategy.bind(self, node, dom, &scope);
        if outcome.is_err() {
            // Leave the node unbound so a later attempt starts over.
            unbind.remove();
            self.unbind(node);
        }
        outcome
    }

    pub fn is_bound(&self, node: &StateNode) -> bool {
        self.inner.scopes.borrow().contains_key(&node.id())
    }

    /// Number of computations owned by the binding of `node`.
    pub fn computation_count(&self, node: &StateNode) -> usize {
        self.inner
            .scopes
            .borrow()
            .get(&node.id())
            .map_or(0, Scope::computation_count)
    }

    fn unbind(&self, node: &StateNode) {
        let scope = self.inner.scopes.borrow_mut().remove(&node.id());
        if let Some(scope) = scope {
            scope.dispose();
        }
        node.set_dom_node(None);
        tracing::trace!(node = %node.id(), "unbound node");
    }

    pub(crate) fn expression(&self, source: &str) -> Result<Rc<Expression>, BindingError> {
        self.inner.expressions.borrow_mut().get(source)
    }

    /// Report an error that must not stop other bindings.
    pub(crate) fn report(&self, error: impl Into<Error>) {
        self.inner.error_handler.handle_error(&error.into());
    }
}

impl fmt::Debug for Binder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binder")
            .field("bound", &self.inner.scopes.borrow().len())
            .finish()
    }
}
