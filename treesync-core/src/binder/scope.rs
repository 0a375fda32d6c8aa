//! Binding scopes.
//!
//! Every bound state node owns a [`Scope`] collecting the computations and
//! listener registrations created while binding it. Disposing the scope
//! stops all of them, including those of nested scopes (repeated template
//! sections own one child scope per generation).

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::reactive::{Computation, Registration};

#[derive(Default)]
struct ScopeInner {
    computations: RefCell<Vec<Computation>>,
    registrations: RefCell<Vec<Registration>>,
    children: RefCell<Vec<Scope>>,
    disposed: Cell<bool>,
}

/// Owner of a group of bindings. Clones share the scope.
#[derive(Clone, Default)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

/// Non-owning scope handle for closures stored inside the scope itself.
#[derive(Clone)]
pub struct WeakScope {
    inner: Weak<ScopeInner>,
}

impl WeakScope {
    pub fn upgrade(&self) -> Option<Scope> {
        self.inner.upgrade().map(|inner| Scope { inner })
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Take ownership of `computation`. Adding to a disposed scope stops it
    /// at once.
    pub fn add_computation(&self, computation: Computation) {
        if self.is_disposed() {
            computation.stop();
            return;
        }
        self.inner.computations.borrow_mut().push(computation);
    }

    /// Take ownership of `registration`. Adding to a disposed scope removes
    /// it at once.
    pub fn add_registration(&self, registration: Registration) {
        if self.is_disposed() {
            registration.remove();
            return;
        }
        self.inner.registrations.borrow_mut().push(registration);
    }

    /// Create a scope disposed together with this one.
    pub fn child(&self) -> Scope {
        let child = Scope::new();
        if self.is_disposed() {
            child.dispose();
        } else {
            self.inner.children.borrow_mut().push(child.clone());
        }
        child
    }

    pub fn computation_count(&self) -> usize {
        self.inner.computations.borrow().len()
    }

    /// Stop every computation and remove every registration. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        for child in children {
            child.dispose();
        }
        let computations = std::mem::take(&mut *self.inner.computations.borrow_mut());
        for computation in computations {
            computation.stop();
        }
        let registrations = std::mem::take(&mut *self.inner.registrations.borrow_mut());
        for registration in registrations {
            registration.remove();
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("computations", &self.inner.computations.borrow().len())
            .field("registrations", &self.inner.registrations.borrow().len())
            .field("children", &self.inner.children.borrow().len())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}
