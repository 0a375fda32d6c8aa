//! Dependency sources.
//!
//! An [`Observable`] is the bookkeeping half of any reactive value: it knows
//! which computations read it and invalidates them when it changes. Map
//! properties, node lists and [`Signal`](super::Signal)s each embed one.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::computation::{Computation, ComputationInner};
use super::context::ReactiveContext;
use super::SubscriberId;

static OBSERVABLE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) struct ObservableInner {
    id: u64,
    dependents: RefCell<IndexMap<SubscriberId, Weak<ComputationInner>>>,
}

/// A source of change notifications that computations can depend on.
#[derive(Clone)]
pub struct Observable {
    inner: Rc<ObservableInner>,
}

impl Observable {
    /// Create an observable with no dependents.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ObservableInner {
                id: OBSERVABLE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                dependents: RefCell::new(IndexMap::new()),
            }),
        }
    }

    /// Get the observable's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Record a read.
    ///
    /// Inside a running computation this registers the computation as a
    /// dependent. Outside of one it does nothing.
    pub fn track(&self) {
        let Some(computation) = ReactiveContext::current() else {
            return;
        };
        if computation.is_stopped() {
            return;
        }

        let newly_added = self
            .inner
            .dependents
            .borrow_mut()
            .insert(computation.id(), computation.downgrade())
            .is_none();

        if newly_added {
            computation.add_dependency(self.clone());
        }
    }

    /// Invalidate every dependent computation.
    ///
    /// Invalidated computations drop all their dependencies and are queued
    /// for the next flush; a computation is queued at most once.
    pub fn notify(&self) {
        let dependents: Vec<_> = self.inner.dependents.borrow().values().cloned().collect();
        for weak in dependents {
            if let Some(inner) = weak.upgrade() {
                Computation::from_inner(inner).invalidate();
            }
        }
    }

    pub(crate) fn remove_dependent(&self, id: SubscriberId) {
        self.inner.dependents.borrow_mut().shift_remove(&id);
    }

    /// Number of computations currently depending on this observable.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.borrow().len()
    }
}

impl Default for Observable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.inner.id)
            .field("dependents", &self.dependent_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{flush, run_when_dependencies_change};
    use std::cell::Cell;

    #[test]
    fn read_outside_computation_tracks_nothing() {
        let observable = Observable::new();
        observable.track();
        assert_eq!(observable.dependent_count(), 0);
    }

    #[test]
    fn repeated_reads_register_once() {
        let observable = Observable::new();
        let source = observable.clone();
        let computation = run_when_dependencies_change(move || {
            source.track();
            source.track();
        });

        assert_eq!(observable.dependent_count(), 1);
        assert_eq!(computation.dependency_count(), 1);
    }

    #[test]
    fn notify_schedules_dependents() {
        let observable = Observable::new();
        let runs = Rc::new(Cell::new(0));

        let source = observable.clone();
        let runs_clone = runs.clone();
        let _computation = run_when_dependencies_change(move || {
            source.track();
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        observable.notify();
        assert_eq!(runs.get(), 1, "re-run waits for flush");

        flush();
        assert_eq!(runs.get(), 2);
    }
}
