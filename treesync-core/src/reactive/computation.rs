//! Computation Implementation
//!
//! A Computation is a side-effecting body that re-runs whenever something it
//! read has changed.
//!
//! # How Computations Work
//!
//! 1. When created through [`run_when_dependencies_change`], the body runs
//!    immediately to establish initial dependencies.
//!
//! 2. When any dependency changes, the computation drops all of its
//!    dependencies and is queued on the [`Runtime`]. Further changes before
//!    the next flush do not queue it again.
//!
//! 3. During [`flush`](super::flush) the body re-runs and tracks a fresh set
//!    of dependencies.
//!
//! # Failure isolation
//!
//! A panicking body is caught and logged. The computation keeps whatever
//! dependencies it tracked before failing and the flush continues with the
//! next queued job, so one broken binding never blocks unrelated updates.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use super::context::ReactiveContext;
use super::observable::Observable;
use super::runtime::Runtime;
use super::subscriber::SubscriberId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Up to date with its dependencies.
    Idle,
    /// Queued for re-run at the next flush.
    Invalidated,
    /// Will never run again.
    Stopped,
}

type Body = Box<dyn FnMut()>;

pub(crate) struct ComputationInner {
    id: SubscriberId,
    body: RefCell<Option<Body>>,
    dependencies: RefCell<Vec<Observable>>,
    state: Cell<State>,
    run_count: Cell<usize>,
}

/// A unit of reactive recomputation.
///
/// Cloning a `Computation` yields another handle to the same computation.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let source = count.clone();
/// let computation = run_when_dependencies_change(move || {
///     println!("Count is: {}", source.get());
/// });
///
/// count.set(5);
/// flush(); // Prints: "Count is: 5"
/// ```
#[derive(Clone)]
pub struct Computation {
    inner: Rc<ComputationInner>,
}

/// Run `body` now and again at every flush after one of its reads changed.
pub fn run_when_dependencies_change<F>(body: F) -> Computation
where
    F: FnMut() + 'static,
{
    let computation = Computation::detached(body);
    computation.execute();
    computation
}

impl Computation {
    /// Create a computation without running it.
    pub(crate) fn detached<F>(body: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self {
            inner: Rc::new(ComputationInner {
                id: SubscriberId::new(),
                body: RefCell::new(Some(Box::new(body))),
                dependencies: RefCell::new(Vec::new()),
                state: Cell::new(State::Idle),
                run_count: Cell::new(0),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<ComputationInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ComputationInner> {
        Rc::downgrade(&self.inner)
    }

    /// Get the subscriber ID of this computation.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.state.get() == State::Stopped
    }

    /// Whether the computation is waiting for the next flush.
    pub fn is_invalidated(&self) -> bool {
        self.inner.state.get() == State::Invalidated
    }

    /// Number of times the body has run, including the initial run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Number of observables this computation currently depends on.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.borrow().len()
    }

    pub(crate) fn add_dependency(&self, observable: Observable) {
        self.inner.dependencies.borrow_mut().push(observable);
    }

    /// Mark the computation as needing a re-run and queue it.
    pub(crate) fn invalidate(&self) {
        if self.inner.state.get() != State::Idle {
            return;
        }
        self.inner.state.set(State::Invalidated);
        self.clear_dependencies();
        Runtime::schedule(self.clone());
    }

    /// Re-run a queued computation. Called by the runtime during flush.
    pub(crate) fn recompute(&self) {
        if self.inner.state.get() != State::Invalidated {
            return;
        }
        self.inner.state.set(State::Idle);
        Runtime::record_recompute();
        self.execute();
    }

    fn execute(&self) {
        if self.is_stopped() {
            return;
        }

        // Taking the body out guards against re-entrant execution.
        let Some(mut body) = self.inner.body.borrow_mut().take() else {
            return;
        };

        let outcome = {
            let _ctx = ReactiveContext::enter(self);
            panic::catch_unwind(AssertUnwindSafe(|| body()))
        };

        if let Err(payload) = outcome {
            tracing::error!(
                computation = %self.id(),
                "computation failed: {}",
                panic_message(payload.as_ref())
            );
        }

        if !self.is_stopped() {
            *self.inner.body.borrow_mut() = Some(body);
        }
        self.inner.run_count.set(self.inner.run_count.get() + 1);
    }

    /// Stop the computation.
    ///
    /// Unregisters it from every dependency and drops its body. A stopped
    /// computation that is already queued is skipped by the flush.
    /// Idempotent.
    pub fn stop(&self) {
        if self.is_stopped() {
            return;
        }
        self.inner.state.set(State::Stopped);
        self.clear_dependencies();
        let body = self.inner.body.borrow_mut().take();
        drop(body);
    }

    fn clear_dependencies(&self) {
        let dependencies = std::mem::take(&mut *self.inner.dependencies.borrow_mut());
        for observable in dependencies {
            observable.remove_dependent(self.inner.id);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl PartialEq for Computation {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Computation {}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.get())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
