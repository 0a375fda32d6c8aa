//! Signal Implementation
//!
//! A Signal is a standalone observable value. The state tree's map
//! properties and lists embed their own [`Observable`]; `Signal` is for
//! reactive state that lives outside the tree, such as the client's
//! unrecoverable-error flag.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a computation, the computation becomes a
//!    dependent.
//!
//! 2. When a signal's value is set, every dependent is invalidated and
//!    re-runs at the next flush.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use super::observable::Observable;

/// A reactive value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (invalidates dependents)
/// count.set(5);
/// ```
pub struct Signal<T>
where
    T: Clone + 'static,
{
    value: Rc<RefCell<T>>,
    observable: Observable,
}

impl<T> Signal<T>
where
    T: Clone + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            value: Rc::new(RefCell::new(value)),
            observable: Observable::new(),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.observable.id()
    }

    /// Get the current value, tracking it as a dependency.
    pub fn get(&self) -> T {
        self.observable.track();
        self.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.borrow().clone()
    }

    /// Set a new value and invalidate dependents.
    pub fn set(&self, value: T) {
        *self.value.borrow_mut() = value;
        self.observable.notify();
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = f(&self.value.borrow());
        self.set(new_value);
    }

    /// Number of computations depending on this signal.
    pub fn dependent_count(&self) -> usize {
        self.observable.dependent_count()
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            value: Rc::clone(&self.value),
            observable: self.observable.clone(),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
