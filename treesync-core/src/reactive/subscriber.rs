//! Subscriber identity and listener registrations.
//!
//! Every computation gets a [`SubscriberId`] so observables can deduplicate
//! it in their dependent sets. Listener-style subscriptions (property change
//! listeners, list splice listeners, DOM listeners) hand back a
//! [`Registration`] that removes the listener again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber.
///
/// Ids are process-unique so two computations never compare equal, even
/// across trees living on different threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle returned when a listener is added.
///
/// Calling [`Registration::remove`] detaches the listener. Dropping the
/// handle without calling `remove` keeps the listener alive for as long as
/// its owner lives.
pub struct Registration {
    remove: Option<Box<dyn FnOnce()>>,
}

impl Registration {
    /// Create a registration that runs `remove` when removed.
    pub fn new<F>(remove: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// A registration with nothing to undo.
    pub fn noop() -> Self {
        Self { remove: None }
    }

    /// Combine several registrations into one.
    pub fn combine(registrations: Vec<Registration>) -> Self {
        Self::new(move || {
            for registration in registrations {
                registration.remove();
            }
        })
    }

    /// Remove the listener. Idempotent by construction: the handle is consumed.
    pub fn remove(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
