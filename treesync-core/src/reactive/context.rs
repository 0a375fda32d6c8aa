//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when an observable is read,
//! the current computation is registered as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! Entering a computation pushes it; the returned guard pops it again when
//! dropped, so the stack stays balanced even if the body panics.
//!
//! An entry may also be empty: [`ReactiveContext::untracked`] pushes a
//! "no computation" frame so reads inside it establish no dependency.

use std::cell::RefCell;

use super::computation::Computation;
use super::SubscriberId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<Computation>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
}

impl ReactiveContext {
    /// Enter a tracking context for the given computation.
    ///
    /// While the guard is alive, observable reads register `computation`
    /// as a dependent.
    pub fn enter(computation: &Computation) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Some(computation.clone())));
        Self {
            subscriber_id: Some(computation.id()),
        }
    }

    /// Enter a frame in which reads are not tracked.
    fn enter_untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(None));
        Self {
            subscriber_id: None,
        }
    }

    /// Run `f` without tracking any reads it performs.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _guard = Self::enter_untracked();
        f()
    }

    /// Check if there is an active tracking context.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// Get the computation currently collecting dependencies, if any.
    pub fn current() -> Option<Computation> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        Self::current().map(|computation| computation.id())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.as_ref().map(|c| c.id()),
                    self.subscriber_id,
                    "ReactiveContext mismatch"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_computation() {
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        let computation = Computation::detached(|| {});
        {
            let _ctx = ReactiveContext::enter(&computation);
            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(computation.id()));
        }

        assert!(!ReactiveContext::is_active());
    }

    #[test]
    fn nested_contexts() {
        let outer = Computation::detached(|| {});
        let inner = Computation::detached(|| {});

        {
            let _ctx1 = ReactiveContext::enter(&outer);
            {
                let _ctx2 = ReactiveContext::enter(&inner);
                assert_eq!(ReactiveContext::current_subscriber(), Some(inner.id()));
            }
            assert_eq!(ReactiveContext::current_subscriber(), Some(outer.id()));
        }

        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn untracked_masks_current_computation() {
        let outer = Computation::detached(|| {});
        let _ctx = ReactiveContext::enter(&outer);

        let seen = ReactiveContext::untracked(ReactiveContext::current_subscriber);
        assert!(seen.is_none());
        assert_eq!(ReactiveContext::current_subscriber(), Some(outer.id()));
    }
}
