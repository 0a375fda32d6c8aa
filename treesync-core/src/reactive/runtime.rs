//! Reactive Runtime
//!
//! The runtime is the flush scheduler that connects observables and
//! computations. It owns the queue of invalidated computations and the
//! listener queues drained by [`Runtime::flush`].
//!
//! # How It Works
//!
//! 1. When an observable changes, each dependent computation invalidates
//!    itself and is appended to the job queue (once, however many of its
//!    dependencies changed).
//!
//! 2. Code that must run after the current batch of value updates (for
//!    example child insertion, which needs the child's own state applied
//!    first) is appended to the same queue as a flush listener.
//!
//! 3. `flush` drains the job queue in FIFO order. Jobs may enqueue more
//!    jobs; they are processed by the same loop rather than by recursion.
//!    Once the job queue is empty, one post-flush listener runs and the loop
//!    starts over. `flush` returns when both queues are empty.
//!
//! # Threading
//!
//! The client side is a single cooperative event loop, so the runtime is
//! thread-local: each thread gets its own queues and no locking is needed.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use super::computation::Computation;

type Callback = Box<dyn FnOnce()>;

enum Job {
    Recompute(Computation),
    Listener(Callback),
}

#[derive(Default)]
struct RuntimeState {
    jobs: VecDeque<Job>,
    post_flush: VecDeque<Callback>,
    flushing: bool,
    recomputes: u64,
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::default());
}

/// The thread-local reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Queue an invalidated computation.
    pub(crate) fn schedule(computation: Computation) {
        RUNTIME.with(|rt| rt.borrow_mut().jobs.push_back(Job::Recompute(computation)));
    }

    /// Queue a callback to run during the next flush, in order with
    /// computation re-runs.
    pub fn add_flush_listener<F>(listener: F)
    where
        F: FnOnce() + 'static,
    {
        RUNTIME.with(|rt| rt.borrow_mut().jobs.push_back(Job::Listener(Box::new(listener))));
    }

    /// Queue a callback to run once all computations have settled.
    pub fn add_post_flush_listener<F>(listener: F)
    where
        F: FnOnce() + 'static,
    {
        RUNTIME.with(|rt| rt.borrow_mut().post_flush.push_back(Box::new(listener)));
    }

    /// Whether anything is waiting for a flush.
    pub fn has_pending_work() -> bool {
        RUNTIME.with(|rt| {
            let rt = rt.borrow();
            !rt.jobs.is_empty() || !rt.post_flush.is_empty()
        })
    }

    /// Whether a flush is currently draining the queues.
    pub fn is_flushing() -> bool {
        RUNTIME.with(|rt| rt.borrow().flushing)
    }

    /// Number of computation re-runs performed by flushes on this thread.
    pub fn recompute_count() -> u64 {
        RUNTIME.with(|rt| rt.borrow().recomputes)
    }

    pub(crate) fn record_recompute() {
        RUNTIME.with(|rt| rt.borrow_mut().recomputes += 1);
    }

    /// Drain all pending work.
    ///
    /// A nested call made by a job while a flush is in progress returns
    /// immediately; the outer loop picks up whatever was queued.
    pub fn flush() {
        let already_flushing = RUNTIME.with(|rt| {
            let mut rt = rt.borrow_mut();
            std::mem::replace(&mut rt.flushing, true)
        });
        if already_flushing {
            return;
        }

        let mut jobs_run = 0usize;
        loop {
            let job = RUNTIME.with(|rt| rt.borrow_mut().jobs.pop_front());
            if let Some(job) = job {
                jobs_run += 1;
                match job {
                    Job::Recompute(computation) => computation.recompute(),
                    Job::Listener(listener) => run_isolated("flush listener", listener),
                }
                continue;
            }

            let post = RUNTIME.with(|rt| rt.borrow_mut().post_flush.pop_front());
            match post {
                Some(listener) => {
                    jobs_run += 1;
                    run_isolated("post-flush listener", listener);
                }
                None => break,
            }
        }

        RUNTIME.with(|rt| rt.borrow_mut().flushing = false);
        if jobs_run > 0 {
            tracing::trace!(jobs_run, "reactive flush complete");
        }
    }
}

fn run_isolated(kind: &'static str, listener: Callback) {
    if panic::catch_unwind(AssertUnwindSafe(listener)).is_err() {
        tracing::error!("{kind} failed; continuing flush");
    }
}

/// Drain all pending reactive work on this thread.
pub fn flush() {
    Runtime::flush();
}
