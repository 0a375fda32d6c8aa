//! Reactive Primitives
//!
//! This module implements the dependency-tracked computation layer that the
//! client tree and the binder are built on.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An [`Observable`] is anything a computation can depend on: map
//! properties, node lists and [`Signal`]s. Reading one inside a running
//! computation records a dependency; changing one invalidates its
//! dependents.
//!
//! ## Computations
//!
//! A [`Computation`] re-runs its body after any dependency changed. Re-runs
//! are deferred to the next [`flush`], and each computation runs at most once
//! per flush however many of its dependencies changed.
//!
//! ## Flush
//!
//! [`flush`] drains invalidated computations and flush listeners in FIFO
//! order, then post-flush listeners, iterating until everything settled.
//!
//! # Implementation Notes
//!
//! Tracking uses a thread-local context stack: when an observable is read we
//! check whether a computation is running and, if so, register it.

mod computation;
mod context;
mod observable;
mod runtime;
mod signal;
mod subscriber;

pub use computation::{run_when_dependencies_change, Computation};
pub use context::ReactiveContext;
pub use observable::Observable;
pub use runtime::{flush, Runtime};
pub use signal::Signal;
pub use subscriber::{Registration, SubscriberId};
