//! Server Replica
//!
//! The authoritative copy of the state tree. Application code mutates it
//! through the element helpers of [`UiState`]; every mutation is recorded in
//! a [`ChangeLog`] and collected once per update cycle into a
//! [`ServerMessage`](crate::protocol::ServerMessage).
//!
//! # Concurrency
//!
//! Each [`Session`] guards its state with a `parking_lot::Mutex`, so
//! application threads and the session's transport task can both reach it.
//! Sessions are looked up through a [`SessionRegistry`] backed by a
//! `DashMap`. A [`SessionEndpoint`] is the tokio task moving encoded
//! messages between a session and its client.

mod change_log;
mod element;
mod endpoint;
mod session;
mod tree;

pub use change_log::ChangeLog;
pub use element::{EventListener, ServerEvent, UiState};
pub use endpoint::{EndpointHandle, SessionEndpoint};
pub use session::{Session, SessionId, SessionRegistry};
pub use tree::StateTree;
