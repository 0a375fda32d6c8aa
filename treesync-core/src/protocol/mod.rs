//! Synchronization Protocol
//!
//! Types shared by both replicas: node identity, feature kinds, values and
//! their codec, change records and the messages that carry them.
//!
//! # Message flow
//!
//! The server collects the net changes of one update cycle into a
//! [`ServerMessage`] stamped with a monotonic `syncId`. The client replays
//! the changes in order. In the other direction the client sends
//! [`ClientRpc`] invocations batched into a [`ClientMessage`] stamped with a
//! monotonic `clientId`.
//!
//! Both messages serialize to JSON or MessagePack, selected by
//! [`WireFormat`].

pub mod codec;

mod change;
mod message;
mod node;
mod value;

pub use change::NodeChange;
pub use message::{ClientMessage, ClientRpc, Dependencies, ServerMessage, WireFormat};
pub use node::{keys, FeatureKind, NodeFeature, NodeId};
pub use value::Value;
