//! Client Mirror
//!
//! The client-side replica of the state tree. Nodes carry typed features
//! (maps and lists) whose reads are tracked by the reactive runtime, so any
//! computation reading a property re-runs when a server message changes it.
//!
//! Messages are sequenced by [`MessageHandler`] and replayed by
//! [`TreeChangeProcessor`]; [`Client`] wires both to a binder and a
//! transport-agnostic outbox.

mod connection;
mod list;
mod loader;
mod map;
mod message_handler;
mod node;
mod processor;
mod tree;

pub use connection::Client;
pub use list::{ListSpliceEvent, NodeList};
pub use loader::{DependencyLoader, ImmediateLoader, LoadStatus};
pub use map::{MapProperty, MapPropertyChangeEvent, NodeMap};
pub use message_handler::MessageHandler;
pub use node::StateNode;
pub use processor::TreeChangeProcessor;
pub use tree::StateTree;
