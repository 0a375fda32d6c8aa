//! Treesync Core
//!
//! This crate keeps a client-side mirror of a server-owned UI state tree in
//! sync and binds that mirror to a document. It implements:
//!
//! - Reactive primitives (observables, computations, batched flush)
//! - The synchronization protocol and its JSON / MessagePack codec
//! - Write-once constant and template registries
//! - A server replica that records and collects changes per update cycle
//! - A client mirror that applies change batches in order
//! - An element binder that reconciles the mirror with a document
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Dependency tracking and the flush loop
//! - `protocol`: Node ids, features, values, changes and messages
//! - `registry`: Constant pool and template registry on both ends
//! - `server`: Authoritative tree, sessions and the transport task
//! - `client`: Mirror tree, change processor and message sequencing
//! - `binder`: Reconciliation of the mirror with a [`binder::Document`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Instant;
//!
//! use treesync_core::binder::Document;
//! use treesync_core::{Client, Session, SyncConfig};
//!
//! let session = Session::new(SyncConfig::default());
//! let mut client = Client::new(SyncConfig::default());
//!
//! let document = Document::new();
//! client.bind_root(&document, document.body())?;
//!
//! session.access(|ui| {
//!     let div = ui.create_element("div")?;
//!     ui.set_attribute(div, "id", "main")?;
//!     ui.append_child(ui.root(), div)
//! })?;
//!
//! if let Some(message) = session.flush()? {
//!     client.receive(message, Instant::now())?;
//! }
//! assert_eq!(document.to_html(document.body()), r#"<body><div id="main"></div></body>"#);
//! ```

pub mod binder;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod reactive;
pub mod registry;
pub mod server;
pub mod template;

pub use client::Client;
pub use config::SyncConfig;
pub use error::{BindingError, CodecError, Error, ProtocolError, Result};
pub use protocol::{ClientMessage, NodeChange, NodeFeature, NodeId, ServerMessage, Value, WireFormat};
pub use server::{Session, SessionEndpoint, SessionRegistry, UiState};
