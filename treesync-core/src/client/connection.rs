//! Client facade.
//!
//! Ties the mirror tree, the message handler, the binder and the embedded
//! component tracker to one session. The transport is left to the caller:
//! feed received messages to [`Client::receive`], call [`Client::poll`] and
//! [`Client::heartbeat`] periodically, and send whatever
//! [`Client::take_outgoing`] returns.

use std::rc::Rc;
use std::time::Instant;

use super::loader::DependencyLoader;
use super::message_handler::MessageHandler;
use super::tree::StateTree;
use crate::binder::{Binder, Document, DomId, EmbeddedComponents};
use crate::config::SyncConfig;
use crate::error::{BindingError, CodecError, Result, SystemErrorHandler};
use crate::protocol::{ClientMessage, NodeId, ServerMessage};
use crate::reactive::flush;

pub struct Client {
    config: SyncConfig,
    tree: StateTree,
    handler: MessageHandler,
    binder: Option<Binder>,
    embedded: EmbeddedComponents,
    errors: Rc<SystemErrorHandler>,
    next_client_id: u64,
}

impl Client {
    pub fn new(config: SyncConfig) -> Self {
        let tree = StateTree::new();
        let errors = Rc::new(SystemErrorHandler::new());
        let handler = MessageHandler::new(tree.clone(), config.clone())
            .with_error_handler(errors.clone());
        let embedded = EmbeddedComponents::new(tree.clone(), config.disconnect_heartbeats);
        Self {
            config,
            tree,
            handler,
            binder: None,
            embedded,
            errors,
            next_client_id: 0,
        }
    }

    pub fn with_dependency_loader(mut self, loader: Box<dyn DependencyLoader>) -> Self {
        self.handler = self.handler.with_dependency_loader(loader);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn handler(&self) -> &MessageHandler {
        &self.handler
    }

    /// Errors reported by message handling and bindings.
    pub fn errors(&self) -> &SystemErrorHandler {
        &self.errors
    }

    pub fn binder(&self) -> Option<&Binder> {
        self.binder.as_ref()
    }

    /// Bind the root node to `container` in `document`.
    pub fn bind_root(&mut self, document: &Document, container: DomId) -> std::result::Result<(), BindingError> {
        let binder =
            Binder::with_error_handler(self.tree.clone(), document.clone(), self.errors.clone());
        binder.bind_root(container)?;
        self.binder = Some(binder);
        flush();
        Ok(())
    }

    /// Handle a decoded server message.
    pub fn receive(&mut self, message: ServerMessage, now: Instant) -> Result<()> {
        self.handler.handle_message(message, now)
    }

    /// Decode and handle a server message.
    pub fn receive_bytes(&mut self, bytes: &[u8], now: Instant) -> Result<()> {
        let message = ServerMessage::decode(bytes, self.config.wire_format)?;
        self.receive(message, now)
    }

    /// Check timeouts. Call periodically.
    pub fn poll(&mut self, now: Instant) -> Result<()> {
        Ok(self.handler.poll(now)?)
    }

    /// Continue after eager dependencies finished loading.
    pub fn dependencies_loaded(&mut self) -> Result<()> {
        self.handler.dependencies_loaded()
    }

    /// Track `node` as an embedded component.
    pub fn connect_embedded(&mut self, node: NodeId) {
        self.embedded.connect(node);
    }

    pub fn embedded(&mut self) -> &mut EmbeddedComponents {
        &mut self.embedded
    }

    /// Count a heartbeat for embedded components. Returns the components
    /// that timed out.
    pub fn heartbeat(&mut self) -> Vec<NodeId> {
        if let Some(binder) = &self.binder {
            self.embedded.observe(binder.document());
        }
        self.embedded.heartbeat()
    }

    /// The next message for the server, if anything is queued.
    pub fn take_outgoing(&mut self) -> Option<ClientMessage> {
        if !self.tree.has_outgoing() {
            return None;
        }
        let message = ClientMessage {
            client_id: self.next_client_id,
            resynchronize: self.tree.take_resync_request(),
            rpc: self.tree.take_outbox(),
        };
        self.next_client_id += 1;
        tracing::debug!(
            client_id = message.client_id,
            rpc = message.rpc.len(),
            resynchronize = message.resynchronize,
            "sending client message"
        );
        Some(message)
    }

    /// [`take_outgoing`](Self::take_outgoing), encoded in the configured wire
    /// format.
    pub fn take_outgoing_bytes(&mut self) -> std::result::Result<Option<Vec<u8>>, CodecError> {
        self.take_outgoing()
            .map(|message| message.encode(self.config.wire_format))
            .transpose()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tree", &self.tree)
            .field("bound", &self.binder.is_some())
            .field("next_client_id", &self.next_client_id)
            .finish()
    }
}
