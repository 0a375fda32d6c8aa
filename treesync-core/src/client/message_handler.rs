//! Server message sequencing.
//!
//! The transport delivers whole messages but may delay or reorder them. The
//! handler restores order using the monotonic `syncId`:
//!
//! - an id that was already applied is ignored, making redelivery harmless
//! - an id ahead of the expected one is held back until the gap closes
//! - a gap still open after the suspend timeout drops the held messages and
//!   requests a resynchronization
//! - while a resynchronization is in flight only the snapshot is accepted

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

use super::loader::{load_before_apply, DependencyLoader, LoadStatus};
use super::processor::TreeChangeProcessor;
use super::tree::StateTree;
use crate::config::SyncConfig;
use crate::error::{Error, ErrorHandler, ProtocolError, Recovery, Result};
use crate::protocol::ServerMessage;
use crate::reactive::flush;

/// Applies server messages to a tree in `syncId` order.
pub struct MessageHandler {
    tree: StateTree,
    config: SyncConfig,
    last_seen_sync_id: Option<u64>,
    pending: BTreeMap<u64, ServerMessage>,
    suspended_since: Option<Instant>,
    resync_in_progress: bool,
    awaiting_dependencies: Option<ServerMessage>,
    loader: Option<Box<dyn DependencyLoader>>,
    error_handler: Option<Rc<dyn ErrorHandler>>,
}

impl MessageHandler {
    pub fn new(tree: StateTree, config: SyncConfig) -> Self {
        Self {
            tree,
            config,
            last_seen_sync_id: None,
            pending: BTreeMap::new(),
            suspended_since: None,
            resync_in_progress: false,
            awaiting_dependencies: None,
            loader: None,
            error_handler: None,
        }
    }

    pub fn with_dependency_loader(mut self, loader: Box<dyn DependencyLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_error_handler(mut self, handler: Rc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// Sync id of the last applied message.
    pub fn last_seen_sync_id(&self) -> Option<u64> {
        self.last_seen_sync_id
    }

    fn expected_sync_id(&self) -> u64 {
        self.last_seen_sync_id.map_or(0, |id| id + 1)
    }

    pub fn is_resync_in_progress(&self) -> bool {
        self.resync_in_progress
    }

    /// Whether messages are held back waiting for a missing sync id.
    pub fn is_suspended(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_waiting_for_dependencies(&self) -> bool {
        self.awaiting_dependencies.is_some()
    }

    /// Handle one server message received at `now`.
    ///
    /// Returns an error if applying a message failed. A resynchronization
    /// has already been requested when the error calls for one.
    pub fn handle_message(&mut self, message: ServerMessage, now: Instant) -> Result<()> {
        if message.resynchronize {
            return self.accept_snapshot(message);
        }

        if self.resync_in_progress {
            tracing::warn!(sync_id = message.sync_id, "dropping message while resynchronizing");
            return Ok(());
        }

        let expected = self.expected_sync_id();
        let blocked_id = self.awaiting_dependencies.as_ref().map(|m| m.sync_id);
        if message.sync_id < expected || blocked_id == Some(message.sync_id) {
            tracing::debug!(sync_id = message.sync_id, expected, "ignoring already seen message");
            return Ok(());
        }

        if message.sync_id > expected || self.awaiting_dependencies.is_some() {
            tracing::warn!(
                sync_id = message.sync_id,
                expected,
                "message arrived ahead of sequence; holding"
            );
            self.pending.entry(message.sync_id).or_insert(message);
            self.suspended_since.get_or_insert(now);
            return Ok(());
        }

        self.process(message)?;
        self.drain_pending()
    }

    /// Check the suspend timeout. Call periodically.
    ///
    /// When the gap has stayed open for too long the held messages are
    /// dropped, a resynchronization is requested and the gap is returned as
    /// an error.
    pub fn poll(&mut self, now: Instant) -> std::result::Result<(), ProtocolError> {
        let Some(since) = self.suspended_since else {
            return Ok(());
        };
        if self.awaiting_dependencies.is_some() || self.pending.is_empty() {
            return Ok(());
        }
        if now.duration_since(since) < self.config.suspend_timeout() {
            return Ok(());
        }

        let received = self.pending.keys().next().copied().unwrap_or_default();
        let error = ProtocolError::SyncIdGap {
            expected: self.expected_sync_id(),
            received,
        };
        tracing::warn!(%error, dropped = self.pending.len(), "gap not filled in time");
        self.pending.clear();
        self.suspended_since = None;
        self.request_resync();
        self.report(&Error::Protocol(error.clone()));
        Err(error)
    }

    /// Continue after eager dependencies finished loading.
    pub fn dependencies_loaded(&mut self) -> Result<()> {
        let Some(message) = self.awaiting_dependencies.take() else {
            return Ok(());
        };
        tracing::debug!(sync_id = message.sync_id, "dependencies loaded; resuming");
        self.apply(message)?;
        self.drain_pending()
    }

    /// Discard held messages and ask the server for a snapshot.
    pub fn request_resync(&mut self) {
        if self.resync_in_progress {
            return;
        }
        tracing::info!("requesting resynchronization");
        self.resync_in_progress = true;
        self.pending.clear();
        self.suspended_since = None;
        self.awaiting_dependencies = None;
        self.tree.request_resync();
    }

    fn accept_snapshot(&mut self, message: ServerMessage) -> Result<()> {
        tracing::info!(sync_id = message.sync_id, "applying resynchronization snapshot");
        self.resync_in_progress = false;
        self.pending.clear();
        self.suspended_since = None;
        self.awaiting_dependencies = None;
        self.process(message)?;
        self.drain_pending()
    }

    fn drain_pending(&mut self) -> Result<()> {
        while self.awaiting_dependencies.is_none() {
            let expected = self.expected_sync_id();
            // Anything below the expected id is a stale duplicate.
            self.pending = self.pending.split_off(&expected);
            let Some(message) = self.pending.remove(&expected) else {
                break;
            };
            self.process(message)?;
        }
        if self.pending.is_empty() {
            self.suspended_since = None;
        }
        Ok(())
    }

    fn process(&mut self, message: ServerMessage) -> Result<()> {
        if let Some(loader) = self.loader.as_mut() {
            if load_before_apply(loader.as_mut(), &message.dependencies) == LoadStatus::Pending {
                tracing::debug!(sync_id = message.sync_id, "waiting for eager dependencies");
                self.awaiting_dependencies = Some(message);
                return Ok(());
            }
        }
        self.apply(message)
    }

    fn apply(&mut self, message: ServerMessage) -> Result<()> {
        let outcome = self.apply_inner(&message);
        match &outcome {
            Ok(()) => {
                self.last_seen_sync_id = Some(message.sync_id);
                if let Some(loader) = self.loader.as_mut() {
                    if !message.dependencies.lazy.is_empty() {
                        loader.load_lazy(&message.dependencies.lazy);
                    }
                }
            }
            Err(error) => {
                tracing::error!(sync_id = message.sync_id, %error, "failed to apply message");
                self.report(error);
                if error.recovery() == Recovery::Resynchronize {
                    self.request_resync();
                }
            }
        }
        outcome
    }

    fn apply_inner(&self, message: &ServerMessage) -> Result<()> {
        if !message.resynchronize {
            self.register_tables(message)?;
            return TreeChangeProcessor::apply(&self.tree, &message.changes);
        }

        // The reset clears the registries, so it has to come first.
        self.tree.set_update_in_progress(true);
        self.tree.reset();
        let outcome = self
            .register_tables(message)
            .and_then(|()| TreeChangeProcessor::apply(&self.tree, &message.changes));
        self.tree.set_update_in_progress(false);
        flush();
        outcome
    }

    fn register_tables(&self, message: &ServerMessage) -> Result<()> {
        for (id, value) in &message.constants {
            self.tree.register_constant(*id, value.clone())?;
        }
        for (id, node) in &message.templates {
            self.tree.register_template(*id, node.clone())?;
        }
        Ok(())
    }

    fn report(&self, error: &Error) {
        if let Some(handler) = &self.error_handler {
            handler.handle_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::loader::ImmediateLoader;
    use crate::protocol::{NodeChange, NodeFeature, NodeId, Value};
    use std::cell::RefCell;
    use std::time::Duration;

    fn message(sync_id: u64, value: i32) -> ServerMessage {
        ServerMessage {
            sync_id,
            changes: vec![NodeChange::put(
                NodeId::ROOT,
                NodeFeature::ElementProperties,
                "counter",
                &Value::from(value),
            )
            .unwrap()],
            ..ServerMessage::default()
        }
    }

    fn counter(handler: &MessageHandler) -> Option<Value> {
        handler
            .tree()
            .root()
            .peek_property(NodeFeature::ElementProperties, "counter")
    }

    #[test]
    fn messages_apply_in_sequence() {
        let mut handler = MessageHandler::new(StateTree::new(), SyncConfig::default());
        let now = Instant::now();

        handler.handle_message(message(0, 10), now).unwrap();
        handler.handle_message(message(1, 11), now).unwrap();

        assert_eq!(handler.last_seen_sync_id(), Some(1));
        assert_eq!(counter(&handler), Some(Value::from(11)));
    }

    #[test]
    fn duplicate_message_is_ignored() {
        let mut handler = MessageHandler::new(StateTree::new(), SyncConfig::default());
        let now = Instant::now();

        handler.handle_message(message(0, 10), now).unwrap();
        handler.handle_message(message(1, 11), now).unwrap();
        handler.handle_message(message(1, 99), now).unwrap();

        assert_eq!(counter(&handler), Some(Value::from(11)));
    }

    #[test]
    fn out_of_order_message_waits_for_gap() {
        let mut handler = MessageHandler::new(StateTree::new(), SyncConfig::default());
        let now = Instant::now();

        handler.handle_message(message(0, 10), now).unwrap();
        handler.handle_message(message(2, 12), now).unwrap();
        assert!(handler.is_suspended());
        assert_eq!(counter(&handler), Some(Value::from(10)));

        handler.handle_message(message(1, 11), now).unwrap();
        assert!(!handler.is_suspended());
        assert_eq!(handler.last_seen_sync_id(), Some(2));
        assert_eq!(counter(&handler), Some(Value::from(12)));
    }

    #[test]
    fn gap_past_timeout_requests_resync() {
        let mut handler = MessageHandler::new(StateTree::new(), SyncConfig::default());
        let start = Instant::now();

        handler.handle_message(message(0, 0), start).unwrap();
        handler.handle_message(message(1, 1), start).unwrap();
        handler.handle_message(message(3, 3), start).unwrap();

        assert!(handler.poll(start + Duration::from_millis(4999)).is_ok());
        assert!(!handler.is_resync_in_progress());

        let error = handler.poll(start + Duration::from_millis(5000)).unwrap_err();
        assert_eq!(error, ProtocolError::SyncIdGap { expected: 2, received: 3 });
        assert!(handler.is_resync_in_progress());
        assert!(handler.tree().take_resync_request());
    }

    #[test]
    fn messages_are_dropped_during_resync() {
        let mut handler = MessageHandler::new(StateTree::new(), SyncConfig::default());
        let now = Instant::now();
        handler.handle_message(message(0, 0), now).unwrap();
        handler.request_resync();

        handler.handle_message(message(1, 1), now).unwrap();
        assert_eq!(counter(&handler), Some(Value::from(0)));

        let mut snapshot = message(7, 7);
        snapshot.resynchronize = true;
        handler.handle_message(snapshot, now).unwrap();

        assert!(!handler.is_resync_in_progress());
        assert_eq!(handler.last_seen_sync_id(), Some(7));
        assert_eq!(counter(&handler), Some(Value::from(7)));
    }

    #[test]
    fn failed_message_requests_resync() {
        let mut handler = MessageHandler::new(StateTree::new(), SyncConfig::default());
        let broken = ServerMessage {
            sync_id: 0,
            changes: vec![NodeChange::ListRemove {
                node: NodeId::ROOT,
                feat: NodeFeature::ElementChildren,
                index: 4,
            }],
            ..ServerMessage::default()
        };

        assert!(handler.handle_message(broken, Instant::now()).is_err());
        assert!(handler.is_resync_in_progress());
        assert_eq!(handler.last_seen_sync_id(), None);
    }

    struct DeferredLoader {
        requested: Rc<RefCell<Vec<String>>>,
    }

    impl DependencyLoader for DeferredLoader {
        fn load_eager(&mut self, urls: &[String]) -> LoadStatus {
            self.requested.borrow_mut().extend(urls.iter().cloned());
            LoadStatus::Pending
        }

        fn load_lazy(&mut self, urls: &[String]) {
            self.requested.borrow_mut().extend(urls.iter().cloned());
        }

        fn load_inline(&mut self, _contents: &[String]) {}
    }

    #[test]
    fn eager_dependencies_block_changes() {
        let requested = Rc::new(RefCell::new(Vec::new()));
        let mut handler = MessageHandler::new(StateTree::new(), SyncConfig::default())
            .with_dependency_loader(Box::new(DeferredLoader {
                requested: requested.clone(),
            }));
        let now = Instant::now();

        let mut first = message(0, 1);
        first.dependencies.eager.push("component.js".to_string());
        first.dependencies.lazy.push("extras.js".to_string());
        handler.handle_message(first, now).unwrap();
        handler.handle_message(message(1, 2), now).unwrap();

        assert!(handler.is_waiting_for_dependencies());
        assert_eq!(counter(&handler), None);
        assert_eq!(*requested.borrow(), vec!["component.js".to_string()]);

        handler.dependencies_loaded().unwrap();

        assert_eq!(counter(&handler), Some(Value::from(2)));
        assert_eq!(
            *requested.borrow(),
            vec!["component.js".to_string(), "extras.js".to_string()]
        );
    }

    #[test]
    fn immediate_loader_does_not_block() {
        let mut handler = MessageHandler::new(StateTree::new(), SyncConfig::default())
            .with_dependency_loader(Box::new(ImmediateLoader::new()));
        let mut first = message(0, 1);
        first.dependencies.eager.push("app.css".to_string());

        handler.handle_message(first, Instant::now()).unwrap();
        assert_eq!(counter(&handler), Some(Value::from(1)));
    }
}
