//! Sessions.
//!
//! A [`Session`] owns the UI state of one client behind a
//! `parking_lot::Mutex`. Application code mutates it through
//! [`Session::access`]; the transport turns accumulated changes into
//! messages with [`Session::flush`] and feeds client messages to
//! [`Session::handle_client_message`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::element::{ServerEvent, UiState};
use crate::config::SyncConfig;
use crate::error::{CodecError, ProtocolError};
use crate::protocol::{codec, ClientMessage, ClientRpc, NodeFeature, ServerMessage};

/// Identifies a session within a [`SessionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct SessionState {
    ui: UiState,
    next_sync_id: u64,
    last_client_id: Option<u64>,
}

impl SessionState {
    fn take_sync_id(&mut self) -> u64 {
        let id = self.next_sync_id;
        self.next_sync_id += 1;
        id
    }

    fn flush(&mut self) -> Result<Option<ServerMessage>, CodecError> {
        let changes = self.ui.tree.collect_changes()?;
        let constants = self.ui.constants.take_unsent();
        let templates = self.ui.templates.take_unsent();
        if changes.is_empty() && constants.is_empty() && templates.is_empty() {
            return Ok(None);
        }
        Ok(Some(ServerMessage {
            sync_id: self.take_sync_id(),
            changes,
            constants,
            templates,
            ..ServerMessage::default()
        }))
    }

    fn snapshot(&mut self) -> Result<ServerMessage, CodecError> {
        // Pending changes are part of the snapshot.
        self.ui.tree.collect_changes()?;
        Ok(ServerMessage {
            sync_id: self.take_sync_id(),
            resynchronize: true,
            changes: self.ui.tree.snapshot()?,
            constants: self.ui.constants.take_all(),
            templates: self.ui.templates.take_all(),
            ..ServerMessage::default()
        })
    }

    fn handle_rpc(&mut self, rpc: ClientRpc) -> Result<(), ProtocolError> {
        let node = rpc.node();
        if !self.ui.tree.contains(node) {
            return Err(ProtocolError::UnknownNode { id: node });
        }
        match rpc {
            ClientRpc::Event {
                node,
                event_type,
                event_data,
            } => {
                let event = ServerEvent {
                    node,
                    event_type,
                    data: event_data.unwrap_or_default(),
                };
                let handled = self.ui.dispatch_event(&event);
                if handled == 0 {
                    tracing::debug!(%node, event_type = %event.event_type, "event without listeners");
                }
            }
            ClientRpc::PropertySync {
                node,
                property,
                value,
            } => {
                if !self.ui.is_synchronized(node, &property) {
                    tracing::warn!(%node, property = %property, "rejecting sync of unlisted property");
                    return Ok(());
                }
                match codec::decode_without_type_info(&value) {
                    Ok(value) => {
                        if let Err(error) = self.ui.tree.put_from_client(
                            node,
                            NodeFeature::ElementProperties,
                            &property,
                            value,
                        ) {
                            tracing::warn!(%node, property = %property, %error, "property sync failed");
                        }
                    }
                    Err(error) => tracing::warn!(%node, property = %property, %error, "malformed property sync"),
                }
            }
            ClientRpc::Disconnected { node } => {
                let Some(parent) = self.ui.tree.parent(node) else {
                    return Ok(());
                };
                match self.ui.remove_virtual_child(parent, node) {
                    Ok(true) => tracing::debug!(%node, "removed disconnected embedded component"),
                    Ok(false) => {}
                    Err(error) => tracing::warn!(%node, %error, "failed to remove embedded component"),
                }
            }
        }
        Ok(())
    }
}

/// One client's UI state and sequencing.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    config: SyncConfig,
    state: Mutex<SessionState>,
    flush_requested: Notify,
}

impl Session {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            id: SessionId::new(),
            config,
            state: Mutex::new(SessionState {
                ui: UiState::new(),
                next_sync_id: 0,
                last_client_id: None,
            }),
            flush_requested: Notify::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run `f` with exclusive access to the UI state.
    pub fn access<R>(&self, f: impl FnOnce(&mut UiState) -> R) -> R {
        f(&mut self.state.lock().ui)
    }

    /// Ask the connected endpoint to flush. Used after changes made outside
    /// of client message handling.
    pub fn request_flush(&self) {
        self.flush_requested.notify_one();
    }

    pub(crate) async fn flush_requested(&self) {
        self.flush_requested.notified().await;
    }

    /// The changes accumulated since the previous flush, if any.
    pub fn flush(&self) -> Result<Option<ServerMessage>, CodecError> {
        let message = self.state.lock().flush()?;
        if let Some(message) = &message {
            tracing::debug!(
                session = %self.id,
                sync_id = message.sync_id,
                changes = message.changes.len(),
                "flushing session"
            );
        }
        Ok(message)
    }

    /// A full snapshot marked for resynchronization.
    pub fn snapshot(&self) -> Result<ServerMessage, CodecError> {
        self.state.lock().snapshot()
    }

    /// Apply a client message.
    ///
    /// Returns a resynchronization snapshot when the client asked for one or
    /// a `clientId` gap shows messages were lost. Otherwise the caller should
    /// [`flush`](Self::flush) to send the changes listeners made.
    pub fn handle_client_message(&self, message: ClientMessage) -> Result<Option<ServerMessage>, CodecError> {
        let mut state = self.state.lock();
        let expected = state.last_client_id.map_or(0, |id| id + 1);

        if message.client_id < expected {
            tracing::warn!(
                session = %self.id,
                client_id = message.client_id,
                expected,
                "ignoring duplicate client message"
            );
            return Ok(None);
        }
        state.last_client_id = Some(message.client_id);

        if message.client_id > expected {
            let error = ProtocolError::ClientIdGap {
                expected,
                received: message.client_id,
            };
            tracing::warn!(session = %self.id, %error, "resynchronizing client");
            return state.snapshot().map(Some);
        }
        if message.resynchronize {
            tracing::info!(session = %self.id, "client requested resynchronization");
            return state.snapshot().map(Some);
        }

        for rpc in message.rpc {
            if let Err(error) = state.handle_rpc(rpc) {
                tracing::warn!(session = %self.id, %error, "dropping client invocation");
            }
        }
        Ok(None)
    }
}

/// Live sessions by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a session.
    pub fn create(&self, config: SyncConfig) -> Arc<Session> {
        let session = Arc::new(Session::new(config));
        self.sessions.insert(session.id(), session.clone());
        tracing::debug!(session = %session.id(), "session created");
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{NodeChange, NodeId, Value};
    use serde_json::json;

    fn client_message(client_id: u64, rpc: Vec<ClientRpc>) -> ClientMessage {
        ClientMessage {
            client_id,
            resynchronize: false,
            rpc,
        }
    }

    #[test]
    fn sync_ids_start_at_zero_and_skip_empty_cycles() {
        let session = Session::new(SyncConfig::default());
        assert!(session.flush().unwrap().is_none());

        session.access(|ui| ui.set_property(ui.root(), "title", "a")).unwrap();
        assert_eq!(session.flush().unwrap().unwrap().sync_id, 0);
        assert!(session.flush().unwrap().is_none());

        session.access(|ui| ui.set_property(ui.root(), "title", "b")).unwrap();
        assert_eq!(session.flush().unwrap().unwrap().sync_id, 1);
    }

    #[test]
    fn event_listener_changes_are_flushed() {
        let session = Session::new(SyncConfig::default());
        let button = session
            .access(|ui| {
                let button = ui.create_element("button")?;
                ui.append_child(ui.root(), button)?;
                ui.add_event_listener(button, "click", &[], |ui, event| {
                    let _ = ui.add_class(event.node, "pressed");
                })?;
                Ok::<_, crate::Error>(button)
            })
            .unwrap();
        session.flush().unwrap();

        let reply = session
            .handle_client_message(client_message(
                0,
                vec![ClientRpc::Event {
                    node: button,
                    event_type: "click".to_string(),
                    event_data: None,
                }],
            ))
            .unwrap();
        assert!(reply.is_none());

        let message = session.flush().unwrap().unwrap();
        assert_eq!(message.sync_id, 1);
        assert!(message
            .changes
            .iter()
            .any(|change| matches!(change, NodeChange::ListInsert { node, .. } if *node == button)));
    }

    #[test]
    fn property_sync_is_applied_without_echo() {
        let session = Session::new(SyncConfig::default());
        let input = session
            .access(|ui| {
                let input = ui.create_element("input")?;
                ui.append_child(ui.root(), input)?;
                ui.synchronize_property(input, "value", "change")?;
                Ok::<_, crate::Error>(input)
            })
            .unwrap();
        session.flush().unwrap();

        session
            .handle_client_message(client_message(
                0,
                vec![
                    ClientRpc::PropertySync {
                        node: input,
                        property: "value".to_string(),
                        value: json!("typed"),
                    },
                    ClientRpc::PropertySync {
                        node: input,
                        property: "secret".to_string(),
                        value: json!("x"),
                    },
                ],
            ))
            .unwrap();

        session.access(|ui| {
            assert_eq!(ui.property(input, "value"), Some(&Value::from("typed")));
            assert_eq!(ui.property(input, "secret"), None);
        });
        assert!(session.flush().unwrap().is_none());
    }

    #[test]
    fn duplicate_client_message_is_ignored() {
        let session = Session::new(SyncConfig::default());
        let rpc = vec![ClientRpc::Disconnected { node: NodeId::ROOT }];
        assert!(session.handle_client_message(client_message(0, rpc.clone())).unwrap().is_none());
        assert!(session.handle_client_message(client_message(0, rpc)).unwrap().is_none());
    }

    #[test]
    fn client_id_gap_answers_with_snapshot() {
        let session = Session::new(SyncConfig::default());
        session.access(|ui| ui.add_class(ui.root(), "app")).unwrap();

        let reply = session
            .handle_client_message(client_message(2, Vec::new()))
            .unwrap()
            .unwrap();

        assert!(reply.resynchronize);
        assert_eq!(reply.sync_id, 0);
        assert_eq!(
            reply.changes,
            vec![NodeChange::list_insert(NodeId::ROOT, NodeFeature::ClassList, 0, &Value::from("app")).unwrap()]
        );
        // The snapshot consumed the pending change.
        assert!(session.flush().unwrap().is_none());
    }

    #[test]
    fn disconnected_component_leaves_virtual_children() {
        let session = Session::new(SyncConfig::default());
        let widget = session
            .access(|ui| {
                let widget = ui.create_element("x-widget")?;
                ui.add_virtual_child(ui.root(), widget)?;
                Ok::<_, crate::Error>(widget)
            })
            .unwrap();
        session.flush().unwrap();

        session
            .handle_client_message(client_message(0, vec![ClientRpc::Disconnected { node: widget }]))
            .unwrap();

        let message = session.flush().unwrap().unwrap();
        assert!(message.changes.contains(&NodeChange::Detach { node: widget }));
        session.access(|ui| {
            assert!(ui.tree().list(ui.root(), NodeFeature::VirtualChildren).is_empty());
        });
    }

    #[test]
    fn registry_tracks_sessions() {
        let registry = SessionRegistry::new();
        let session = registry.create(SyncConfig::default());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(session.id()).is_some());
        registry.remove(session.id());
        assert!(registry.is_empty());
    }
}
