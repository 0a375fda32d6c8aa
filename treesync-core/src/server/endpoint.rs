//! Session transport task.
//!
//! [`SessionEndpoint::spawn`] runs one tokio task per connected client. The
//! task reads encoded client messages from an inbound channel, applies them
//! to the session and writes encoded server messages to an outbound channel.
//! Changes made by application code outside of client messages are pushed
//! when [`Session::request_flush`] is called.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::session::Session;
use crate::error::CodecError;
use crate::protocol::{ClientMessage, ServerMessage, WireFormat};

/// Channels and task of a running endpoint.
#[derive(Debug)]
pub struct EndpointHandle {
    /// Encoded client messages to the session.
    pub inbound: mpsc::Sender<Vec<u8>>,
    /// Encoded server messages for the client.
    pub outbound: mpsc::Receiver<Vec<u8>>,
    /// Finishes when the inbound channel closes or the outbound receiver is
    /// dropped.
    pub task: JoinHandle<Result<(), CodecError>>,
}

pub struct SessionEndpoint;

impl SessionEndpoint {
    /// Spawn the transport task for `session` on the current tokio runtime.
    pub fn spawn(session: Arc<Session>, capacity: usize) -> EndpointHandle {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run(session, inbound_rx, outbound_tx));
        EndpointHandle {
            inbound: inbound_tx,
            outbound: outbound_rx,
            task,
        }
    }
}

async fn run(
    session: Arc<Session>,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Vec<u8>>,
) -> Result<(), CodecError> {
    let format = session.config().wire_format;
    tracing::debug!(session = %session.id(), ?format, "endpoint started");

    if let Some(message) = session.flush()? {
        if !send(&outbound, &message, format).await? {
            return Ok(());
        }
    }

    loop {
        let reply = tokio::select! {
            received = inbound.recv() => {
                let Some(bytes) = received else {
                    break;
                };
                match ClientMessage::decode(&bytes, format) {
                    Ok(message) => match session.handle_client_message(message)? {
                        Some(snapshot) => Some(snapshot),
                        None => session.flush()?,
                    },
                    Err(error) => {
                        tracing::warn!(session = %session.id(), %error, "dropping undecodable client message");
                        None
                    }
                }
            }
            _ = session.flush_requested() => session.flush()?,
        };

        if let Some(message) = reply {
            if !send(&outbound, &message, format).await? {
                break;
            }
        }
    }

    tracing::debug!(session = %session.id(), "endpoint stopped");
    Ok(())
}

/// Encode and send `message`. Returns `false` once the receiver is gone.
async fn send(
    outbound: &mpsc::Sender<Vec<u8>>,
    message: &ServerMessage,
    format: WireFormat,
) -> Result<bool, CodecError> {
    let bytes = message.encode(format)?;
    Ok(outbound.send(bytes).await.is_ok())
}
