//! Error types.
//!
//! Errors are grouped by how the session has to react to them:
//!
//! - [`ProtocolError`]: the replicas can no longer be trusted to agree. The
//!   only valid recoveries are a full resynchronization or terminating the
//!   session.
//! - [`BindingError`]: one binding could not be established or updated. It is
//!   reported to an [`ErrorHandler`] and the rest of the tree keeps working.
//! - [`CodecError`]: a value could not be encoded or decoded. Raised to the
//!   caller, never coerced.

use std::fmt;

use thiserror::Error;

use crate::protocol::{NodeFeature, NodeId, Value};
use crate::reactive::Signal;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// How a session recovers from an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Discard the mirror and rebuild it from a full snapshot.
    Resynchronize,
    /// Stop synchronizing this session.
    Terminate,
    /// Report and continue; the tree is not affected.
    Report,
}

impl Error {
    /// Decide how the session should recover from this error.
    pub fn recovery(&self) -> Recovery {
        match self {
            Error::Protocol(error) => error.recovery(),
            Error::Binding(_) | Error::Codec(_) => Recovery::Report,
        }
    }

    /// Check if this error breaks replica agreement.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

/// Violations of the synchronization protocol.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// A different node instance is already registered under this id.
    #[error("node {id} is already registered")]
    DuplicateNode { id: NodeId },

    /// A change referenced a node that does not exist.
    #[error("unknown node {id}")]
    UnknownNode { id: NodeId },

    /// An event handler referenced a constant that was never sent.
    #[error("constant {id} is missing from the constant pool")]
    MissingConstant { id: u32 },

    /// A constant id was sent twice.
    #[error("constant {id} is already registered")]
    DuplicateConstant { id: u32 },

    /// A template node id was referenced before being registered.
    #[error("template {id} is missing from the template registry")]
    MissingTemplate { id: u32 },

    /// A registry id that is not a non-negative integer.
    #[error("malformed registry id {value:?}")]
    MalformedId { value: Value },

    /// A template id was sent twice.
    #[error("template {id} is already registered")]
    DuplicateTemplate { id: u32 },

    /// A map operation targeted a list feature or vice versa.
    #[error("feature {feature:?} of node {node} is not a {expected}")]
    FeatureKindMismatch {
        node: NodeId,
        feature: NodeFeature,
        expected: &'static str,
    },

    /// A list operation used an index outside the list.
    #[error("index {index} out of bounds for feature {feature:?} of node {node} (length {len})")]
    IndexOutOfBounds {
        node: NodeId,
        feature: NodeFeature,
        index: usize,
        len: usize,
    },

    /// Server messages were lost and the gap did not close in time.
    #[error("expected sync id {expected} but only later messages arrived (first pending {received})")]
    SyncIdGap { expected: u64, received: u64 },

    /// Client messages were lost.
    #[error("expected client id {expected}, received {received}")]
    ClientIdGap { expected: u64, received: u64 },

    /// A node was attached to a second parent without leaving the first.
    #[error("node {node} already has parent {parent}")]
    AlreadyParented { node: NodeId, parent: NodeId },

    /// A node was attached below itself.
    #[error("node {node} is {parent} or one of its ancestors")]
    ParentCycle { node: NodeId, parent: NodeId },
}

impl ProtocolError {
    /// Decide how the session should recover from this error.
    pub fn recovery(&self) -> Recovery {
        match self {
            // Two instances claiming one id means the id scheme itself is
            // broken; a snapshot would be built on the same broken state.
            ProtocolError::DuplicateNode { .. } => Recovery::Terminate,
            _ => Recovery::Resynchronize,
        }
    }
}

/// Failures while binding state nodes to UI nodes.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BindingError {
    /// No binding strategy applies to the node.
    #[error("node {id} has no applicable binding strategy")]
    UnknownNodeKind { id: NodeId },

    /// The node is already bound to a UI node.
    #[error("node {id} is already bound")]
    AlreadyBound { id: NodeId },

    /// An element node has no tag to create an element from.
    #[error("node {id} has no tag")]
    MissingTag { id: NodeId },

    /// A value cannot be represented in the target slot.
    #[error("{target} `{name}` of node {node} cannot hold {found}")]
    PropertyTypeMismatch {
        node: NodeId,
        target: &'static str,
        name: String,
        found: &'static str,
    },

    /// An event data expression could not be parsed.
    #[error("invalid event data expression `{source_text}`: {reason}")]
    InvalidExpression { source_text: String, reason: String },

    /// Override nodes patch an existing template element and cannot be
    /// created on their own.
    #[error("override node {id} cannot be created outside a template")]
    OverrideWithoutTemplate { id: NodeId },

    /// A template root must be an element or a text node.
    #[error("template {id} cannot be used as a root")]
    InvalidTemplateRoot { id: u32 },

    /// A template referenced by a node is unknown.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Value encoding and decoding failures.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CodecError {
    /// Arrays and objects are rejected where a primitive is required.
    #[error("cannot decode JSON {kind} without type information")]
    UnsupportedJsonType { kind: &'static str },

    /// NaN and infinities have no JSON representation.
    #[error("cannot encode non-finite number {value}")]
    NonFiniteNumber { value: f64 },

    /// A typed array did not match any known type marker.
    #[error("malformed typed value: {reason}")]
    MalformedTypedValue { reason: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

impl CodecError {
    /// Check if this error came from the wire serializers.
    pub fn is_serialization_error(&self) -> bool {
        matches!(
            self,
            CodecError::Json(_) | CodecError::MsgPackEncode(_) | CodecError::MsgPackDecode(_)
        )
    }
}

/// Collaborator that receives errors which must not stop synchronization.
pub trait ErrorHandler {
    /// Report an error.
    fn handle_error(&self, error: &Error);
}

/// Error handler that logs and exposes a reactive "unrecoverable" state.
///
/// Protocol errors that end in [`Recovery::Terminate`] flip the
/// [`unrecoverable`](Self::unrecoverable) signal so a UI can show an error
/// overlay; everything else is only logged.
#[derive(Clone)]
pub struct SystemErrorHandler {
    unrecoverable: Signal<Option<String>>,
    reported: Signal<usize>,
}

impl SystemErrorHandler {
    pub fn new() -> Self {
        Self {
            unrecoverable: Signal::new(None),
            reported: Signal::new(0),
        }
    }

    /// Message of the error that made the session unrecoverable, if any.
    pub fn unrecoverable(&self) -> Signal<Option<String>> {
        self.unrecoverable.clone()
    }

    /// Number of errors reported so far. Tracked like any signal.
    pub fn reported_count(&self) -> usize {
        self.reported.get()
    }
}

impl Default for SystemErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler for SystemErrorHandler {
    fn handle_error(&self, error: &Error) {
        self.reported.update(|count| count + 1);
        match error.recovery() {
            Recovery::Terminate => {
                tracing::error!(%error, "unrecoverable synchronization error");
                self.unrecoverable.set(Some(error.to_string()));
            }
            Recovery::Resynchronize => tracing::warn!(%error, "synchronization error"),
            Recovery::Report => tracing::error!(%error, "binding error"),
        }
    }
}

impl fmt::Debug for SystemErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemErrorHandler")
            .field("unrecoverable", &self.unrecoverable.get_untracked())
            .field("reported", &self.reported.get_untracked())
            .finish()
    }
}
