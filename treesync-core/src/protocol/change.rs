//! Change records.
//!
//! A change record is the unit of wire transfer. Records for one flush cycle
//! are replayed strictly in order, so the sequence itself carries meaning:
//! an `attach` may be followed by the node's state, a `listInsert` may name a
//! node before any record populates it.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::codec::encode_with_type_info;
use super::node::{NodeFeature, NodeId};
use super::value::Value;
use crate::error::CodecError;

/// One replayable mutation.
///
/// Values are stored already encoded with type information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeChange {
    /// The node became part of the visible tree.
    Attach { node: NodeId },
    /// The node left the visible tree.
    Detach { node: NodeId },
    /// Set a map property.
    Put {
        node: NodeId,
        feat: NodeFeature,
        key: String,
        value: Json,
    },
    /// Remove a map property.
    Remove {
        node: NodeId,
        feat: NodeFeature,
        key: String,
    },
    /// Insert one entry into a list.
    ListInsert {
        node: NodeId,
        feat: NodeFeature,
        index: usize,
        value: Json,
    },
    /// Remove one entry from a list.
    ListRemove {
        node: NodeId,
        feat: NodeFeature,
        index: usize,
    },
    /// Remove every entry of a list.
    Clear { node: NodeId, feat: NodeFeature },
}

impl NodeChange {
    pub fn put(
        node: NodeId,
        feat: NodeFeature,
        key: impl Into<String>,
        value: &Value,
    ) -> Result<Self, CodecError> {
        Ok(NodeChange::Put {
            node,
            feat,
            key: key.into(),
            value: encode_with_type_info(value)?,
        })
    }

    pub fn list_insert(
        node: NodeId,
        feat: NodeFeature,
        index: usize,
        value: &Value,
    ) -> Result<Self, CodecError> {
        Ok(NodeChange::ListInsert {
            node,
            feat,
            index,
            value: encode_with_type_info(value)?,
        })
    }

    /// The node this record applies to.
    pub fn node(&self) -> NodeId {
        match self {
            NodeChange::Attach { node }
            | NodeChange::Detach { node }
            | NodeChange::Put { node, .. }
            | NodeChange::Remove { node, .. }
            | NodeChange::ListInsert { node, .. }
            | NodeChange::ListRemove { node, .. }
            | NodeChange::Clear { node, .. } => *node,
        }
    }

    /// The feature this record applies to, if any.
    pub fn feature(&self) -> Option<NodeFeature> {
        match self {
            NodeChange::Attach { .. } | NodeChange::Detach { .. } => None,
            NodeChange::Put { feat, .. }
            | NodeChange::Remove { feat, .. }
            | NodeChange::ListInsert { feat, .. }
            | NodeChange::ListRemove { feat, .. }
            | NodeChange::Clear { feat, .. } => Some(*feat),
        }
    }
}
