//! Wire messages.

use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as Json;

use super::change::NodeChange;
use super::node::NodeId;
use crate::error::CodecError;
use crate::template::TemplateNode;

/// Encoding used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl WireFormat {
    pub fn encode<T: Serialize>(self, message: &T) -> Result<Vec<u8>, CodecError> {
        Ok(match self {
            WireFormat::Json => serde_json::to_vec(message)?,
            WireFormat::MessagePack => rmp_serde::to_vec_named(message)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(match self {
            WireFormat::Json => serde_json::from_slice(bytes)?,
            WireFormat::MessagePack => rmp_serde::from_slice(bytes)?,
        })
    }
}

/// Resources the client must load before applying a message's changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dependencies {
    /// Loaded before the changes are applied.
    #[serde(rename = "EAGER", default, skip_serializing_if = "Vec::is_empty")]
    pub eager: Vec<String>,
    /// Loaded after the changes are applied, in the background.
    #[serde(rename = "LAZY", default, skip_serializing_if = "Vec::is_empty")]
    pub lazy: Vec<String>,
    /// Resource contents carried in the message itself.
    #[serde(rename = "INLINE", default, skip_serializing_if = "Vec::is_empty")]
    pub inline: Vec<String>,
}

impl Dependencies {
    pub fn is_empty(&self) -> bool {
        self.eager.is_empty() && self.lazy.is_empty() && self.inline.is_empty()
    }
}

/// Server to client message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub sync_id: u64,
    /// The changes rebuild the whole tree from empty.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resynchronize: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<NodeChange>,
    /// New constant pool entries.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub constants: IndexMap<u32, Json>,
    /// New template registry entries.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub templates: IndexMap<u32, TemplateNode>,
    #[serde(default, skip_serializing_if = "Dependencies::is_empty")]
    pub dependencies: Dependencies,
}

impl ServerMessage {
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>, CodecError> {
        format.encode(self)
    }

    pub fn decode(bytes: &[u8], format: WireFormat) -> Result<Self, CodecError> {
        format.decode(bytes)
    }
}

/// Client to server message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    pub client_id: u64,
    /// The client discarded its mirror and wants a full snapshot.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resynchronize: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rpc: Vec<ClientRpc>,
}

impl ClientMessage {
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>, CodecError> {
        format.encode(self)
    }

    pub fn decode(bytes: &[u8], format: WireFormat) -> Result<Self, CodecError> {
        format.decode(bytes)
    }
}

/// Invocation sent from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientRpc {
    /// A DOM event fired on a bound element.
    Event {
        node: NodeId,
        #[serde(rename = "eventType")]
        event_type: String,
        /// Values of the event data expressions, keyed by expression.
        #[serde(rename = "eventData", default, skip_serializing_if = "Option::is_none")]
        event_data: Option<IndexMap<String, Json>>,
    },
    /// A synchronized property changed on the client.
    PropertySync {
        node: NodeId,
        property: String,
        value: Json,
    },
    /// An embedded component stayed disconnected past its timeout.
    Disconnected { node: NodeId },
}

impl ClientRpc {
    pub fn node(&self) -> NodeId {
        match self {
            ClientRpc::Event { node, .. }
            | ClientRpc::PropertySync { node, .. }
            | ClientRpc::Disconnected { node } => *node,
        }
    }
}
