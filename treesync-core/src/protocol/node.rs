//! Node identity and feature kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a state node, shared by both replicas.
///
/// Ids are assigned by the server, start at [`NodeId::ROOT`] and are never
/// reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// The root node of every tree.
    pub const ROOT: NodeId = NodeId(1);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Shape of a feature's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Map,
    List,
}

impl FeatureKind {
    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::Map => "map",
            FeatureKind::List => "list",
        }
    }
}

/// The typed slot groups a node can carry.
///
/// Sent on the wire as its small integer discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum NodeFeature {
    /// Element tag and other per-element metadata (`tag`).
    ElementData = 0,
    ElementProperties = 1,
    ElementAttributes = 2,
    /// Ordered element children.
    ElementChildren = 3,
    /// Event type to constant pool id of the event data expressions.
    ElementListeners = 4,
    ClassList = 5,
    /// Text content of a text node (`text`).
    TextNode = 6,
    /// Template root id (`root`) and child slot content (`child`).
    Template = 7,
    /// Template node id to override node.
    TemplateOverrides = 8,
    /// Model values consulted by template bindings.
    TemplateModel = 9,
    /// Items of a repeated template section.
    ModelList = 10,
    /// Children bound without being inserted into the parent.
    VirtualChildren = 11,
    ElementStyleProperties = 12,
    /// Property names the client pushes back to the server.
    SynchronizedProperties = 13,
    /// DOM events that trigger a property sync.
    SynchronizedPropertiesEvents = 14,
    /// Marks an override node and names its template node (`templateNode`).
    OverrideData = 15,
}

impl NodeFeature {
    pub const ALL: [NodeFeature; 16] = [
        NodeFeature::ElementData,
        NodeFeature::ElementProperties,
        NodeFeature::ElementAttributes,
        NodeFeature::ElementChildren,
        NodeFeature::ElementListeners,
        NodeFeature::ClassList,
        NodeFeature::TextNode,
        NodeFeature::Template,
        NodeFeature::TemplateOverrides,
        NodeFeature::TemplateModel,
        NodeFeature::ModelList,
        NodeFeature::VirtualChildren,
        NodeFeature::ElementStyleProperties,
        NodeFeature::SynchronizedProperties,
        NodeFeature::SynchronizedPropertiesEvents,
        NodeFeature::OverrideData,
    ];

    pub fn kind(self) -> FeatureKind {
        match self {
            NodeFeature::ElementChildren
            | NodeFeature::ClassList
            | NodeFeature::ModelList
            | NodeFeature::VirtualChildren
            | NodeFeature::SynchronizedProperties
            | NodeFeature::SynchronizedPropertiesEvents => FeatureKind::List,
            _ => FeatureKind::Map,
        }
    }

    pub fn is_list(self) -> bool {
        self.kind() == FeatureKind::List
    }

    pub fn is_map(self) -> bool {
        self.kind() == FeatureKind::Map
    }

    /// Whether list entries of this feature are child nodes whose parent is
    /// the owning node.
    pub fn holds_children(self) -> bool {
        matches!(
            self,
            NodeFeature::ElementChildren | NodeFeature::ModelList | NodeFeature::VirtualChildren
        )
    }
}

impl From<NodeFeature> for u8 {
    fn from(feature: NodeFeature) -> Self {
        feature as u8
    }
}

impl TryFrom<u8> for NodeFeature {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        NodeFeature::ALL
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| format!("unknown node feature {value}"))
    }
}

/// Well-known keys inside map features.
pub mod keys {
    /// `ElementData`: element tag name.
    pub const TAG: &str = "tag";
    /// `TextNode`: text content.
    pub const TEXT: &str = "text";
    /// `Template`: id of the template root node.
    pub const ROOT: &str = "root";
    /// `Template`: node filling the child slot.
    pub const CHILD: &str = "child";
    /// `OverrideData`: id of the overridden template node.
    pub const TEMPLATE_NODE: &str = "templateNode";
    /// `ElementData`: opaque application payload.
    pub const PAYLOAD: &str = "payload";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_discriminants_match_table_positions() {
        for (index, feature) in NodeFeature::ALL.iter().enumerate() {
            assert_eq!(u8::from(*feature) as usize, index);
            assert_eq!(NodeFeature::try_from(index as u8), Ok(*feature));
        }
        assert!(NodeFeature::try_from(16).is_err());
    }

    #[test]
    fn children_features_are_lists() {
        for feature in NodeFeature::ALL {
            if feature.holds_children() {
                assert!(feature.is_list());
            }
        }
        assert!(NodeFeature::ElementProperties.is_map());
    }

    #[test]
    fn feature_serializes_as_number() {
        let json = serde_json::to_string(&NodeFeature::ElementChildren).unwrap();
        assert_eq!(json, "3");
        let feature: NodeFeature = serde_json::from_str("11").unwrap();
        assert_eq!(feature, NodeFeature::VirtualChildren);
    }
}
