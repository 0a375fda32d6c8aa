//! Binding strategy table.
//!
//! Node kinds form a closed set. Each kind knows whether it applies to a
//! state node, how to create a UI node for it and how to bind the two.
//! Dispatch scans [`BindingStrategy::ORDER`] and takes the first applicable
//! entry, so the order is the priority: an override node may also carry
//! element data but must be bound as an override.

use super::dom::DomId;
use super::scope::Scope;
use super::{element, template, text, Binder};
use crate::client::StateNode;
use crate::error::BindingError;
use crate::protocol::{keys, NodeFeature};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStrategy {
    /// Per-instance patch onto an element created by a template.
    Override,
    Text,
    /// Instance of a registered template.
    Template,
    Element,
}

impl BindingStrategy {
    pub const ORDER: [BindingStrategy; 4] = [
        BindingStrategy::Override,
        BindingStrategy::Text,
        BindingStrategy::Template,
        BindingStrategy::Element,
    ];

    /// The first strategy applicable to `node`.
    pub fn find(node: &StateNode) -> Option<Self> {
        Self::ORDER
            .into_iter()
            .find(|strategy| strategy.is_applicable(node))
    }

    pub fn is_applicable(self, node: &StateNode) -> bool {
        match self {
            BindingStrategy::Override => node.has_feature(NodeFeature::OverrideData),
            BindingStrategy::Text => node.has_feature(NodeFeature::TextNode),
            BindingStrategy::Template => node
                .peek_property(NodeFeature::Template, keys::ROOT)
                .is_some(),
            BindingStrategy::Element => node.has_feature(NodeFeature::ElementData),
        }
    }

    pub(crate) fn create(self, binder: &Binder, node: &StateNode) -> Result<DomId, BindingError> {
        match self {
            BindingStrategy::Override => {
                Err(BindingError::OverrideWithoutTemplate { id: node.id() })
            }
            BindingStrategy::Text => Ok(binder.document().create_text("")),
            BindingStrategy::Template => template::create_root(binder, node),
            BindingStrategy::Element => {
                let tag = node
                    .peek_property(NodeFeature::ElementData, keys::TAG)
                    .and_then(|tag| tag.as_str().map(str::to_string))
                    .ok_or(BindingError::MissingTag { id: node.id() })?;
                Ok(binder.document().create_element(&tag))
            }
        }
    }

    pub(crate) fn bind(
        self,
        binder: &Binder,
        node: &StateNode,
        dom: DomId,
        scope: &Scope,
    ) -> Result<(), BindingError> {
        match self {
            BindingStrategy::Override | BindingStrategy::Element => {
                element::bind(binder, node, dom, scope);
                Ok(())
            }
            BindingStrategy::Text => {
                text::bind(binder, node, dom, scope);
                Ok(())
            }
            BindingStrategy::Template => template::bind_root(binder, node, dom, scope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StateTree;
    use crate::protocol::{NodeId, Value};

    #[test]
    fn override_wins_over_element() {
        let tree = StateTree::new();
        let node = tree.ensure_node(NodeId::new(2));
        node.map(NodeFeature::ElementData)
            .property(keys::TAG)
            .set_value(Value::from("div"));
        assert_eq!(BindingStrategy::find(&node), Some(BindingStrategy::Element));

        node.map(NodeFeature::OverrideData)
            .property(keys::TEMPLATE_NODE)
            .set_value(Value::from(3));
        assert_eq!(BindingStrategy::find(&node), Some(BindingStrategy::Override));
    }

    #[test]
    fn template_needs_a_root() {
        let tree = StateTree::new();
        let node = tree.ensure_node(NodeId::new(2));
        node.map(NodeFeature::Template);
        assert_eq!(BindingStrategy::find(&node), None);

        node.map(NodeFeature::Template)
            .property(keys::ROOT)
            .set_value(Value::from(1));
        assert_eq!(BindingStrategy::find(&node), Some(BindingStrategy::Template));
    }
}
