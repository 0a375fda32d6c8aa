//! Template definitions.
//!
//! A template is a tree of [`TemplateNode`]s shared by every instance that
//! uses it. Nodes reference their children by template id; the client
//! resolves those ids through its template registry. Dynamic parts are
//! expressed as [`Binding`]s that resolve against the instance's model map.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A value slot in a template: a constant or a model lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Binding {
    /// A constant string.
    Static(String),
    /// The named entry of the instance's model map.
    Model(String),
}

impl Binding {
    pub fn fixed(value: impl Into<String>) -> Self {
        Binding::Static(value.into())
    }

    pub fn model(key: impl Into<String>) -> Self {
        Binding::Model(key.into())
    }
}

/// One node of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TemplateNode {
    Element(ElementTemplate),
    Text {
        text: Binding,
    },
    /// Placeholder filled by the instance's `child` node.
    ChildSlot,
    /// Repeats `children` once per item of the instance's model list.
    ForLoop {
        children: Vec<u32>,
    },
}

impl TemplateNode {
    pub fn text(text: Binding) -> Self {
        TemplateNode::Text { text }
    }

    pub fn for_loop(children: Vec<u32>) -> Self {
        TemplateNode::ForLoop { children }
    }

    pub fn is_element(&self) -> bool {
        matches!(self, TemplateNode::Element(_))
    }
}

/// An element in a template, built once when the template is defined.
///
/// ```rust,ignore
/// let button = ElementTemplate::new("button")
///     .attribute("type", Binding::fixed("submit"))
///     .property("disabled", Binding::model("busy"))
///     .child(label_id)
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementTemplate {
    pub tag: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Binding>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, Binding>,
    /// Class name to a binding toggling it on when truthy.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub class_names: IndexMap<String, Binding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<u32>,
}

impl ElementTemplate {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn property(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.properties.insert(name.into(), binding);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.attributes.insert(name.into(), binding);
        self
    }

    pub fn class_name(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.class_names.insert(name.into(), binding);
        self
    }

    pub fn child(mut self, template_id: u32) -> Self {
        self.children.push(template_id);
        self
    }

    pub fn build(self) -> TemplateNode {
        TemplateNode::Element(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binding_wire_shape() {
        assert_eq!(
            serde_json::to_value(Binding::model("name")).unwrap(),
            json!({ "type": "model", "value": "name" })
        );
    }

    #[test]
    fn builder_collects_bindings() {
        let node = ElementTemplate::new("div")
            .attribute("id", Binding::fixed("main"))
            .class_name("active", Binding::model("selected"))
            .child(4)
            .build();

        let TemplateNode::Element(element) = &node else {
            panic!("expected element");
        };
        assert_eq!(element.children, vec![4]);
        assert_eq!(element.attributes["id"], Binding::fixed("main"));

        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "element");
        let decoded: TemplateNode = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, node);
    }
}
