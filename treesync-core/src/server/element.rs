//! Element helper API.
//!
//! [`UiState`] is what application code mutates under the session lock: the
//! state tree plus the constant pool, the template catalog and the server
//! side event listeners. The helpers write the features the client binder
//! reads, so application code never deals with feature ids directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use super::tree::StateTree;
use crate::error::{ProtocolError, Result};
use crate::protocol::{keys, NodeFeature, NodeId, Value};
use crate::registry::{ConstantPoolWriter, TemplateCatalog};
use crate::template::TemplateNode;

/// An event received from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub node: NodeId,
    pub event_type: String,
    /// Event data expression results, keyed by expression.
    pub data: IndexMap<String, Json>,
}

pub type EventListener = Arc<dyn Fn(&mut UiState, &ServerEvent) + Send + Sync>;

#[derive(Default)]
pub struct UiState {
    pub(crate) tree: StateTree,
    pub(crate) constants: ConstantPoolWriter,
    pub(crate) templates: TemplateCatalog,
    listeners: HashMap<(NodeId, String), Vec<EventListener>>,
}

impl UiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut StateTree {
        &mut self.tree
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn create_element(&mut self, tag: &str) -> Result<NodeId> {
        let id = self.tree.create_node();
        self.tree.put(id, NodeFeature::ElementData, keys::TAG, tag)?;
        Ok(id)
    }

    pub fn create_text(&mut self, text: &str) -> Result<NodeId> {
        let id = self.tree.create_node();
        self.tree.put(id, NodeFeature::TextNode, keys::TEXT, text)?;
        Ok(id)
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) -> Result<()> {
        self.tree.put(node, NodeFeature::TextNode, keys::TEXT, text)?;
        Ok(())
    }

    pub fn set_property(&mut self, node: NodeId, name: &str, value: impl Into<Value>) -> Result<()> {
        self.tree.put(node, NodeFeature::ElementProperties, name, value)?;
        Ok(())
    }

    pub fn property(&self, node: NodeId, name: &str) -> Option<&Value> {
        self.tree.get(node, NodeFeature::ElementProperties, name)
    }

    pub fn remove_property(&mut self, node: NodeId, name: &str) -> Result<()> {
        self.tree.remove(node, NodeFeature::ElementProperties, name)?;
        Ok(())
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        self.tree.put(node, NodeFeature::ElementAttributes, name, value)?;
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<()> {
        self.tree.remove(node, NodeFeature::ElementAttributes, name)?;
        Ok(())
    }

    pub fn set_style(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        self.tree.put(node, NodeFeature::ElementStyleProperties, name, value)?;
        Ok(())
    }

    pub fn remove_style(&mut self, node: NodeId, name: &str) -> Result<()> {
        self.tree.remove(node, NodeFeature::ElementStyleProperties, name)?;
        Ok(())
    }

    pub fn add_class(&mut self, node: NodeId, name: &str) -> Result<()> {
        let present = self
            .tree
            .list(node, NodeFeature::ClassList)
            .iter()
            .any(|class| class.as_str() == Some(name));
        if !present {
            self.tree.list_push(node, NodeFeature::ClassList, name)?;
        }
        Ok(())
    }

    pub fn remove_class(&mut self, node: NodeId, name: &str) -> Result<()> {
        let index = self
            .tree
            .list(node, NodeFeature::ClassList)
            .iter()
            .position(|class| class.as_str() == Some(name));
        if let Some(index) = index {
            self.tree.list_remove(node, NodeFeature::ClassList, index)?;
        }
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.tree.list_push(parent, NodeFeature::ElementChildren, child)
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<()> {
        self.tree.list_insert(parent, NodeFeature::ElementChildren, index, child)
    }

    /// Remove `child` from the children of `parent`. Returns whether it was
    /// there.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<bool> {
        self.remove_from_list(parent, NodeFeature::ElementChildren, child)
    }

    pub fn children(&self, parent: NodeId) -> Vec<NodeId> {
        self.tree
            .list(parent, NodeFeature::ElementChildren)
            .iter()
            .filter_map(Value::as_node)
            .collect()
    }

    /// Attach `child` to `parent` without placing it in the parent's UI
    /// node. Used for embedded components.
    pub fn add_virtual_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.tree.list_push(parent, NodeFeature::VirtualChildren, child)
    }

    pub fn remove_virtual_child(&mut self, parent: NodeId, child: NodeId) -> Result<bool> {
        self.remove_from_list(parent, NodeFeature::VirtualChildren, child)
    }

    fn remove_from_list(&mut self, parent: NodeId, feature: NodeFeature, child: NodeId) -> Result<bool> {
        let index = self
            .tree
            .list(parent, feature)
            .iter()
            .position(|value| value.as_node() == Some(child));
        match index {
            Some(index) => {
                self.tree.list_remove(parent, feature, index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Listen to `event_type` on `node`. The client evaluates `data`
    /// expressions (`event.*`, `element.*`) and sends their results with the
    /// event.
    pub fn add_event_listener<F>(&mut self, node: NodeId, event_type: &str, data: &[&str], listener: F) -> Result<()>
    where
        F: Fn(&mut UiState, &ServerEvent) + Send + Sync + 'static,
    {
        let value = if data.is_empty() {
            Value::Null
        } else {
            let id = self.constants.get_or_register(Json::from(data.to_vec()));
            Value::from(f64::from(id))
        };
        self.tree.put(node, NodeFeature::ElementListeners, event_type, value)?;
        self.listeners
            .entry((node, event_type.to_string()))
            .or_default()
            .push(Arc::new(listener));
        Ok(())
    }

    pub fn remove_event_listeners(&mut self, node: NodeId, event_type: &str) -> Result<()> {
        self.listeners.remove(&(node, event_type.to_string()));
        self.tree.remove(node, NodeFeature::ElementListeners, event_type)?;
        Ok(())
    }

    /// Accept client updates of `property` whenever `event_type` fires.
    pub fn synchronize_property(&mut self, node: NodeId, property: &str, event_type: &str) -> Result<()> {
        for (feature, entry) in [
            (NodeFeature::SynchronizedProperties, property),
            (NodeFeature::SynchronizedPropertiesEvents, event_type),
        ] {
            let present = self
                .tree
                .list(node, feature)
                .iter()
                .any(|value| value.as_str() == Some(entry));
            if !present {
                self.tree.list_push(node, feature, entry)?;
            }
        }
        Ok(())
    }

    pub fn is_synchronized(&self, node: NodeId, property: &str) -> bool {
        self.tree
            .list(node, NodeFeature::SynchronizedProperties)
            .iter()
            .any(|value| value.as_str() == Some(property))
    }

    /// Register a template node. Ids are shipped with the next flush.
    pub fn register_template(&mut self, node: TemplateNode) -> u32 {
        self.templates.register(node)
    }

    /// Create an instance of the template rooted at `root`.
    pub fn create_template_instance(&mut self, root: u32) -> Result<NodeId> {
        if self.templates.get(root).is_none() {
            return Err(ProtocolError::MissingTemplate { id: root }.into());
        }
        let id = self.tree.create_node();
        self.tree.put(id, NodeFeature::Template, keys::ROOT, f64::from(root))?;
        Ok(id)
    }

    pub fn set_model(&mut self, instance: NodeId, key: &str, value: impl Into<Value>) -> Result<()> {
        self.tree.put(instance, NodeFeature::TemplateModel, key, value)?;
        Ok(())
    }

    pub fn push_model_item(&mut self, owner: NodeId, item: NodeId) -> Result<()> {
        self.tree.list_push(owner, NodeFeature::ModelList, item)
    }

    pub fn remove_model_item(&mut self, owner: NodeId, item: NodeId) -> Result<bool> {
        self.remove_from_list(owner, NodeFeature::ModelList, item)
    }

    /// Create a node usable as a repeat item model.
    pub fn create_model(&mut self) -> NodeId {
        self.tree.create_node()
    }

    /// Fill the child slot of `instance`.
    pub fn set_slot_child(&mut self, instance: NodeId, child: Option<NodeId>) -> Result<()> {
        match child {
            Some(child) => {
                self.tree.put(instance, NodeFeature::Template, keys::CHILD, child)?;
            }
            None => {
                self.tree.remove(instance, NodeFeature::Template, keys::CHILD)?;
            }
        }
        Ok(())
    }

    /// The override node patching template node `template_node` in
    /// `instance`, created on first use.
    pub fn template_override(&mut self, instance: NodeId, template_node: u32) -> Result<NodeId> {
        let key = template_node.to_string();
        if let Some(existing) = self
            .tree
            .get(instance, NodeFeature::TemplateOverrides, &key)
            .and_then(Value::as_node)
        {
            return Ok(existing);
        }
        let id = self.tree.create_node();
        self.tree.put(id, NodeFeature::OverrideData, keys::TEMPLATE_NODE, f64::from(template_node))?;
        self.tree.put(instance, NodeFeature::TemplateOverrides, &key, id)?;
        Ok(id)
    }

    /// Run the listeners registered for the event.
    pub(crate) fn dispatch_event(&mut self, event: &ServerEvent) -> usize {
        let listeners = self
            .listeners
            .get(&(event.node, event.event_type.clone()))
            .cloned()
            .unwrap_or_default();
        for listener in &listeners {
            listener(self, event);
        }
        listeners.len()
    }
}

impl fmt::Debug for UiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiState")
            .field("nodes", &self.tree.node_count())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NodeChange;
    use crate::template::{Binding, ElementTemplate};
    use serde_json::json;

    #[test]
    fn listener_expressions_go_to_the_constant_pool() {
        let mut ui = UiState::new();
        let button = ui.create_element("button").unwrap();
        ui.add_event_listener(button, "click", &["event.button"], |_, _| {})
            .unwrap();
        ui.add_event_listener(button, "dblclick", &["event.button"], |_, _| {})
            .unwrap();

        assert_eq!(
            ui.tree().get(button, NodeFeature::ElementListeners, "click"),
            Some(&Value::from(1))
        );
        assert_eq!(
            ui.tree().get(button, NodeFeature::ElementListeners, "dblclick"),
            Some(&Value::from(1))
        );
        assert_eq!(ui.constants.take_unsent()[&1], json!(["event.button"]));
    }

    #[test]
    fn dispatch_runs_listeners_with_state() {
        let mut ui = UiState::new();
        let button = ui.create_element("button").unwrap();
        ui.append_child(ui.root(), button).unwrap();
        ui.add_event_listener(button, "click", &[], move |ui, event| {
            ui.set_property(event.node, "pressed", true).unwrap();
        })
        .unwrap();

        let handled = ui.dispatch_event(&ServerEvent {
            node: button,
            event_type: "click".to_string(),
            data: IndexMap::new(),
        });

        assert_eq!(handled, 1);
        assert_eq!(ui.property(button, "pressed"), Some(&Value::Bool(true)));
    }

    #[test]
    fn classes_are_unique() {
        let mut ui = UiState::new();
        let root = ui.root();
        ui.add_class(root, "a").unwrap();
        ui.add_class(root, "a").unwrap();
        ui.remove_class(root, "missing").unwrap();

        assert_eq!(ui.tree().list(root, NodeFeature::ClassList), &[Value::from("a")]);
    }

    #[test]
    fn override_is_created_once() {
        let mut ui = UiState::new();
        let root_template = ui.register_template(ElementTemplate::new("div").build());
        let instance = ui.create_template_instance(root_template).unwrap();

        let first = ui.template_override(instance, root_template).unwrap();
        let second = ui.template_override(instance, root_template).unwrap();

        assert_eq!(first, second);
        assert_eq!(ui.tree().parent(first), Some(instance));
    }

    #[test]
    fn unknown_template_is_rejected() {
        let mut ui = UiState::new();
        assert!(ui.create_template_instance(4).is_err());
        let text = ui.register_template(TemplateNode::text(Binding::model("x")));
        assert!(ui.create_template_instance(text).is_ok());
    }

    #[test]
    fn synchronized_property_lists_both_entries() {
        let mut ui = UiState::new();
        let input = ui.create_element("input").unwrap();
        ui.append_child(ui.root(), input).unwrap();
        ui.synchronize_property(input, "value", "change").unwrap();
        ui.synchronize_property(input, "value", "change").unwrap();

        assert!(ui.is_synchronized(input, "value"));
        let changes = ui.tree_mut().collect_changes().unwrap();
        let inserts = changes
            .iter()
            .filter(|change| matches!(change, NodeChange::ListInsert { node, .. } if *node == input))
            .count();
        assert_eq!(inserts, 2);
    }
}
