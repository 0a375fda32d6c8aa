//! Element bindings.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use super::dom::{DomEvent, DomId, Document};
use super::scope::Scope;
use super::Binder;
use crate::client::{MapProperty, NodeList, StateNode};
use crate::error::{BindingError, ProtocolError};
use crate::protocol::{NodeFeature, NodeId, Value};
use crate::reactive::{run_when_dependencies_change, Registration, Runtime};

/// Where a map feature's values are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Property,
    Attribute,
    Style,
}

impl Slot {
    fn for_feature(feature: NodeFeature) -> Self {
        match feature {
            NodeFeature::ElementAttributes => Slot::Attribute,
            NodeFeature::ElementStyleProperties => Slot::Style,
            _ => Slot::Property,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Slot::Property => "property",
            Slot::Attribute => "attribute",
            Slot::Style => "style",
        }
    }

    /// Write `value` unless the UI node already holds it.
    pub(crate) fn apply(
        self,
        document: &Document,
        dom: DomId,
        owner: NodeId,
        name: &str,
        value: Option<Value>,
    ) -> Result<(), BindingError> {
        let mismatch = |value: &Value| BindingError::PropertyTypeMismatch {
            node: owner,
            target: self.name(),
            name: name.to_string(),
            found: value.type_name(),
        };

        match self {
            Slot::Property => match value {
                None => {
                    if document.property(dom, name).is_some() {
                        document.remove_property(dom, name);
                    }
                }
                Some(value @ Value::Node(_)) => return Err(mismatch(&value)),
                Some(value) => {
                    if document.property(dom, name).as_ref() != Some(&value) {
                        document.set_property(dom, name, value);
                    }
                }
            },
            Slot::Attribute | Slot::Style => {
                let text = match &value {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(value.to_text().ok_or_else(|| mismatch(value))?),
                };
                let current = match self {
                    Slot::Attribute => document.attribute(dom, name),
                    _ => document.style(dom, name),
                };
                if current == text {
                    return Ok(());
                }
                match (self, text) {
                    (Slot::Attribute, Some(text)) => document.set_attribute(dom, name, &text),
                    (Slot::Attribute, None) => document.remove_attribute(dom, name),
                    (_, Some(text)) => document.set_style(dom, name, &text),
                    (_, None) => document.remove_style(dom, name),
                }
            }
        }
        Ok(())
    }
}

/// Bind every element feature of `node` to `dom`.
pub(crate) fn bind(binder: &Binder, node: &StateNode, dom: DomId, scope: &Scope) {
    for feature in [
        NodeFeature::ElementProperties,
        NodeFeature::ElementAttributes,
        NodeFeature::ElementStyleProperties,
    ] {
        bind_map(binder, node, dom, scope, feature);
    }
    bind_class_list(binder, node, dom, scope);
    bind_synchronized_properties(binder, node, dom, scope);
    bind_listeners(binder, node, dom, scope);
    bind_children(binder, node, dom, scope);
    bind_virtual_children(binder, node, scope);
}

fn bind_map(binder: &Binder, node: &StateNode, dom: DomId, scope: &Scope, feature: NodeFeature) {
    let map = node.map(feature);
    let slot = Slot::for_feature(feature);
    for property in map.properties() {
        bind_property(binder, node.id(), dom, property, slot, scope);
    }

    let (weak, weak_scope, owner) = (binder.downgrade(), scope.downgrade(), node.id());
    scope.add_registration(map.add_property_add_listener(move |property| {
        if let (Some(binder), Some(scope)) = (weak.upgrade(), weak_scope.upgrade()) {
            bind_property(&binder, owner, dom, property.clone(), slot, &scope);
        }
    }));
}

fn bind_property(
    binder: &Binder,
    owner: NodeId,
    dom: DomId,
    property: MapProperty,
    slot: Slot,
    scope: &Scope,
) {
    let (document, weak) = (binder.document().clone(), binder.downgrade());
    scope.add_computation(run_when_dependencies_change(move || {
        let value = property.value();
        if let Err(error) = slot.apply(&document, dom, owner, property.name(), value) {
            if let Some(binder) = weak.upgrade() {
                binder.report(error);
            }
        }
    }));
}

fn bind_class_list(binder: &Binder, node: &StateNode, dom: DomId, scope: &Scope) {
    let document = binder.document().clone();
    let list = node.list(NodeFeature::ClassList);
    for name in list.peek_values() {
        if let Some(name) = name.as_str() {
            document.add_class(dom, name);
        }
    }

    scope.add_registration(list.add_splice_listener(move |event| {
        for name in event.removed.iter().filter_map(Value::as_str) {
            document.remove_class(dom, name);
        }
        for name in event.added.iter().filter_map(Value::as_str) {
            document.add_class(dom, name);
        }
    }));
}

/// Forward DOM events named in the listener map to the server.
fn bind_listeners(binder: &Binder, node: &StateNode, dom: DomId, scope: &Scope) {
    let map = node.map(NodeFeature::ElementListeners);
    for property in map.properties() {
        bind_listener(binder, node, dom, property, scope);
    }

    let (weak, weak_scope, node_clone) = (binder.downgrade(), scope.downgrade(), node.clone());
    scope.add_registration(map.add_property_add_listener(move |property| {
        if let (Some(binder), Some(scope)) = (weak.upgrade(), weak_scope.upgrade()) {
            bind_listener(&binder, &node_clone, dom, property.clone(), &scope);
        }
    }));
}

fn bind_listener(binder: &Binder, node: &StateNode, dom: DomId, property: MapProperty, scope: &Scope) {
    let registration: Rc<RefCell<Option<Registration>>> = Rc::new(RefCell::new(None));
    let (document, weak, node) = (binder.document().clone(), binder.downgrade(), node.clone());

    let state = registration.clone();
    scope.add_computation(run_when_dependencies_change(move || {
        let listening = property.has_value();
        let mut current = state.borrow_mut();
        if listening && current.is_none() {
            let event_type = property.name().to_string();
            let (weak, node, property) = (weak.clone(), node.clone(), property.clone());
            *current = Some(document.add_event_listener(dom, &event_type, move |event| {
                if let Some(binder) = weak.upgrade() {
                    handle_event(&binder, &node, dom, &property, event);
                }
            }));
        } else if !listening {
            if let Some(registration) = current.take() {
                registration.remove();
            }
        }
    }));

    scope.add_registration(Registration::new(move || {
        if let Some(registration) = registration.take() {
            registration.remove();
        }
    }));
}

fn handle_event(binder: &Binder, node: &StateNode, dom: DomId, property: &MapProperty, event: &DomEvent) {
    let data = match event_data(binder, dom, property.peek(), event) {
        Ok(data) => data,
        Err(error) => {
            binder.report(error);
            return;
        }
    };
    tracing::debug!(node = %node.id(), event_type = %event.event_type, "sending event");
    binder.tree().send_event(node, property.name(), data);
}

/// Evaluate the event data expressions stored in the constant pool.
fn event_data(
    binder: &Binder,
    dom: DomId,
    constant: Option<Value>,
    event: &DomEvent,
) -> crate::error::Result<Option<IndexMap<String, Json>>> {
    let Some(constant) = constant.filter(|value| value.as_f64().is_some()) else {
        return Ok(None);
    };
    let id = constant
        .as_id()
        .ok_or(ProtocolError::MalformedId { value: constant })?;
    let expressions = binder.tree().constant(id)?;
    let sources: Vec<&str> = expressions
        .as_array()
        .map(|items| items.iter().filter_map(Json::as_str).collect())
        .unwrap_or_default();
    if sources.is_empty() {
        return Ok(None);
    }

    let mut data = IndexMap::with_capacity(sources.len());
    for source in sources {
        let expression = binder.expression(source)?;
        data.insert(
            source.to_string(),
            expression.evaluate(event, binder.document(), dom),
        );
    }
    Ok(Some(data))
}

/// Push listed DOM properties to the tree when a listed event fires.
fn bind_synchronized_properties(binder: &Binder, node: &StateNode, dom: DomId, scope: &Scope) {
    let events = node.list(NodeFeature::SynchronizedPropertiesEvents);
    let properties = node.list(NodeFeature::SynchronizedProperties);
    let active: Rc<RefCell<Vec<Registration>>> = Rc::new(RefCell::new(Vec::new()));
    let (document, weak, node) = (binder.document().clone(), binder.downgrade(), node.clone());

    let state = active.clone();
    scope.add_computation(run_when_dependencies_change(move || {
        let event_types = events.values();
        for registration in state.borrow_mut().drain(..) {
            registration.remove();
        }
        for event_type in event_types.iter().filter_map(Value::as_str) {
            let (weak, node, properties) = (weak.clone(), node.clone(), properties.clone());
            let registration = document.add_event_listener(dom, event_type, move |_| {
                if let Some(binder) = weak.upgrade() {
                    sync_properties(&binder, &node, dom, &properties);
                }
            });
            state.borrow_mut().push(registration);
        }
    }));

    scope.add_registration(Registration::new(move || {
        for registration in active.borrow_mut().drain(..) {
            registration.remove();
        }
    }));
}

fn sync_properties(binder: &Binder, node: &StateNode, dom: DomId, properties: &NodeList) {
    for name in properties.peek_values() {
        let Some(name) = name.as_str() else {
            continue;
        };
        let current = binder.document().property(dom, name).unwrap_or(Value::Null);
        if node.peek_property(NodeFeature::ElementProperties, name).as_ref() == Some(&current) {
            continue;
        }
        if let Err(error) = binder.tree().send_property_sync(node, name, current) {
            binder.report(error);
        }
    }
}

fn bind_children(binder: &Binder, node: &StateNode, dom: DomId, scope: &Scope) {
    let list = node.list(NodeFeature::ElementChildren);
    for child in list.peek_values().iter().filter_map(Value::as_node) {
        let Some(child) = binder.tree().node(child) else {
            continue;
        };
        match binder.create_and_bind(&child) {
            Ok(child_dom) => binder.document().append_child(dom, child_dom),
            Err(error) => binder.report(error),
        }
    }

    let (weak, list_clone) = (binder.downgrade(), list.clone());
    scope.add_registration(list.add_splice_listener(move |event| {
        let Some(binder) = weak.upgrade() else {
            return;
        };
        // Removed children may be unregistered before the listener runs, so
        // their UI nodes are resolved now.
        let removed: Vec<DomId> = event
            .removed
            .iter()
            .filter_map(Value::as_node)
            .filter_map(|id| binder.tree().node(id))
            .filter_map(|child| child.dom_node())
            .collect();
        let added: Vec<NodeId> = event.added.iter().filter_map(Value::as_node).collect();

        let (weak, list) = (weak.clone(), list_clone.clone());
        Runtime::add_flush_listener(move || {
            let Some(binder) = weak.upgrade() else {
                return;
            };
            for child_dom in removed {
                binder.document().remove_child(dom, child_dom);
            }
            for child in added {
                insert_child(&binder, &list, dom, child);
            }
        });
    }));
}

/// Insert the UI node of `child` after the UI node of its closest bound
/// predecessor in `list`.
fn insert_child(binder: &Binder, list: &NodeList, parent: DomId, child: NodeId) {
    let Some(child_node) = binder.tree().node(child) else {
        return;
    };
    let values = list.peek_values();
    let Some(position) = values.iter().position(|value| value.as_node() == Some(child)) else {
        // Removed again later in the same batch.
        return;
    };

    let child_dom = match binder.create_and_bind(&child_node) {
        Ok(dom) => dom,
        Err(error) => {
            binder.report(error);
            return;
        }
    };

    let document = binder.document();
    let previous = values[..position]
        .iter()
        .rev()
        .filter_map(Value::as_node)
        .filter_map(|id| binder.tree().node(id))
        .filter_map(|sibling| sibling.dom_node())
        .find(|sibling| document.parent(*sibling) == Some(parent));
    let reference = match previous {
        Some(previous) => document.next_sibling(previous),
        None => document.first_child(parent),
    };
    document.insert_before(parent, child_dom, reference);
}

/// Bind virtual children without inserting them into `dom`.
fn bind_virtual_children(binder: &Binder, node: &StateNode, scope: &Scope) {
    let list = node.list(NodeFeature::VirtualChildren);
    for child in list.peek_values().iter().filter_map(Value::as_node) {
        bind_virtual_child(binder, child);
    }

    let weak = binder.downgrade();
    scope.add_registration(list.add_splice_listener(move |event| {
        let added: Vec<NodeId> = event.added.iter().filter_map(Value::as_node).collect();
        if added.is_empty() {
            return;
        }
        let weak = weak.clone();
        Runtime::add_flush_listener(move || {
            if let Some(binder) = weak.upgrade() {
                for child in added {
                    bind_virtual_child(&binder, child);
                }
            }
        });
    }));
}

fn bind_virtual_child(binder: &Binder, child: NodeId) {
    let Some(child) = binder.tree().node(child) else {
        return;
    };
    if let Err(error) = binder.create_and_bind(&child) {
        binder.report(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StateTree;
    use crate::protocol::keys;
    use crate::reactive::flush;
    use serde_json::json;

    fn element(tree: &StateTree, id: u32, tag: &str) -> StateNode {
        let node = tree.ensure_node(NodeId::new(id));
        node.map(NodeFeature::ElementData)
            .property(keys::TAG)
            .set_value(Value::from(tag));
        node
    }

    fn bound(tag: &str) -> (StateTree, Binder, StateNode, DomId) {
        let tree = StateTree::new();
        let binder = Binder::new(tree.clone(), Document::new());
        let node = element(&tree, 2, tag);
        let dom = binder.create_and_bind(&node).unwrap();
        (tree, binder, node, dom)
    }

    #[test]
    fn properties_attributes_and_styles() {
        let (_tree, binder, node, dom) = bound("input");
        let doc = binder.document();

        node.map(NodeFeature::ElementProperties)
            .property("value")
            .set_value(Value::from("hello"));
        node.map(NodeFeature::ElementAttributes)
            .property("placeholder")
            .set_value(Value::from("name"));
        node.map(NodeFeature::ElementStyleProperties)
            .property("color")
            .set_value(Value::from("red"));
        flush();

        assert_eq!(doc.property(dom, "value"), Some(Value::from("hello")));
        assert_eq!(doc.attribute(dom, "placeholder").as_deref(), Some("name"));
        assert_eq!(doc.style(dom, "color").as_deref(), Some("red"));

        node.map(NodeFeature::ElementAttributes)
            .property("placeholder")
            .remove_value();
        flush();
        assert_eq!(doc.attribute(dom, "placeholder"), None);
    }

    #[test]
    fn property_setter_skips_equal_values() {
        let (_tree, binder, node, dom) = bound("input");
        let doc = binder.document();
        doc.set_property(dom, "value", Value::from("typed"));
        let writes = doc.write_count();

        node.map(NodeFeature::ElementProperties)
            .property("value")
            .set_value(Value::from("typed"));
        flush();

        assert_eq!(doc.write_count(), writes);
    }

    #[test]
    fn class_list_follows_splices() {
        let (_tree, binder, node, dom) = bound("div");
        let classes = node.list(NodeFeature::ClassList);

        classes.push(Value::from("a"));
        classes.push(Value::from("b"));
        classes.remove(0).unwrap();

        assert_eq!(binder.document().class_list(dom), vec!["b".to_string()]);
    }

    #[test]
    fn listener_sends_event_with_data() {
        let (tree, binder, node, dom) = bound("button");
        tree.register_constant(1, json!(["event.button", "element.title"]))
            .unwrap();
        binder.document().set_property(dom, "title", Value::from("Save"));
        node.map(NodeFeature::ElementListeners)
            .property("click")
            .set_value(Value::from(1));
        flush();

        binder.document().dispatch_event(
            dom,
            &DomEvent::new("click").with_field("button", json!(0)),
        );

        let outbox = tree.take_outbox();
        let crate::protocol::ClientRpc::Event {
            event_type,
            event_data: Some(data),
            ..
        } = &outbox[0]
        else {
            panic!("expected event with data, got {outbox:?}");
        };
        assert_eq!(event_type, "click");
        assert_eq!(data["event.button"], json!(0));
        assert_eq!(data["element.title"], json!("Save"));
    }

    #[test]
    fn removed_listener_stops_forwarding() {
        let (tree, binder, node, dom) = bound("button");
        let click = node.map(NodeFeature::ElementListeners).property("click");
        click.set_value(Value::Null);
        flush();
        assert_eq!(binder.document().listener_count(dom, "click"), 1);

        click.remove_value();
        flush();
        binder.document().dispatch_event(dom, &DomEvent::new("click"));

        assert!(tree.take_outbox().is_empty());
    }

    #[test]
    fn missing_constant_is_reported() {
        let tree = StateTree::new();
        let handler = Rc::new(crate::error::SystemErrorHandler::new());
        let binder = Binder::with_error_handler(tree.clone(), Document::new(), handler.clone());
        let node = element(&tree, 2, "button");
        node.map(NodeFeature::ElementListeners)
            .property("click")
            .set_value(Value::from(9));
        let dom = binder.create_and_bind(&node).unwrap();

        binder.document().dispatch_event(dom, &DomEvent::new("click"));

        assert!(tree.take_outbox().is_empty());
        assert_eq!(handler.reported_count(), 1);
    }

    #[test]
    fn malformed_constant_id_is_reported() {
        let tree = StateTree::new();
        tree.register_constant(0, serde_json::json!(["event.type"])).unwrap();
        let handler = Rc::new(crate::error::SystemErrorHandler::new());
        let binder = Binder::with_error_handler(tree.clone(), Document::new(), handler.clone());
        let node = element(&tree, 2, "button");
        node.map(NodeFeature::ElementListeners)
            .property("click")
            .set_value(Value::from(-0.5));
        let dom = binder.create_and_bind(&node).unwrap();

        binder.document().dispatch_event(dom, &DomEvent::new("click"));

        assert!(tree.take_outbox().is_empty());
        assert_eq!(handler.reported_count(), 1);
    }

    #[test]
    fn synchronized_property_is_pushed_on_event() {
        let (tree, binder, node, dom) = bound("input");
        node.list(NodeFeature::SynchronizedProperties)
            .push(Value::from("value"));
        node.list(NodeFeature::SynchronizedPropertiesEvents)
            .push(Value::from("change"));
        flush();

        binder.document().set_property(dom, "value", Value::from("typed"));
        binder.document().dispatch_event(dom, &DomEvent::new("change"));

        assert_eq!(
            node.peek_property(NodeFeature::ElementProperties, "value"),
            Some(Value::from("typed"))
        );
        assert!(matches!(
            tree.take_outbox().as_slice(),
            [crate::protocol::ClientRpc::PropertySync { property, .. }] if property == "value"
        ));

        // Unchanged values are not sent again.
        binder.document().dispatch_event(dom, &DomEvent::new("change"));
        assert!(tree.take_outbox().is_empty());
    }

    #[test]
    fn node_reference_property_is_a_type_mismatch() {
        let tree = StateTree::new();
        let handler = Rc::new(crate::error::SystemErrorHandler::new());
        let binder = Binder::with_error_handler(tree.clone(), Document::new(), handler.clone());
        let node = element(&tree, 2, "div");
        let _dom = binder.create_and_bind(&node).unwrap();

        node.map(NodeFeature::ElementProperties)
            .property("model")
            .set_value(Value::Node(NodeId::new(9)));
        flush();

        assert_eq!(handler.reported_count(), 1);
    }

    #[test]
    fn children_keep_list_order() {
        let (tree, binder, node, dom) = bound("ul");
        let children = node.list(NodeFeature::ElementChildren);
        let items: Vec<StateNode> = (10..13).map(|id| element(&tree, id, "li")).collect();

        children.push(Value::Node(items[0].id()));
        children.push(Value::Node(items[2].id()));
        children.insert(1, Value::Node(items[1].id())).unwrap();
        flush();

        let doms: Vec<DomId> = items.iter().filter_map(StateNode::dom_node).collect();
        assert_eq!(binder.document().children(dom), doms);

        children.remove(0).unwrap();
        flush();
        assert_eq!(binder.document().children(dom), doms[1..].to_vec());
    }

    #[test]
    fn virtual_children_are_bound_not_inserted() {
        let (tree, binder, node, dom) = bound("div");
        let child = element(&tree, 5, "x-widget");

        node.list(NodeFeature::VirtualChildren)
            .push(Value::Node(child.id()));
        flush();

        assert!(binder.is_bound(&child));
        assert!(binder.document().children(dom).is_empty());
    }
}
