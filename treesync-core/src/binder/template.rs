//! Template instance bindings.
//!
//! A template instance node names the root of a registered template. The
//! template tree is expanded into UI nodes once; its dynamic parts read the
//! instance's model map (or, inside a repeat, the current item's model map)
//! through computations.
//!
//! Three parts are filled reactively:
//!
//! - override nodes, listed in the instance's `TemplateOverrides` map by
//!   template node id, are bound onto the element created for that id,
//! - a child slot shows the node stored in the instance's `Template.child`,
//! - a repeat regenerates its children once per item of the model list.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::dom::{DomId, Document};
use super::element::Slot;
use super::scope::Scope;
use super::{Binder, WeakBinder};
use crate::client::StateNode;
use crate::error::BindingError;
use crate::protocol::{keys, NodeFeature, Value};
use crate::reactive::{run_when_dependencies_change, ReactiveContext, Runtime};
use crate::template::{Binding, ElementTemplate, TemplateNode};

/// What bindings inside an expanded template read from.
#[derive(Clone)]
struct TemplateContext {
    /// The template instance node.
    instance: StateNode,
    /// Source of model bindings: the instance, or a repeat item.
    model: StateNode,
}

impl TemplateContext {
    fn is_repeat_item(&self) -> bool {
        self.instance != self.model
    }
}

fn root_id(node: &StateNode) -> Result<u32, BindingError> {
    node.peek_property(NodeFeature::Template, keys::ROOT)
        .as_ref()
        .and_then(Value::as_id)
        .ok_or(BindingError::UnknownNodeKind { id: node.id() })
}

/// Create the UI node for the root of the template `node` instantiates.
pub(crate) fn create_root(binder: &Binder, node: &StateNode) -> Result<DomId, BindingError> {
    let id = root_id(node)?;
    let template = binder.tree().template(id)?;
    match template {
        TemplateNode::Element(_) | TemplateNode::Text { .. } => {
            Ok(create_dom(binder.document(), &template))
        }
        TemplateNode::ChildSlot | TemplateNode::ForLoop { .. } => {
            Err(BindingError::InvalidTemplateRoot { id })
        }
    }
}

pub(crate) fn bind_root(
    binder: &Binder,
    node: &StateNode,
    dom: DomId,
    scope: &Scope,
) -> Result<(), BindingError> {
    let id = root_id(node)?;
    let template = binder.tree().template(id)?;
    let context = TemplateContext {
        instance: node.clone(),
        model: node.clone(),
    };
    bind_template_node(binder, &context, id, &template, dom, scope)
}

fn create_dom(document: &Document, template: &TemplateNode) -> DomId {
    match template {
        TemplateNode::Element(element) => document.create_element(&element.tag),
        TemplateNode::Text { .. } => document.create_text(""),
        TemplateNode::ChildSlot => document.create_comment("child-slot"),
        TemplateNode::ForLoop { .. } => document.create_comment("for"),
    }
}

/// Create and bind the UI node for template node `id`.
fn expand(
    binder: &Binder,
    context: &TemplateContext,
    id: u32,
    scope: &Scope,
) -> Result<DomId, BindingError> {
    let template = binder.tree().template(id)?;
    let dom = create_dom(binder.document(), &template);
    bind_template_node(binder, context, id, &template, dom, scope)?;
    Ok(dom)
}

fn bind_template_node(
    binder: &Binder,
    context: &TemplateContext,
    id: u32,
    template: &TemplateNode,
    dom: DomId,
    scope: &Scope,
) -> Result<(), BindingError> {
    match template {
        TemplateNode::Element(element) => bind_element(binder, context, id, element, dom, scope),
        TemplateNode::Text { text } => {
            let document = binder.document().clone();
            bind_value(context, text, scope, move |value| {
                let text = value.and_then(|value| value.to_text()).unwrap_or_default();
                if document.text(dom).as_deref() != Some(text.as_str()) {
                    document.set_text(dom, &text);
                }
            });
            Ok(())
        }
        TemplateNode::ChildSlot => {
            bind_child_slot(binder, context, dom, scope);
            Ok(())
        }
        TemplateNode::ForLoop { children } => {
            bind_for_loop(binder, context, children.clone(), dom, scope);
            Ok(())
        }
    }
}

/// Apply a binding once if static, or on every change of the model entry.
fn bind_value<F>(context: &TemplateContext, binding: &Binding, scope: &Scope, apply: F)
where
    F: Fn(Option<Value>) + 'static,
{
    match binding {
        Binding::Static(value) => apply(Some(Value::from(value.as_str()))),
        Binding::Model(key) => {
            let property = context.model.map(NodeFeature::TemplateModel).property(key);
            scope.add_computation(run_when_dependencies_change(move || {
                apply(property.value());
            }));
        }
    }
}

fn bind_element(
    binder: &Binder,
    context: &TemplateContext,
    id: u32,
    element: &ElementTemplate,
    dom: DomId,
    scope: &Scope,
) -> Result<(), BindingError> {
    let owner = context.instance.id();
    for (slot, bindings) in [
        (Slot::Property, &element.properties),
        (Slot::Attribute, &element.attributes),
    ] {
        for (name, binding) in bindings {
            let (document, weak, name) = (binder.document().clone(), binder.downgrade(), name.clone());
            bind_value(context, binding, scope, move |value| {
                if let Err(error) = slot.apply(&document, dom, owner, &name, value) {
                    report(&weak, error);
                }
            });
        }
    }

    for (name, binding) in &element.class_names {
        let (document, name) = (binder.document().clone(), name.clone());
        bind_value(context, binding, scope, move |value| {
            let on = value.as_ref().is_some_and(Value::is_truthy);
            if on && !document.has_class(dom, &name) {
                document.add_class(dom, &name);
            } else if !on && document.has_class(dom, &name) {
                document.remove_class(dom, &name);
            }
        });
    }

    for &child in &element.children {
        let child_dom = expand(binder, context, child, scope)?;
        binder.document().append_child(dom, child_dom);
    }

    if !context.is_repeat_item() {
        bind_override(binder, context, id, dom, scope);
    }
    Ok(())
}

/// Bind the override node registered for template node `id`, once it
/// appears.
fn bind_override(binder: &Binder, context: &TemplateContext, id: u32, dom: DomId, scope: &Scope) {
    let property = context
        .instance
        .map(NodeFeature::TemplateOverrides)
        .property(&id.to_string());
    let weak = binder.downgrade();
    scope.add_computation(run_when_dependencies_change(move || {
        let Some(override_id) = property.value().as_ref().and_then(Value::as_node) else {
            return;
        };
        let Some(binder) = weak.upgrade() else {
            return;
        };
        let Some(node) = binder.tree().node(override_id) else {
            return;
        };
        if binder.is_bound(&node) {
            return;
        }
        tracing::debug!(node = %override_id, template_node = id, "binding override");
        if let Err(error) = ReactiveContext::untracked(|| binder.bind(&node, dom)) {
            binder.report(error);
        }
    }));
}

fn bind_child_slot(binder: &Binder, context: &TemplateContext, anchor: DomId, scope: &Scope) {
    let property = context.instance.map(NodeFeature::Template).property(keys::CHILD);
    let placed: Rc<Cell<Option<DomId>>> = Rc::new(Cell::new(None));
    let (weak, weak_scope) = (binder.downgrade(), scope.downgrade());

    scope.add_computation(run_when_dependencies_change(move || {
        let child = property.value().as_ref().and_then(Value::as_node);
        let (weak, weak_scope, placed) = (weak.clone(), weak_scope.clone(), placed.clone());
        // The anchor is attached to its parent only after this binding
        // returns.
        Runtime::add_post_flush_listener(move || {
            let (Some(binder), Some(scope)) = (weak.upgrade(), weak_scope.upgrade()) else {
                return;
            };
            if scope.is_disposed() {
                return;
            }
            let document = binder.document();
            let Some(parent) = document.parent(anchor) else {
                return;
            };
            if let Some(previous) = placed.take() {
                document.remove_child(parent, previous);
            }
            let Some(node) = child.and_then(|id| binder.tree().node(id)) else {
                return;
            };
            match binder.create_and_bind(&node) {
                Ok(child_dom) => {
                    document.insert_before(parent, child_dom, document.next_sibling(anchor));
                    placed.set(Some(child_dom));
                }
                Err(error) => binder.report(error),
            }
        });
    }));
}

struct RepeatState {
    generated: RefCell<Vec<DomId>>,
    generation: RefCell<Option<Scope>>,
    pending: Cell<bool>,
}

fn bind_for_loop(
    binder: &Binder,
    context: &TemplateContext,
    children: Vec<u32>,
    anchor: DomId,
    scope: &Scope,
) {
    let items = context.model.list(NodeFeature::ModelList);
    let state = Rc::new(RepeatState {
        generated: RefCell::new(Vec::new()),
        generation: RefCell::new(None),
        pending: Cell::new(false),
    });
    let (weak, weak_scope, context, children) = (
        binder.downgrade(),
        scope.downgrade(),
        context.clone(),
        Rc::new(children),
    );

    scope.add_computation(run_when_dependencies_change(move || {
        let _ = items.values();
        if state.pending.replace(true) {
            return;
        }
        let (weak, weak_scope, context, children, state, items) = (
            weak.clone(),
            weak_scope.clone(),
            context.clone(),
            children.clone(),
            state.clone(),
            items.clone(),
        );
        Runtime::add_post_flush_listener(move || {
            state.pending.set(false);
            let (Some(binder), Some(scope)) = (weak.upgrade(), weak_scope.upgrade()) else {
                return;
            };
            if scope.is_disposed() {
                return;
            }
            regenerate(&binder, &scope, &context, &children, &state, &items.peek_values(), anchor);
        });
    }));
}

fn regenerate(
    binder: &Binder,
    scope: &Scope,
    context: &TemplateContext,
    children: &[u32],
    state: &RepeatState,
    items: &[Value],
    anchor: DomId,
) {
    let document = binder.document();
    let Some(parent) = document.parent(anchor) else {
        return;
    };

    for dom in state.generated.borrow_mut().drain(..) {
        document.remove_child(parent, dom);
    }
    if let Some(previous) = state.generation.borrow_mut().take() {
        previous.dispose();
    }

    let generation = scope.child();
    let reference = document.next_sibling(anchor);
    let mut generated = Vec::new();
    for item in items.iter().filter_map(Value::as_node) {
        let Some(model) = binder.tree().node(item) else {
            continue;
        };
        let item_context = TemplateContext {
            instance: context.instance.clone(),
            model,
        };
        for &child in children {
            match expand(binder, &item_context, child, &generation) {
                Ok(dom) => {
                    document.insert_before(parent, dom, reference);
                    generated.push(dom);
                }
                Err(error) => binder.report(error),
            }
        }
    }
    tracing::trace!(items = items.len(), nodes = generated.len(), "regenerated repeat");
    *state.generated.borrow_mut() = generated;
    *state.generation.borrow_mut() = Some(generation);
}

fn report(weak: &WeakBinder, error: BindingError) {
    if let Some(binder) = weak.upgrade() {
        binder.report(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StateTree;
    use crate::protocol::NodeId;
    use crate::reactive::flush;

    fn instance(tree: &StateTree, id: u32, root: u32) -> StateNode {
        let node = tree.ensure_node(NodeId::new(id));
        node.map(NodeFeature::Template)
            .property(keys::ROOT)
            .set_value(Value::from(root as i32));
        node
    }

    fn model(node: &StateNode, key: &str, value: &str) {
        node.map(NodeFeature::TemplateModel)
            .property(key)
            .set_value(Value::from(value));
    }

    fn mount(binder: &Binder, node: &StateNode) -> DomId {
        let dom = binder.create_and_bind(node).unwrap();
        binder.document().append_child(binder.document().body(), dom);
        flush();
        dom
    }

    #[test]
    fn model_bindings_follow_the_instance() {
        let tree = StateTree::new();
        tree.register_template(
            1,
            ElementTemplate::new("a")
                .attribute("href", Binding::model("link"))
                .class_name("active", Binding::model("selected"))
                .child(2)
                .build(),
        )
        .unwrap();
        tree.register_template(2, TemplateNode::text(Binding::model("label")))
            .unwrap();
        let binder = Binder::new(tree.clone(), Document::new());
        let node = instance(&tree, 2, 1);
        model(&node, "link", "/home");
        model(&node, "label", "Home");

        let dom = mount(&binder, &node);
        assert_eq!(
            binder.document().to_html(dom),
            "<a href=\"/home\">Home</a>"
        );

        node.map(NodeFeature::TemplateModel)
            .property("selected")
            .set_value(Value::from(true));
        model(&node, "label", "Start");
        flush();
        assert_eq!(
            binder.document().to_html(dom),
            "<a href=\"/home\" class=\"active\">Start</a>"
        );
    }

    #[test]
    fn slot_and_repeat_roots_are_rejected() {
        let tree = StateTree::new();
        tree.register_template(1, TemplateNode::ChildSlot).unwrap();
        let binder = Binder::new(tree.clone(), Document::new());
        let node = instance(&tree, 2, 1);

        assert_eq!(
            binder.create_and_bind(&node),
            Err(BindingError::InvalidTemplateRoot { id: 1 })
        );
    }

    #[test]
    fn malformed_root_id_is_unknown_kind() {
        let tree = StateTree::new();
        tree.register_template(1, TemplateNode::Text { text: Binding::fixed("x") })
            .unwrap();
        let binder = Binder::new(tree.clone(), Document::new());
        let node = tree.ensure_node(NodeId::new(2));
        node.map(NodeFeature::Template)
            .property(keys::ROOT)
            .set_value(Value::from(-1));

        assert_eq!(
            binder.create_and_bind(&node),
            Err(BindingError::UnknownNodeKind { id: node.id() })
        );
        assert!(!binder.is_bound(&node));
    }

    #[test]
    fn missing_template_is_a_protocol_error() {
        let tree = StateTree::new();
        let binder = Binder::new(tree.clone(), Document::new());
        let node = instance(&tree, 2, 7);

        assert!(matches!(
            binder.create_and_bind(&node),
            Err(BindingError::Protocol(_))
        ));
    }

    #[test]
    fn child_slot_shows_the_current_child() {
        let tree = StateTree::new();
        tree.register_template(
            1,
            ElementTemplate::new("section").child(2).child(3).build(),
        )
        .unwrap();
        tree.register_template(2, TemplateNode::ChildSlot).unwrap();
        tree.register_template(3, TemplateNode::text(Binding::fixed("!")))
            .unwrap();
        let binder = Binder::new(tree.clone(), Document::new());
        let node = instance(&tree, 2, 1);
        let dom = mount(&binder, &node);
        assert_eq!(binder.document().to_html(dom), "<section>!</section>");

        let first = tree.ensure_node(NodeId::new(3));
        first.map(NodeFeature::TextNode)
            .property(keys::TEXT)
            .set_value(Value::from("one"));
        let slot = node.map(NodeFeature::Template).property(keys::CHILD);
        slot.set_value(Value::Node(first.id()));
        flush();
        assert_eq!(binder.document().to_html(dom), "<section>one!</section>");

        let second = tree.ensure_node(NodeId::new(4));
        second
            .map(NodeFeature::TextNode)
            .property(keys::TEXT)
            .set_value(Value::from("two"));
        slot.set_value(Value::Node(second.id()));
        flush();
        assert_eq!(binder.document().to_html(dom), "<section>two!</section>");
    }

    #[test]
    fn repeat_regenerates_per_item() {
        let tree = StateTree::new();
        tree.register_template(1, ElementTemplate::new("ul").child(2).build())
            .unwrap();
        tree.register_template(2, TemplateNode::for_loop(vec![3]))
            .unwrap();
        tree.register_template(3, ElementTemplate::new("li").child(4).build())
            .unwrap();
        tree.register_template(4, TemplateNode::text(Binding::model("label")))
            .unwrap();
        let binder = Binder::new(tree.clone(), Document::new());
        let node = instance(&tree, 2, 1);
        let items = node.list(NodeFeature::ModelList);
        for (id, label) in [(10, "a"), (11, "b")] {
            let item = tree.ensure_node(NodeId::new(id));
            model(&item, "label", label);
            items.push(Value::Node(item.id()));
        }

        let dom = mount(&binder, &node);
        assert_eq!(
            binder.document().to_html(dom),
            "<ul><li>a</li><li>b</li></ul>"
        );

        items.remove(0).unwrap();
        let item = tree.ensure_node(NodeId::new(12));
        model(&item, "label", "c");
        items.push(Value::Node(item.id()));
        flush();
        assert_eq!(
            binder.document().to_html(dom),
            "<ul><li>b</li><li>c</li></ul>"
        );

        // Item model changes update in place.
        model(&item, "label", "d");
        flush();
        assert_eq!(binder.document().text_content(dom), "bd");
    }

    #[test]
    fn override_is_bound_when_it_arrives() {
        let tree = StateTree::new();
        tree.register_template(1, ElementTemplate::new("div").child(2).build())
            .unwrap();
        tree.register_template(2, ElementTemplate::new("button").build())
            .unwrap();
        let binder = Binder::new(tree.clone(), Document::new());
        let node = instance(&tree, 2, 1);
        let dom = mount(&binder, &node);

        let patch = tree.ensure_node(NodeId::new(5));
        patch
            .map(NodeFeature::OverrideData)
            .property(keys::TEMPLATE_NODE)
            .set_value(Value::from(2));
        patch
            .map(NodeFeature::ElementAttributes)
            .property("disabled")
            .set_value(Value::from(""));
        node.map(NodeFeature::TemplateOverrides)
            .property("2")
            .set_value(Value::Node(patch.id()));
        flush();

        assert!(binder.is_bound(&patch));
        assert_eq!(
            binder.document().to_html(dom),
            "<div><button disabled=\"\"></button></div>"
        );
    }
}
