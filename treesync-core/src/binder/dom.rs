//! Headless document.
//!
//! A minimal arena-backed DOM: elements, text and comment nodes, with
//! properties, attributes, class lists, inline styles and event listeners.
//! Nodes are addressed by [`DomId`] and never freed, so an id stays valid
//! after the node leaves the tree.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Write as _};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value as Json;

use crate::protocol::Value;
use crate::reactive::Registration;

/// Handle to a node of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomId(usize);

/// An event dispatched to a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DomEvent {
    pub event_type: String,
    /// Event fields, reachable from data expressions as `event.<field>`.
    pub fields: IndexMap<String, Json>,
}

impl DomEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Json) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

type Listener = Rc<dyn Fn(&DomEvent)>;

#[derive(Default)]
struct ElementData {
    tag: String,
    properties: IndexMap<String, Value>,
    attributes: IndexMap<String, String>,
    class_list: IndexSet<String>,
    styles: IndexMap<String, String>,
}

enum Kind {
    Element(ElementData),
    Text(String),
    Comment(String),
}

struct DomNode {
    kind: Kind,
    parent: Option<DomId>,
    children: Vec<DomId>,
    listeners: IndexMap<String, IndexMap<u64, Listener>>,
}

struct DocumentInner {
    nodes: RefCell<Vec<DomNode>>,
    body: DomId,
    next_listener: Cell<u64>,
    writes: Cell<u64>,
}

/// A headless document. Clones share the document.
#[derive(Clone)]
pub struct Document {
    inner: Rc<DocumentInner>,
}

impl Document {
    /// Create a document with an empty `body`.
    pub fn new() -> Self {
        let body = DomNode {
            kind: Kind::Element(ElementData {
                tag: "body".to_string(),
                ..ElementData::default()
            }),
            parent: None,
            children: Vec::new(),
            listeners: IndexMap::new(),
        };
        Self {
            inner: Rc::new(DocumentInner {
                nodes: RefCell::new(vec![body]),
                body: DomId(0),
                next_listener: Cell::new(0),
                writes: Cell::new(0),
            }),
        }
    }

    pub fn body(&self) -> DomId {
        self.inner.body
    }

    fn create(&self, kind: Kind) -> DomId {
        let mut nodes = self.inner.nodes.borrow_mut();
        nodes.push(DomNode {
            kind,
            parent: None,
            children: Vec::new(),
            listeners: IndexMap::new(),
        });
        DomId(nodes.len() - 1)
    }

    pub fn create_element(&self, tag: &str) -> DomId {
        self.create(Kind::Element(ElementData {
            tag: tag.to_string(),
            ..ElementData::default()
        }))
    }

    pub fn create_text(&self, text: &str) -> DomId {
        self.create(Kind::Text(text.to_string()))
    }

    pub fn create_comment(&self, text: &str) -> DomId {
        self.create(Kind::Comment(text.to_string()))
    }

    /// Number of value writes performed on nodes so far.
    ///
    /// Counts property, attribute, class, style and text writes.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.get()
    }

    fn wrote(&self) {
        self.inner.writes.set(self.inner.writes.get() + 1);
    }

    fn with_element<R>(&self, id: DomId, f: impl FnOnce(&mut ElementData) -> R) -> Option<R> {
        let mut nodes = self.inner.nodes.borrow_mut();
        match nodes.get_mut(id.0).map(|node| &mut node.kind) {
            Some(Kind::Element(element)) => Some(f(element)),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    pub fn parent(&self, id: DomId) -> Option<DomId> {
        self.inner.nodes.borrow().get(id.0).and_then(|node| node.parent)
    }

    pub fn children(&self, id: DomId) -> Vec<DomId> {
        self.inner
            .nodes
            .borrow()
            .get(id.0)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub fn first_child(&self, id: DomId) -> Option<DomId> {
        self.inner
            .nodes
            .borrow()
            .get(id.0)
            .and_then(|node| node.children.first().copied())
    }

    pub fn next_sibling(&self, id: DomId) -> Option<DomId> {
        let parent = self.parent(id)?;
        let nodes = self.inner.nodes.borrow();
        let siblings = &nodes[parent.0].children;
        let position = siblings.iter().position(|child| *child == id)?;
        siblings.get(position + 1).copied()
    }

    /// Insert `child` into `parent` before `reference`, or last when
    /// `reference` is `None` or not a child of `parent`. A child that
    /// already has a parent is moved.
    pub fn insert_before(&self, parent: DomId, child: DomId, reference: Option<DomId>) {
        if parent == child || reference == Some(child) {
            return;
        }
        self.detach(child);
        let mut nodes = self.inner.nodes.borrow_mut();
        let siblings = &mut nodes[parent.0].children;
        let position = reference
            .and_then(|reference| siblings.iter().position(|c| *c == reference))
            .unwrap_or(siblings.len());
        siblings.insert(position, child);
        nodes[child.0].parent = Some(parent);
    }

    pub fn append_child(&self, parent: DomId, child: DomId) {
        self.insert_before(parent, child, None);
    }

    /// Remove `child` from `parent`. Does nothing if `parent` is not its
    /// parent.
    pub fn remove_child(&self, parent: DomId, child: DomId) {
        if self.parent(child) == Some(parent) {
            self.detach(child);
        }
    }

    fn detach(&self, child: DomId) {
        let mut nodes = self.inner.nodes.borrow_mut();
        if let Some(parent) = nodes[child.0].parent.take() {
            nodes[parent.0].children.retain(|c| *c != child);
        }
    }

    /// Whether `id` is reachable from the body.
    pub fn is_connected(&self, id: DomId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.inner.body {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    // ------------------------------------------------------------------
    // Element state
    // ------------------------------------------------------------------

    pub fn tag(&self, id: DomId) -> Option<String> {
        self.with_element(id, |element| element.tag.clone())
    }

    pub fn is_element(&self, id: DomId) -> bool {
        self.with_element(id, |_| ()).is_some()
    }

    pub fn property(&self, id: DomId, name: &str) -> Option<Value> {
        self.with_element(id, |element| element.properties.get(name).cloned())
            .flatten()
    }

    pub fn set_property(&self, id: DomId, name: &str, value: Value) {
        self.with_element(id, |element| element.properties.insert(name.to_string(), value));
        self.wrote();
    }

    pub fn remove_property(&self, id: DomId, name: &str) {
        self.with_element(id, |element| element.properties.shift_remove(name));
        self.wrote();
    }

    pub fn attribute(&self, id: DomId, name: &str) -> Option<String> {
        self.with_element(id, |element| element.attributes.get(name).cloned())
            .flatten()
    }

    pub fn set_attribute(&self, id: DomId, name: &str, value: &str) {
        self.with_element(id, |element| {
            element.attributes.insert(name.to_string(), value.to_string())
        });
        self.wrote();
    }

    pub fn remove_attribute(&self, id: DomId, name: &str) {
        self.with_element(id, |element| element.attributes.shift_remove(name));
        self.wrote();
    }

    pub fn has_class(&self, id: DomId, name: &str) -> bool {
        self.with_element(id, |element| element.class_list.contains(name))
            .unwrap_or(false)
    }

    pub fn class_list(&self, id: DomId) -> Vec<String> {
        self.with_element(id, |element| element.class_list.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn add_class(&self, id: DomId, name: &str) {
        self.with_element(id, |element| element.class_list.insert(name.to_string()));
        self.wrote();
    }

    pub fn remove_class(&self, id: DomId, name: &str) {
        self.with_element(id, |element| element.class_list.shift_remove(name));
        self.wrote();
    }

    pub fn style(&self, id: DomId, name: &str) -> Option<String> {
        self.with_element(id, |element| element.styles.get(name).cloned())
            .flatten()
    }

    pub fn set_style(&self, id: DomId, name: &str, value: &str) {
        self.with_element(id, |element| {
            element.styles.insert(name.to_string(), value.to_string())
        });
        self.wrote();
    }

    pub fn remove_style(&self, id: DomId, name: &str) {
        self.with_element(id, |element| element.styles.shift_remove(name));
        self.wrote();
    }

    /// Text of a text or comment node.
    pub fn text(&self, id: DomId) -> Option<String> {
        match self.inner.nodes.borrow().get(id.0).map(|node| &node.kind) {
            Some(Kind::Text(text)) | Some(Kind::Comment(text)) => Some(text.clone()),
            _ => None,
        }
    }

    pub fn set_text(&self, id: DomId, value: &str) {
        if let Some(node) = self.inner.nodes.borrow_mut().get_mut(id.0) {
            if let Kind::Text(text) = &mut node.kind {
                *text = value.to_string();
            }
        }
        self.wrote();
    }

    /// Concatenated text of every text node under `id`.
    pub fn text_content(&self, id: DomId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: DomId, out: &mut String) {
        if let Some(Kind::Text(text)) = self.inner.nodes.borrow().get(id.0).map(|n| &n.kind) {
            out.push_str(text);
        }
        for child in self.children(id) {
            self.collect_text(child, out);
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn add_event_listener<F>(&self, id: DomId, event_type: &str, listener: F) -> Registration
    where
        F: Fn(&DomEvent) + 'static,
    {
        let key = self.inner.next_listener.get();
        self.inner.next_listener.set(key + 1);
        if let Some(node) = self.inner.nodes.borrow_mut().get_mut(id.0) {
            node.listeners
                .entry(event_type.to_string())
                .or_default()
                .insert(key, Rc::new(listener));
        }

        let weak = Rc::downgrade(&self.inner);
        let event_type = event_type.to_string();
        Registration::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(node) = inner.nodes.borrow_mut().get_mut(id.0) {
                    if let Some(listeners) = node.listeners.get_mut(&event_type) {
                        listeners.shift_remove(&key);
                    }
                }
            }
        })
    }

    pub fn listener_count(&self, id: DomId, event_type: &str) -> usize {
        self.inner
            .nodes
            .borrow()
            .get(id.0)
            .and_then(|node| node.listeners.get(event_type).map(IndexMap::len))
            .unwrap_or(0)
    }

    /// Invoke the listeners registered on `id` for the event's type.
    pub fn dispatch_event(&self, id: DomId, event: &DomEvent) {
        let listeners: Vec<Listener> = self
            .inner
            .nodes
            .borrow()
            .get(id.0)
            .and_then(|node| node.listeners.get(&event.event_type))
            .map(|listeners| listeners.values().cloned().collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(event);
        }
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Render `id` and its subtree as HTML. Comments are omitted.
    pub fn to_html(&self, id: DomId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    fn write_html(&self, id: DomId, out: &mut String) {
        let (open, close) = {
            let nodes = self.inner.nodes.borrow();
            match &nodes[id.0].kind {
                Kind::Text(text) => {
                    out.push_str(text);
                    return;
                }
                Kind::Comment(_) => return,
                Kind::Element(element) => {
                    let mut open = format!("<{}", element.tag);
                    for (name, value) in &element.attributes {
                        let _ = write!(open, " {name}=\"{value}\"");
                    }
                    if !element.class_list.is_empty() {
                        let classes: Vec<&str> =
                            element.class_list.iter().map(String::as_str).collect();
                        let _ = write!(open, " class=\"{}\"", classes.join(" "));
                    }
                    if !element.styles.is_empty() {
                        let styles: Vec<String> = element
                            .styles
                            .iter()
                            .map(|(name, value)| format!("{name}: {value}"))
                            .collect();
                        let _ = write!(open, " style=\"{}\"", styles.join("; "));
                    }
                    open.push('>');
                    (open, format!("</{}>", element.tag))
                }
            }
        };
        out.push_str(&open);
        for child in self.children(id) {
            self.write_html(child, out);
        }
        out.push_str(&close);
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.inner.nodes.borrow().len())
            .field("body", &self.to_html(self.inner.body))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_before_moves_existing_child() {
        let doc = Document::new();
        let body = doc.body();
        let a = doc.create_element("a");
        let b = doc.create_element("b");
        doc.append_child(body, a);
        doc.append_child(body, b);

        doc.insert_before(body, b, Some(a));
        assert_eq!(doc.children(body), vec![b, a]);
        assert_eq!(doc.next_sibling(b), Some(a));
    }

    #[test]
    fn remove_child_checks_parent() {
        let doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("span");
        doc.append_child(outer, inner);

        doc.remove_child(doc.body(), inner);
        assert_eq!(doc.parent(inner), Some(outer));

        doc.remove_child(outer, inner);
        assert_eq!(doc.parent(inner), None);
    }

    #[test]
    fn html_rendering() {
        let doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attribute(div, "id", "main");
        doc.add_class(div, "a");
        doc.add_class(div, "b");
        doc.append_child(div, doc.create_text("hi"));
        doc.append_child(div, doc.create_comment("anchor"));
        doc.append_child(doc.body(), div);

        assert_eq!(
            doc.to_html(doc.body()),
            r#"<body><div id="main" class="a b">hi</div></body>"#
        );
        assert!(doc.is_connected(div));
    }

    #[test]
    fn listeners_can_be_removed() {
        let doc = Document::new();
        let button = doc.create_element("button");
        let clicks = Rc::new(Cell::new(0));

        let clicks_clone = clicks.clone();
        let registration = doc.add_event_listener(button, "click", move |_| {
            clicks_clone.set(clicks_clone.get() + 1);
        });

        doc.dispatch_event(button, &DomEvent::new("click"));
        registration.remove();
        doc.dispatch_event(button, &DomEvent::new("click"));

        assert_eq!(clicks.get(), 1);
        assert_eq!(doc.listener_count(button, "click"), 0);
    }
}
