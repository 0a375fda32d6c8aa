use super::dom::DomId;
use super::scope::Scope;
use super::Binder;
use crate::client::StateNode;
use crate::protocol::{keys, NodeFeature};
use crate::reactive::run_when_dependencies_change;

/// Keep the text of `dom` equal to the node's `text` property.
pub(crate) fn bind(binder: &Binder, node: &StateNode, dom: DomId, scope: &Scope) {
    let text = node.map(NodeFeature::TextNode).property(keys::TEXT);
    let document = binder.document().clone();
    scope.add_computation(run_when_dependencies_change(move || {
        let value = text
            .value()
            .and_then(|value| value.to_text())
            .unwrap_or_default();
        if document.text(dom).as_deref() != Some(value.as_str()) {
            document.set_text(dom, &value);
        }
    }));
}
