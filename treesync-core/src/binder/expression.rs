//! Event data expressions.
//!
//! An element listener names the data to send with an event as a list of
//! expressions such as `event.key`, `event.detail.value` or
//! `element.value`. Expressions are parsed once per source string and
//! cached.

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value as Json;

use super::dom::{DomEvent, DomId, Document};
use crate::error::BindingError;
use crate::protocol::{codec, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Event,
    Element,
}

/// A parsed event data expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    root: Root,
    path: Vec<String>,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, BindingError> {
        let invalid = |reason: &str| BindingError::InvalidExpression {
            source_text: source.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = source.trim().split('.');
        let root = match segments.next() {
            Some("event") => Root::Event,
            Some("element") => Root::Element,
            _ => return Err(invalid("must start with `event.` or `element.`")),
        };
        let path: Vec<String> = segments.map(str::to_string).collect();
        if path.is_empty() {
            return Err(invalid("missing field name"));
        }
        if let Some(segment) = path.iter().find(|segment| !is_identifier(segment)) {
            return Err(invalid(&format!("`{segment}` is not a field name")));
        }
        Ok(Self { root, path })
    }

    /// Evaluate against a fired event and the element it fired on.
    /// Missing fields evaluate to `null`.
    pub fn evaluate(&self, event: &DomEvent, document: &Document, element: DomId) -> Json {
        let (first, rest) = match self.path.split_first() {
            Some(split) => split,
            None => return Json::Null,
        };
        let start = match self.root {
            Root::Event if first == "type" => Json::String(event.event_type.clone()),
            Root::Event => event.fields.get(first).cloned().unwrap_or(Json::Null),
            Root::Element => document
                .property(element, first)
                .and_then(|value| property_to_json(&value))
                .or_else(|| document.attribute(element, first).map(Json::String))
                .unwrap_or(Json::Null),
        };
        rest.iter().fold(start, |current, segment| {
            current.get(segment).cloned().unwrap_or(Json::Null)
        })
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn property_to_json(value: &Value) -> Option<Json> {
    codec::encode_without_type_info(value).ok()
}

/// Cache of parsed expressions keyed by source string.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    expressions: HashMap<String, Rc<Expression>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, source: &str) -> Result<Rc<Expression>, BindingError> {
        if let Some(expression) = self.expressions.get(source) {
            return Ok(expression.clone());
        }
        let expression = Rc::new(Expression::parse(source)?);
        self.expressions
            .insert(source.to_string(), expression.clone());
        Ok(expression)
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_paths_are_followed() {
        let doc = Document::new();
        let event = DomEvent::new("change").with_field("detail", json!({ "value": 4 }));

        let expression = Expression::parse("event.detail.value").unwrap();
        assert_eq!(expression.evaluate(&event, &doc, doc.body()), json!(4));

        let missing = Expression::parse("event.detail.other").unwrap();
        assert_eq!(missing.evaluate(&event, &doc, doc.body()), Json::Null);

        let event_type = Expression::parse("event.type").unwrap();
        assert_eq!(event_type.evaluate(&event, &doc, doc.body()), json!("change"));
    }

    #[test]
    fn element_reads_properties() {
        let doc = Document::new();
        let input = doc.create_element("input");
        doc.set_property(input, "value", Value::from("typed"));

        let expression = Expression::parse("element.value").unwrap();
        assert_eq!(
            expression.evaluate(&DomEvent::new("input"), &doc, input),
            json!("typed")
        );
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        for source in ["window.alert", "event", "event.a b", "event..x"] {
            assert!(
                matches!(Expression::parse(source), Err(BindingError::InvalidExpression { .. })),
                "{source} should be rejected"
            );
        }
    }

    #[test]
    fn cache_parses_once() {
        let mut cache = ExpressionCache::new();
        let first = cache.get("event.key").unwrap();
        let second = cache.get("event.key").unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }
}
