//! Server-side registries.
//!
//! Both writers assign ids and remember which entries have not been shipped
//! yet. Every entry is kept so a resynchronization snapshot can resend the
//! complete table.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::template::TemplateNode;

/// Assigns constant ids, deduplicating equal payloads.
#[derive(Debug, Default)]
pub struct ConstantPoolWriter {
    ids: HashMap<String, u32>,
    entries: IndexMap<u32, Json>,
    unsent: Vec<u32>,
}

impl ConstantPoolWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `value`, registering it if this is the first use.
    pub fn get_or_register(&mut self, value: Json) -> u32 {
        let key = value.to_string();
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        let id = self.entries.len() as u32 + 1;
        self.ids.insert(key, id);
        self.entries.insert(id, value);
        self.unsent.push(id);
        id
    }

    /// Entries registered since the previous call.
    pub fn take_unsent(&mut self) -> IndexMap<u32, Json> {
        std::mem::take(&mut self.unsent)
            .into_iter()
            .filter_map(|id| self.entries.get(&id).map(|value| (id, value.clone())))
            .collect()
    }

    /// Every entry, marking all of them as sent.
    pub fn take_all(&mut self) -> IndexMap<u32, Json> {
        self.unsent.clear();
        self.entries.clone()
    }
}

/// Assigns template ids.
#[derive(Debug, Default)]
pub struct TemplateCatalog {
    templates: IndexMap<u32, TemplateNode>,
    unsent: Vec<u32>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template node and return its id.
    ///
    /// Children must be registered first so their ids can be referenced.
    pub fn register(&mut self, node: TemplateNode) -> u32 {
        let id = self.templates.len() as u32 + 1;
        self.templates.insert(id, node);
        self.unsent.push(id);
        id
    }

    pub fn get(&self, id: u32) -> Option<&TemplateNode> {
        self.templates.get(&id)
    }

    /// Templates registered since the previous call.
    pub fn take_unsent(&mut self) -> IndexMap<u32, TemplateNode> {
        std::mem::take(&mut self.unsent)
            .into_iter()
            .filter_map(|id| self.templates.get(&id).map(|node| (id, node.clone())))
            .collect()
    }

    /// Every template, marking all of them as sent.
    pub fn take_all(&mut self) -> IndexMap<u32, TemplateNode> {
        self.unsent.clear();
        self.templates.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Binding;
    use serde_json::json;

    #[test]
    fn equal_constants_share_an_id() {
        let mut writer = ConstantPoolWriter::new();
        let a = writer.get_or_register(json!(["event.key"]));
        let b = writer.get_or_register(json!(["event.key"]));
        let c = writer.get_or_register(json!(["element.value"]));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(writer.take_unsent().len(), 2);
        assert!(writer.take_unsent().is_empty());
        assert_eq!(writer.take_all().len(), 2);
    }

    #[test]
    fn templates_are_shipped_once() {
        let mut catalog = TemplateCatalog::new();
        let id = catalog.register(TemplateNode::text(Binding::model("label")));

        let first = catalog.take_unsent();
        assert!(first.contains_key(&id));
        assert!(catalog.take_unsent().is_empty());
        assert!(catalog.get(id).is_some());
    }
}
