//! Client-side registries.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::error::ProtocolError;
use crate::template::TemplateNode;

/// Write-once mapping from id to an immutable payload.
#[derive(Debug, Clone)]
pub struct WriteOnceTable<T> {
    entries: HashMap<u32, T>,
    duplicate: fn(u32) -> ProtocolError,
    missing: fn(u32) -> ProtocolError,
}

impl<T> WriteOnceTable<T> {
    fn with_errors(duplicate: fn(u32) -> ProtocolError, missing: fn(u32) -> ProtocolError) -> Self {
        Self {
            entries: HashMap::new(),
            duplicate,
            missing,
        }
    }

    /// Store `value` under `id`. Registering an id twice is an error.
    pub fn register(&mut self, id: u32, value: T) -> Result<(), ProtocolError> {
        if self.entries.contains_key(&id) {
            return Err((self.duplicate)(id));
        }
        self.entries.insert(id, value);
        Ok(())
    }

    /// Look up `id`. A missing entry is an error.
    pub fn get(&self, id: u32) -> Result<&T, ProtocolError> {
        self.entries.get(&id).ok_or_else(|| (self.missing)(id))
    }

    pub fn has(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every entry. Used when the mirror is rebuilt from a snapshot.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Constant pool: event data expression lists and other shared JSON.
pub type ConstantPool = WriteOnceTable<Json>;

/// Template registry: template nodes by template id.
pub type TemplateRegistry = WriteOnceTable<TemplateNode>;

impl Default for WriteOnceTable<Json> {
    fn default() -> Self {
        Self::with_errors(
            |id| ProtocolError::DuplicateConstant { id },
            |id| ProtocolError::MissingConstant { id },
        )
    }
}

impl Default for WriteOnceTable<TemplateNode> {
    fn default() -> Self {
        Self::with_errors(
            |id| ProtocolError::DuplicateTemplate { id },
            |id| ProtocolError::MissingTemplate { id },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Binding;
    use serde_json::json;

    #[test]
    fn constants_are_write_once() {
        let mut pool = ConstantPool::default();
        pool.register(1, json!(["event.key"])).unwrap();

        assert_eq!(pool.get(1).unwrap(), &json!(["event.key"]));
        assert_eq!(
            pool.register(1, json!([])),
            Err(ProtocolError::DuplicateConstant { id: 1 })
        );
        assert_eq!(pool.get(2), Err(ProtocolError::MissingConstant { id: 2 }));
    }

    #[test]
    fn templates_report_their_own_errors() {
        let mut registry = TemplateRegistry::default();
        registry
            .register(3, TemplateNode::text(Binding::fixed("hi")))
            .unwrap();

        assert!(registry.has(3));
        assert_eq!(
            registry.get(4).unwrap_err(),
            ProtocolError::MissingTemplate { id: 4 }
        );
    }
}
