//! Constant Pool and Template Registry
//!
//! Write-once side tables resolving shared immutable payloads by small
//! integer id. The server assigns ids and ships each entry once, in the
//! first message that needs it; the client stores every entry it receives
//! and treats a lookup miss as a protocol ordering bug.
//!
//! Tables are owned by the tree or session they serve. Nothing here is
//! process-global, so any number of sessions can coexist.

mod reader;
mod writer;

pub use reader::{ConstantPool, TemplateRegistry, WriteOnceTable};
pub use writer::{ConstantPoolWriter, TemplateCatalog};
