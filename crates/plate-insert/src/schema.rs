//! Capability queries over node kinds.
//!
//! Everything that decides where content may go asks a [`Schema`]. The plugin
//! registry is the production implementation; tests can supply their own.

use serde_json::Value;

use crate::core::{Attrs, Node};

/// Schema name of the document root.
pub const ROOT: &str = "$root";
/// Schema name of text nodes.
pub const TEXT: &str = "$text";
pub const PARAGRAPH: &str = "paragraph";

/// Attribute property marking attributes that survive when their host block
/// is replaced by other content.
pub const COPY_ON_REPLACE: &str = "copy_on_replace";

pub trait Schema {
    fn is_object(&self, node: &Node) -> bool;
    fn is_block(&self, node: &Node) -> bool;
    fn is_inline(&self, node: &Node) -> bool;

    /// Limit elements are never split or left by content operations.
    fn is_limit(&self, node: &Node) -> bool {
        self.is_object(node)
    }

    /// Whether a `child` kind may be placed directly inside a `parent` kind.
    fn check_child(&self, parent: &str, child: &str) -> bool;

    fn check_attribute(&self, kind: &str, key: &str) -> bool;

    fn attribute_property(&self, key: &str, property: &str) -> Option<&Value>;

    fn attributes_with_property(&self, node: &Node, property: &str, value: &Value) -> Attrs {
        node.attrs()
            .iter()
            .filter(|(key, _)| self.attribute_property(key, property) == Some(value))
            .map(|(key, v)| (key.clone(), v.clone()))
            .collect()
    }

    /// The subset of `attrs` that a node of `kind` may carry.
    fn allowed_attributes(&self, kind: &str, attrs: &Attrs) -> Attrs {
        attrs
            .iter()
            .filter(|(key, _)| self.check_attribute(kind, key))
            .map(|(key, v)| (key.clone(), v.clone()))
            .collect()
    }

    /// A block whose direct content is text, such as a paragraph or heading.
    fn is_text_block(&self, node: &Node) -> bool {
        self.is_block(node) && !self.is_object(node) && self.check_child(node.kind(), TEXT)
    }
}
