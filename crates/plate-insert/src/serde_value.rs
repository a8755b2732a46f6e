use serde::{Deserialize, Serialize};

use crate::core::{Document, Editor, Node};
use crate::plugin::PluginRegistry;
use crate::selection::{Position, Selection};

const DEFAULT_SCHEMA: &str = "plate-insert";
const DEFAULT_VERSION: u32 = 1;

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_version() -> u32 {
    DEFAULT_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateValue {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub document: Document,
}

impl PlateValue {
    pub fn from_document(document: Document) -> Self {
        Self {
            schema: default_schema(),
            version: default_version(),
            document,
        }
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// An editor over the stored document, with the selection at its start.
    pub fn into_editor(self, registry: PluginRegistry) -> Editor {
        let start = match self.document.children.first() {
            Some(Node::Element(_)) => Position::new(vec![0], 0),
            _ => Position::root(0),
        };
        Editor::new(self.document, Selection::collapsed(start), registry)
    }
}

impl From<&Editor> for PlateValue {
    fn from(editor: &Editor) -> Self {
        Self::from_document(editor.doc().clone())
    }
}
