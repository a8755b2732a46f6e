use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::core::{Attrs, Document, ElementNode, Node};
use crate::insert_object::{InsertObjectOptions, insert_object};
use crate::ops::Op;
use crate::schema::{COPY_ON_REPLACE, PARAGRAPH, ROOT, Schema, TEXT};
use crate::selection::Selectable;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CommandError {
    message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Clone)]
pub struct CommandSpec {
    pub id: String,
    pub handler: std::sync::Arc<
        dyn Fn(&mut crate::core::Editor, Option<serde_json::Value>) -> Result<(), CommandError>
            + Send
            + Sync,
    >,
}

impl CommandSpec {
    pub fn new(
        id: impl Into<String>,
        handler: impl Fn(
            &mut crate::core::Editor,
            Option<serde_json::Value>,
        ) -> Result<(), CommandError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            handler: std::sync::Arc::new(handler),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Block,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildConstraint {
    None,
    BlockOnly,
    InlineOnly,
    Any,
    /// Only the listed kinds.
    Kinds(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub kind: String,
    pub role: NodeRole,
    /// Atomic for content operations: never split, merged or entered.
    pub is_object: bool,
    pub is_limit: bool,
    pub children: ChildConstraint,
    /// Attributes that belong to the node itself, such as an image source.
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl NodeSpec {
    pub fn new(kind: impl Into<String>, role: NodeRole, children: ChildConstraint) -> Self {
        Self {
            kind: kind.into(),
            role,
            is_object: false,
            is_limit: false,
            children,
            attributes: Vec::new(),
        }
    }

    pub fn object(mut self) -> Self {
        self.is_object = true;
        self
    }

    pub fn limit(mut self) -> Self {
        self.is_limit = true;
        self
    }

    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }
}

/// An attribute shared by several node kinds, with schema properties such as
/// `copy_on_replace`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub key: String,
    pub allowed_on: Vec<String>,
    #[serde(default)]
    pub properties: Attrs,
}

impl AttributeSpec {
    pub fn new<I, S>(key: impl Into<String>, allowed_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            allowed_on: allowed_on.into_iter().map(Into::into).collect(),
            properties: Attrs::default(),
        }
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

pub trait NormalizePass: Send + Sync {
    fn id(&self) -> &'static str;
    fn run(&self, doc: &Document, registry: &PluginRegistry) -> Vec<Op>;
}

pub trait PlatePlugin: Send + Sync {
    fn id(&self) -> &'static str;
    fn node_specs(&self) -> Vec<NodeSpec> {
        Vec::new()
    }
    fn attribute_specs(&self) -> Vec<AttributeSpec> {
        Vec::new()
    }
    fn normalize_passes(&self) -> Vec<Box<dyn NormalizePass>> {
        Vec::new()
    }
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    node_specs: HashMap<String, NodeSpec>,
    attribute_specs: HashMap<String, AttributeSpec>,
    normalize_passes: Vec<Box<dyn NormalizePass>>,
    commands: HashMap<String, CommandSpec>,
}

impl PluginRegistry {
    pub fn new(plugins: impl IntoIterator<Item = Box<dyn PlatePlugin>>) -> Result<Self, String> {
        let mut registry = Self::default();
        for plugin in plugins {
            registry.register_plugin(plugin)?;
        }
        Ok(registry)
    }

    pub fn core() -> Self {
        Self::new(core_plugins()).expect("core registry must be valid")
    }

    pub fn richtext() -> Self {
        let mut plugins = core_plugins();
        let richtext: Vec<Box<dyn PlatePlugin>> = vec![
            Box::new(HeadingPlugin),
            Box::new(BlockquotePlugin),
            Box::new(AlignPlugin),
            Box::new(IndentPlugin),
            Box::new(ImagePlugin),
            Box::new(MentionPlugin),
            Box::new(TablePlugin),
        ];
        plugins.extend(richtext);
        Self::new(plugins).expect("richtext registry must be valid")
    }

    pub fn register_plugin(&mut self, plugin: Box<dyn PlatePlugin>) -> Result<(), String> {
        for spec in plugin.node_specs() {
            if self.node_specs.contains_key(&spec.kind) {
                return Err(format!("Duplicate node spec kind: {}", spec.kind));
            }
            self.node_specs.insert(spec.kind.clone(), spec);
        }

        for spec in plugin.attribute_specs() {
            if self.attribute_specs.contains_key(&spec.key) {
                return Err(format!("Duplicate attribute spec: {}", spec.key));
            }
            self.attribute_specs.insert(spec.key.clone(), spec);
        }

        self.normalize_passes.extend(plugin.normalize_passes());

        for cmd in plugin.commands() {
            if self.commands.contains_key(&cmd.id) {
                return Err(format!("Duplicate command id: {}", cmd.id));
            }
            self.commands.insert(cmd.id.clone(), cmd);
        }

        Ok(())
    }

    pub fn node_specs(&self) -> &HashMap<String, NodeSpec> {
        &self.node_specs
    }

    pub fn attribute_specs(&self) -> &HashMap<String, AttributeSpec> {
        &self.attribute_specs
    }

    pub fn normalize_passes(&self) -> &[Box<dyn NormalizePass>] {
        &self.normalize_passes
    }

    pub fn commands(&self) -> &HashMap<String, CommandSpec> {
        &self.commands
    }

    pub fn command(&self, id: &str) -> Option<CommandSpec> {
        self.commands.get(id).cloned()
    }

    /// Ops of the first pass that has work to do.
    ///
    /// Passes compute paths against the same document, so only one pass runs
    /// per round; the editor repeats until no pass returns ops.
    pub fn normalize(&self, doc: &Document) -> Vec<Op> {
        for pass in &self.normalize_passes {
            let ops = pass.run(doc, self);
            if !ops.is_empty() {
                trace!(pass = pass.id(), ops = ops.len(), "normalize");
                return ops;
            }
        }
        Vec::new()
    }

    pub fn is_known_kind(&self, kind: &str) -> bool {
        self.node_specs.contains_key(kind)
    }

    fn role_of(&self, kind: &str) -> Option<NodeRole> {
        if kind == TEXT {
            return Some(NodeRole::Inline);
        }
        self.node_specs.get(kind).map(|spec| spec.role)
    }

    fn element_spec(&self, node: &Node) -> Option<&NodeSpec> {
        match node {
            Node::Element(el) => self.node_specs.get(&el.kind),
            Node::Text(_) => None,
        }
    }
}

impl Schema for PluginRegistry {
    fn is_object(&self, node: &Node) -> bool {
        self.element_spec(node).is_some_and(|spec| spec.is_object)
    }

    fn is_block(&self, node: &Node) -> bool {
        self.element_spec(node)
            .is_some_and(|spec| spec.role == NodeRole::Block)
    }

    fn is_inline(&self, node: &Node) -> bool {
        match node {
            Node::Text(_) => true,
            Node::Element(el) => self.role_of(&el.kind) == Some(NodeRole::Inline),
        }
    }

    fn is_limit(&self, node: &Node) -> bool {
        self.element_spec(node)
            .is_some_and(|spec| spec.is_limit || spec.is_object)
    }

    fn check_child(&self, parent: &str, child: &str) -> bool {
        let (Some(parent), Some(role)) = (self.node_specs.get(parent), self.role_of(child)) else {
            return false;
        };
        match &parent.children {
            ChildConstraint::None => false,
            ChildConstraint::BlockOnly => role == NodeRole::Block,
            ChildConstraint::InlineOnly => role == NodeRole::Inline,
            ChildConstraint::Any => true,
            ChildConstraint::Kinds(kinds) => kinds.iter().any(|kind| kind == child),
        }
    }

    fn check_attribute(&self, kind: &str, key: &str) -> bool {
        if self
            .node_specs
            .get(kind)
            .is_some_and(|spec| spec.attributes.iter().any(|a| a == key))
        {
            return true;
        }
        self.attribute_specs
            .get(key)
            .is_some_and(|spec| spec.allowed_on.iter().any(|k| k == kind))
    }

    fn attribute_property(&self, key: &str, property: &str) -> Option<&Value> {
        self.attribute_specs.get(key)?.properties.get(property)
    }
}

fn core_plugins() -> Vec<Box<dyn PlatePlugin>> {
    vec![
        Box::new(CoreRootPlugin),
        Box::new(CoreParagraphPlugin),
        Box::new(CoreDividerPlugin),
        Box::new(CoreNormalizePlugin),
        Box::new(CoreCommandsPlugin),
    ]
}

struct CoreRootPlugin;

impl PlatePlugin for CoreRootPlugin {
    fn id(&self) -> &'static str {
        "core.root"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![NodeSpec::new(ROOT, NodeRole::Block, ChildConstraint::BlockOnly).limit()]
    }
}

struct CoreParagraphPlugin;

impl PlatePlugin for CoreParagraphPlugin {
    fn id(&self) -> &'static str {
        "core.paragraph"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![NodeSpec::new(
            PARAGRAPH,
            NodeRole::Block,
            ChildConstraint::InlineOnly,
        )]
    }
}

struct CoreDividerPlugin;

impl PlatePlugin for CoreDividerPlugin {
    fn id(&self) -> &'static str {
        "core.divider"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![NodeSpec::new("divider", NodeRole::Block, ChildConstraint::None).object()]
    }
}

struct CoreNormalizePlugin;

impl PlatePlugin for CoreNormalizePlugin {
    fn id(&self) -> &'static str {
        "core.normalize"
    }

    fn normalize_passes(&self) -> Vec<Box<dyn NormalizePass>> {
        vec![
            Box::new(EnsureNonEmptyDocument),
            Box::new(RemoveEmptyTextLeaves),
            Box::new(MergeAdjacentTextLeaves),
        ]
    }
}

struct EnsureNonEmptyDocument;

impl NormalizePass for EnsureNonEmptyDocument {
    fn id(&self) -> &'static str {
        "core.ensure_non_empty_document"
    }

    fn run(&self, doc: &Document, _registry: &PluginRegistry) -> Vec<Op> {
        if doc.children.is_empty() {
            return vec![Op::InsertNode {
                path: vec![0],
                node: Node::paragraph(""),
            }];
        }
        Vec::new()
    }
}

/// Walks elements depth first, children before their parent, so that ops
/// emitted for a parent never shift paths of ops emitted inside it.
fn walk_elements_post_order(
    children: &[Node],
    path: &mut Vec<usize>,
    visit: &mut dyn FnMut(&ElementNode, &[usize]),
) {
    for (ix, node) in children.iter().enumerate() {
        let Node::Element(el) = node else {
            continue;
        };
        path.push(ix);
        walk_elements_post_order(&el.children, path, visit);
        visit(el, path);
        path.pop();
    }
}

struct RemoveEmptyTextLeaves;

impl NormalizePass for RemoveEmptyTextLeaves {
    fn id(&self) -> &'static str {
        "core.remove_empty_text_leaves"
    }

    fn run(&self, doc: &Document, _registry: &PluginRegistry) -> Vec<Op> {
        let mut ops = Vec::new();
        walk_elements_post_order(&doc.children, &mut Vec::new(), &mut |el, path| {
            for (ix, child) in el.children.iter().enumerate().rev() {
                if matches!(child, Node::Text(t) if t.text.is_empty()) {
                    let mut remove_path = path.to_vec();
                    remove_path.push(ix);
                    ops.push(Op::RemoveNode { path: remove_path });
                }
            }
        });
        ops
    }
}

struct MergeAdjacentTextLeaves;

impl NormalizePass for MergeAdjacentTextLeaves {
    fn id(&self) -> &'static str {
        "core.merge_adjacent_text_leaves"
    }

    fn run(&self, doc: &Document, _registry: &PluginRegistry) -> Vec<Op> {
        let mut ops = Vec::new();
        walk_elements_post_order(&doc.children, &mut Vec::new(), &mut |el, path| {
            let mut ix = el.children.len();
            while ix > 0 {
                ix -= 1;
                let Node::Text(right) = &el.children[ix] else {
                    continue;
                };

                let mut start = ix;
                while start > 0 {
                    let Some(Node::Text(left)) = el.children.get(start - 1) else {
                        break;
                    };
                    if left.attrs != right.attrs {
                        break;
                    }
                    start -= 1;
                }

                if start == ix {
                    continue;
                }

                let Some(Node::Text(first)) = el.children.get(start) else {
                    continue;
                };
                let mut appended = String::new();
                for node in el.children.iter().take(ix + 1).skip(start + 1) {
                    if let Node::Text(t) = node {
                        appended.push_str(&t.text);
                    }
                }

                if !appended.is_empty() {
                    let mut insert_text_path = path.to_vec();
                    insert_text_path.push(start);
                    ops.push(Op::InsertText {
                        path: insert_text_path,
                        offset: first.text.len(),
                        text: appended,
                    });
                }

                for remove_ix in (start + 1..=ix).rev() {
                    let mut remove_path = path.to_vec();
                    remove_path.push(remove_ix);
                    ops.push(Op::RemoveNode { path: remove_path });
                }

                ix = start;
            }
        });
        ops
    }
}

/// Options for the object insert commands, from `args.options`.
fn object_options(args: Option<&Value>) -> Result<InsertObjectOptions, CommandError> {
    match args.and_then(|v| v.get("options")) {
        Some(options) => serde_json::from_value(options.clone())
            .map_err(|e| CommandError::new(format!("Invalid args.options: {e}"))),
        None => Ok(InsertObjectOptions::interactive()),
    }
}

fn run_insert_object(
    editor: &mut crate::core::Editor,
    node: Node,
    args: Option<&Value>,
    what: &str,
) -> Result<(), CommandError> {
    let options = object_options(args)?;
    insert_object(editor, node, Selectable::None, None, &options)
        .map(|_| ())
        .map_err(|e| CommandError::new(format!("Failed to insert {what}: {e}")))
}

struct CoreCommandsPlugin;

impl PlatePlugin for CoreCommandsPlugin {
    fn id(&self) -> &'static str {
        "core.commands"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("core.insert_divider", |editor, args| {
                run_insert_object(editor, Node::divider(), args.as_ref(), "divider")
            }),
        ]
    }
}

struct HeadingPlugin;

impl PlatePlugin for HeadingPlugin {
    fn id(&self) -> &'static str {
        "heading"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![
            NodeSpec::new("heading", NodeRole::Block, ChildConstraint::InlineOnly)
                .attributes(["level"]),
        ]
    }
}

struct BlockquotePlugin;

impl PlatePlugin for BlockquotePlugin {
    fn id(&self) -> &'static str {
        "blockquote"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![NodeSpec::new(
            "blockquote",
            NodeRole::Block,
            ChildConstraint::BlockOnly,
        )]
    }
}

struct AlignPlugin;

impl PlatePlugin for AlignPlugin {
    fn id(&self) -> &'static str {
        "align"
    }

    fn attribute_specs(&self) -> Vec<AttributeSpec> {
        vec![
            AttributeSpec::new("align", [PARAGRAPH, "heading", "image", "table"])
                .property(COPY_ON_REPLACE, true),
        ]
    }
}

struct IndentPlugin;

impl PlatePlugin for IndentPlugin {
    fn id(&self) -> &'static str {
        "indent"
    }

    fn attribute_specs(&self) -> Vec<AttributeSpec> {
        vec![
            AttributeSpec::new("indent", [PARAGRAPH, "heading"])
                .property(COPY_ON_REPLACE, true),
        ]
    }
}

struct ImagePlugin;

impl PlatePlugin for ImagePlugin {
    fn id(&self) -> &'static str {
        "image"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![
            NodeSpec::new("image", NodeRole::Block, ChildConstraint::None)
                .object()
                .attributes(["src", "alt"]),
        ]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("image.insert", |editor, args| {
                let src = args
                    .as_ref()
                    .and_then(|v| v.get("src"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| CommandError::new("Missing args.src"))?
                    .to_string();
                let alt = args
                    .as_ref()
                    .and_then(|v| v.get("alt"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());

                run_insert_object(editor, Node::image(src, alt), args.as_ref(), "image")
            }),
        ]
    }
}

struct MentionPlugin;

impl PlatePlugin for MentionPlugin {
    fn id(&self) -> &'static str {
        "mention"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![
            NodeSpec::new("mention", NodeRole::Inline, ChildConstraint::None)
                .object()
                .attributes(["label"]),
        ]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("mention.insert", |editor, args| {
                let label = args
                    .as_ref()
                    .and_then(|v| v.get("label"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("mention")
                    .to_string();

                run_insert_object(editor, Node::mention(label), args.as_ref(), "mention")
            }),
        ]
    }
}

struct TablePlugin;

impl PlatePlugin for TablePlugin {
    fn id(&self) -> &'static str {
        "table"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![
            NodeSpec::new(
                "table",
                NodeRole::Block,
                ChildConstraint::Kinds(vec!["table_row".to_string()]),
            )
            .object(),
            NodeSpec::new(
                "table_row",
                NodeRole::Block,
                ChildConstraint::Kinds(vec!["table_cell".to_string()]),
            )
            .limit(),
            NodeSpec::new("table_cell", NodeRole::Block, ChildConstraint::BlockOnly).limit(),
        ]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("table.insert", |editor, args| {
                let rows = args
                    .as_ref()
                    .and_then(|v| v.get("rows"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(2)
                    .clamp(1, 32) as usize;
                let cols = args
                    .as_ref()
                    .and_then(|v| v.get("cols"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(2)
                    .clamp(1, 32) as usize;

                run_insert_object(editor, table_node(rows, cols), args.as_ref(), "table")
            }),
        ]
    }
}

fn table_cell_node() -> Node {
    Node::element("table_cell", vec![Node::paragraph("")])
}

fn table_row_node(cols: usize) -> Node {
    Node::element("table_row", (0..cols.max(1)).map(|_| table_cell_node()).collect())
}

/// A `rows` x `cols` table of empty cells.
pub fn table_node(rows: usize, cols: usize) -> Node {
    Node::element("table", (0..rows.max(1)).map(|_| table_row_node(cols)).collect())
}
