use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{trace, warn};

use crate::ops::{Op, Path, Transaction};
use crate::plugin::{CommandError, PluginRegistry};
use crate::schema::{ROOT, Schema, TEXT};
use crate::selection::{Position, Range, Selection};
use crate::writer::{DeleteOptions, Writer};

pub type Attrs = BTreeMap<String, serde_json::Value>;
pub type ElementKind = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
    #[serde(default)]
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Element(ElementNode),
    Text(TextNode),
}

impl Node {
    pub fn element(kind: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Element(ElementNode {
            kind: kind.into(),
            attrs: Attrs::default(),
            children,
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(TextNode {
            text: text.into(),
            attrs: Attrs::default(),
        })
    }

    /// A paragraph holding `text`, or an empty paragraph when `text` is empty.
    pub fn paragraph(text: impl Into<String>) -> Self {
        let text = text.into();
        let children = if text.is_empty() {
            Vec::new()
        } else {
            vec![Node::text(text)]
        };
        Node::element("paragraph", children)
    }

    pub fn divider() -> Self {
        Node::element("divider", Vec::new())
    }

    pub fn image(src: impl Into<String>, alt: Option<String>) -> Self {
        let src: String = src.into();
        let mut node = Node::element("image", Vec::new()).with_attr("src", src);
        if let Some(alt) = alt {
            node = node.with_attr("alt", alt);
        }
        node
    }

    pub fn mention(label: impl Into<String>) -> Self {
        let label: String = label.into();
        Node::element("mention", Vec::new()).with_attr("label", label)
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attrs_mut().insert(key.into(), value.into());
        self
    }

    /// Schema name of the node. Text nodes are always `$text`.
    pub fn kind(&self) -> &str {
        match self {
            Node::Element(el) => &el.kind,
            Node::Text(_) => TEXT,
        }
    }

    pub fn attrs(&self) -> &Attrs {
        match self {
            Node::Element(el) => &el.attrs,
            Node::Text(t) => &t.attrs,
        }
    }

    pub fn attrs_mut(&mut self) -> &mut Attrs {
        match self {
            Node::Element(el) => &mut el.attrs,
            Node::Text(t) => &mut t.attrs,
        }
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        }
    }

    /// Number of offset units the node occupies inside its parent.
    pub fn offset_size(&self) -> usize {
        match self {
            Node::Element(_) => 1,
            Node::Text(t) => t.text.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub kind: ElementKind,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl ElementNode {
    pub fn max_offset(&self) -> usize {
        max_offset(&self.children)
    }

    pub fn is_empty(&self) -> bool {
        self.max_offset() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub text: String,
    #[serde(default)]
    pub attrs: Attrs,
}

pub fn max_offset(children: &[Node]) -> usize {
    children.iter().map(Node::offset_size).sum()
}

pub fn offset_of_index(children: &[Node], index: usize) -> usize {
    children.iter().take(index).map(Node::offset_size).sum()
}

/// Maps an offset to `(child index, offset inside that child)`.
///
/// Offsets on a child boundary map to `(index, 0)`; the end of the parent maps
/// to `(children.len(), 0)`.
pub fn index_at_offset(children: &[Node], offset: usize) -> (usize, usize) {
    let mut start = 0usize;
    for (ix, node) in children.iter().enumerate() {
        let size = node.offset_size();
        if offset < start + size {
            return (ix, offset - start);
        }
        start += size;
    }
    (children.len(), 0)
}

impl Document {
    pub fn new(children: Vec<Node>) -> Self {
        Self { children }
    }

    pub fn node(&self, path: &[usize]) -> Option<&Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.children.get(*first)?;
        for &ix in rest {
            node = match node {
                Node::Element(el) => el.children.get(ix)?,
                Node::Text(_) => return None,
            };
        }
        Some(node)
    }

    pub fn element(&self, path: &[usize]) -> Option<&ElementNode> {
        self.node(path).and_then(Node::as_element)
    }

    /// Children of the element at `parent`, or of the root for an empty path.
    pub fn children(&self, parent: &[usize]) -> Option<&[Node]> {
        if parent.is_empty() {
            return Some(&self.children);
        }
        self.element(parent).map(|el| el.children.as_slice())
    }

    /// Schema name of the container at `parent`.
    pub fn container_kind(&self, parent: &[usize]) -> Option<&str> {
        if parent.is_empty() {
            return Some(ROOT);
        }
        self.element(parent).map(|el| el.kind.as_str())
    }

    pub fn position_before(&self, path: &[usize]) -> Option<Position> {
        let (ix, parent) = path.split_last()?;
        let children = self.children(parent)?;
        children.get(*ix)?;
        Some(Position::new(parent.to_vec(), offset_of_index(children, *ix)))
    }

    pub fn position_after(&self, path: &[usize]) -> Option<Position> {
        let (ix, parent) = path.split_last()?;
        let children = self.children(parent)?;
        let node = children.get(*ix)?;
        Some(Position::new(
            parent.to_vec(),
            offset_of_index(children, *ix) + node.offset_size(),
        ))
    }

    /// Path of the node starting exactly at `position`, if there is one.
    pub fn node_after(&self, position: &Position) -> Option<Path> {
        let children = self.children(&position.path)?;
        let (ix, inner) = index_at_offset(children, position.offset);
        if inner != 0 || ix >= children.len() {
            return None;
        }
        let mut path = position.path.clone();
        path.push(ix);
        Some(path)
    }

    /// Whether `position` exists and does not fall inside a character.
    pub fn is_valid_position(&self, position: &Position) -> bool {
        let Some(children) = self.children(&position.path) else {
            return false;
        };
        if position.offset > max_offset(children) {
            return false;
        }
        let (ix, inner) = index_at_offset(children, position.offset);
        match children.get(ix) {
            Some(Node::Text(text)) if inner != 0 => text.text.is_char_boundary(inner),
            _ => inner == 0,
        }
    }

    /// Document-order comparison of two positions.
    pub fn compare(&self, a: &Position, b: &Position) -> Ordering {
        self.offset_key(a).cmp(&self.offset_key(b))
    }

    fn offset_key(&self, position: &Position) -> Vec<usize> {
        let mut key = Vec::with_capacity(position.path.len() + 1);
        let mut children: &[Node] = &self.children;
        for &ix in &position.path {
            key.push(offset_of_index(children, ix));
            children = match children.get(ix) {
                Some(Node::Element(el)) => &el.children,
                _ => &[],
            };
        }
        key.push(position.offset);
        key
    }

    /// Whether there is no content between `a` and `b`, only element
    /// boundaries.
    pub fn is_touching(&self, a: &Position, b: &Position) -> bool {
        let (mut left, mut right) = match self.compare(a, b) {
            Ordering::Greater => (b.clone(), a.clone()),
            _ => (a.clone(), b.clone()),
        };

        loop {
            if left == right {
                return true;
            }

            let left_max = self.children(&left.path).map(max_offset).unwrap_or(0);
            if left.offset == left_max && !left.path.is_empty() {
                match self.position_after(&left.path) {
                    Some(next) => {
                        left = next;
                        continue;
                    }
                    None => return false,
                }
            }

            if right.offset == 0 && !right.path.is_empty() {
                match self.position_before(&right.path) {
                    Some(prev) => {
                        right = prev;
                        continue;
                    }
                    None => return false,
                }
            }

            return false;
        }
    }

    /// Moves an arbitrary position onto the nearest existing location.
    pub fn clamp_position(&self, position: &Position) -> Position {
        let mut path: Path = Vec::new();
        let mut children: &[Node] = &self.children;
        for &ix in &position.path {
            match children.get(ix) {
                Some(Node::Element(el)) => {
                    path.push(ix);
                    children = &el.children;
                }
                _ => {
                    let offset = offset_of_index(children, ix.min(children.len()));
                    return Position::new(path, offset);
                }
            }
        }
        Position::new(path, position.offset.min(max_offset(children)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("normalization did not converge")]
    NormalizeDidNotConverge,
    #[error("a placement is required when selecting a node")]
    PlacementRequired,
}

#[derive(Debug, Default)]
pub struct EditorConfig {
    pub max_normalize_iterations: usize,
}

impl EditorConfig {
    fn with_defaults(mut self) -> Self {
        if self.max_normalize_iterations == 0 {
            self.max_normalize_iterations = 100;
        }
        self
    }
}

pub struct Editor {
    doc: Document,
    selection: Selection,
    registry: PluginRegistry,
    config: EditorConfig,
    last_transaction: Option<Transaction>,
}

impl Editor {
    pub fn new(doc: Document, selection: Selection, registry: PluginRegistry) -> Self {
        Self::with_config(doc, selection, registry, EditorConfig::default())
    }

    pub fn with_config(
        doc: Document,
        selection: Selection,
        registry: PluginRegistry,
        config: EditorConfig,
    ) -> Self {
        let mut editor = Self {
            doc,
            selection,
            registry,
            config: config.with_defaults(),
            last_transaction: None,
        };
        if let Err(err) = editor.normalize_in_place(&mut Vec::new()) {
            warn!(%err, "initial document did not normalize");
        }
        editor.normalize_selection_in_place();
        editor
    }

    pub fn with_core_plugins() -> Self {
        Self::new(
            Document::new(vec![Node::paragraph("")]),
            Selection::collapsed(Position::new(vec![0], 0)),
            PluginRegistry::core(),
        )
    }

    pub fn with_richtext_plugins() -> Self {
        Self::new(
            Document::new(vec![Node::paragraph("")]),
            Selection::collapsed(Position::new(vec![0], 0)),
            PluginRegistry::richtext(),
        )
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
        self.normalize_selection_in_place();
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn schema(&self) -> &dyn Schema {
        &self.registry
    }

    /// The last committed transaction, if any change produced ops.
    pub fn last_transaction(&self) -> Option<&Transaction> {
        self.last_transaction.as_ref()
    }

    /// Runs `f` as one atomic change.
    ///
    /// Every op applied through the writer is undone when `f` fails, so the
    /// document is either fully changed or left as it was.
    pub fn change<T, E>(
        &mut self,
        source: &str,
        f: impl FnOnce(&mut Writer<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ModelError>,
    {
        let mut writer = Writer::new(&mut self.doc, &self.registry, self.selection.clone());
        let result = f(&mut writer);
        let (ops, mut inverse_ops, selection) = writer.finish();

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                self.rollback(inverse_ops);
                return Err(err);
            }
        };

        self.selection = selection;
        if let Err(err) = self.normalize_in_place(&mut inverse_ops) {
            self.rollback(inverse_ops);
            return Err(err.into());
        }
        self.normalize_selection_in_place();

        if !ops.is_empty() {
            trace!(source, ops = ops.len(), "committed transaction");
            self.last_transaction = Some(
                Transaction::new(ops)
                    .selection_after(self.selection.clone())
                    .source(source),
            );
        }
        Ok(value)
    }

    pub fn apply(&mut self, tx: Transaction) -> Result<(), ModelError> {
        let Transaction {
            ops,
            selection_after,
            meta,
        } = tx;
        let source = meta.source.unwrap_or_else(|| "apply".to_string());
        self.change(&source, |writer| -> Result<(), ModelError> {
            for op in ops {
                writer.apply(op)?;
            }
            if let Some(selection) = selection_after {
                writer.set_selection(selection);
            }
            Ok(())
        })
    }

    pub fn delete_content(
        &mut self,
        range: &Range,
        options: DeleteOptions,
    ) -> Result<Position, ModelError> {
        self.change("delete_content", |writer| writer.delete_content(range, options))
    }

    pub fn insert_content(&mut self, node: Node, range: &Range) -> Result<Range, ModelError> {
        self.change("insert_content", |writer| writer.insert_content(node, range))
    }

    pub fn run_command(
        &mut self,
        id: &str,
        args: Option<serde_json::Value>,
    ) -> Result<(), CommandError> {
        let Some(command) = self.registry.command(id) else {
            return Err(CommandError::new(format!("Unknown command: {id}")));
        };
        (command.handler)(self, args)
    }

    fn rollback(&mut self, inverse_ops: Vec<Op>) {
        for op in inverse_ops.into_iter().rev() {
            if let Err(err) = apply_op_to(&mut self.doc, op) {
                // The document no longer matches the recorded ops; stop here.
                warn!(%err, "failed to roll back change");
                break;
            }
        }
    }

    fn normalize_in_place(&mut self, inverse_ops: &mut Vec<Op>) -> Result<(), ModelError> {
        for _ in 0..self.config.max_normalize_iterations {
            let ops = self.registry.normalize(&self.doc);
            if ops.is_empty() {
                return Ok(());
            }
            for op in ops {
                inverse_ops.push(apply_op_to(&mut self.doc, op)?);
            }
        }
        Err(ModelError::NormalizeDidNotConverge)
    }

    fn normalize_selection_in_place(&mut self) {
        self.selection = Selection {
            anchor: self.doc.clamp_position(&self.selection.anchor),
            focus: self.doc.clamp_position(&self.selection.focus),
        };
    }
}

/// Applies `op` and returns the op that reverts it.
pub(crate) fn apply_op_to(doc: &mut Document, op: Op) -> Result<Op, ModelError> {
    match op {
        Op::InsertText { path, offset, text } => {
            let text_node = node_text_mut(doc, &path)?;
            let offset = clamp_to_char_boundary(&text_node.text, offset);
            text_node.text.insert_str(offset, &text);
            Ok(Op::RemoveText {
                path,
                range: offset..offset + text.len(),
            })
        }
        Op::RemoveText { path, range } => {
            let text_node = node_text_mut(doc, &path)?;
            let start =
                clamp_to_char_boundary(&text_node.text, range.start.min(text_node.text.len()));
            let end = clamp_to_char_boundary(&text_node.text, range.end.min(text_node.text.len()));
            if start >= end {
                return Ok(Op::InsertText {
                    path,
                    offset: start,
                    text: String::new(),
                });
            }
            let removed = text_node.text[start..end].to_string();
            text_node.text.replace_range(start..end, "");
            Ok(Op::InsertText {
                path,
                offset: start,
                text: removed,
            })
        }
        Op::InsertNode { path, node } => {
            insert_node(doc, &path, node)?;
            Ok(Op::RemoveNode { path })
        }
        Op::RemoveNode { path } => {
            let removed = remove_node(doc, &path)?;
            Ok(Op::InsertNode {
                path,
                node: removed,
            })
        }
        Op::SetNodeAttrs { path, patch } => {
            let node = node_mut(doc, &path)?;
            let old = patch_apply(node.attrs_mut(), &patch);
            Ok(Op::SetNodeAttrs { path, patch: old })
        }
    }
}

pub(crate) fn clamp_to_char_boundary(s: &str, mut ix: usize) -> usize {
    ix = ix.min(s.len());
    while ix > 0 && !s.is_char_boundary(ix) {
        ix -= 1;
    }
    ix
}

fn node_mut<'a>(doc: &'a mut Document, path: &[usize]) -> Result<&'a mut Node, ModelError> {
    let Some((first, rest)) = path.split_first() else {
        return Err(ModelError::InvalidPath("Empty path".into()));
    };

    let len = doc.children.len();
    let mut node = doc.children.get_mut(*first).ok_or_else(|| {
        ModelError::InvalidPath(format!("Path out of bounds at depth 0: {first} >= {len}"))
    })?;

    for (depth, &ix) in rest.iter().enumerate() {
        node = match { node } {
            Node::Element(el) => {
                let len = el.children.len();
                el.children.get_mut(ix).ok_or_else(|| {
                    ModelError::InvalidPath(format!(
                        "Path out of bounds at depth {}: {ix} >= {len}",
                        depth + 1
                    ))
                })?
            }
            Node::Text(_) => {
                return Err(ModelError::InvalidPath(format!(
                    "Non-container node at depth {depth}"
                )));
            }
        };
    }

    Ok(node)
}

fn node_text_mut<'a>(doc: &'a mut Document, path: &[usize]) -> Result<&'a mut TextNode, ModelError> {
    match node_mut(doc, path)? {
        Node::Text(t) => Ok(t),
        Node::Element(_) => Err(ModelError::InvalidPath("Expected Text node".into())),
    }
}

fn children_mut<'a>(
    doc: &'a mut Document,
    parent_path: &[usize],
) -> Result<&'a mut Vec<Node>, ModelError> {
    if parent_path.is_empty() {
        return Ok(&mut doc.children);
    }
    match node_mut(doc, parent_path)? {
        Node::Element(el) => Ok(&mut el.children),
        Node::Text(_) => Err(ModelError::InvalidPath("Parent is not a container".into())),
    }
}

fn insert_node(doc: &mut Document, path: &[usize], node: Node) -> Result<(), ModelError> {
    let Some((index, parent_path)) = path.split_last() else {
        return Err(ModelError::InvalidPath("Empty insert path".into()));
    };

    let children = children_mut(doc, parent_path)?;
    if *index > children.len() {
        return Err(ModelError::InvalidPath(format!(
            "Insert index out of bounds: {index} > {}",
            children.len()
        )));
    }
    children.insert(*index, node);
    Ok(())
}

fn remove_node(doc: &mut Document, path: &[usize]) -> Result<Node, ModelError> {
    let Some((index, parent_path)) = path.split_last() else {
        return Err(ModelError::InvalidPath("Empty remove path".into()));
    };

    let children = children_mut(doc, parent_path)?;
    if *index >= children.len() {
        return Err(ModelError::InvalidPath(format!(
            "Remove index out of bounds: {index} >= {}",
            children.len()
        )));
    }
    Ok(children.remove(*index))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrPatch {
    #[serde(default)]
    pub set: Attrs,
    #[serde(default)]
    pub remove: Vec<String>,
}

fn patch_apply(attrs: &mut Attrs, patch: &AttrPatch) -> AttrPatch {
    let mut old_set: Attrs = Attrs::new();
    let mut old_remove: Vec<String> = Vec::new();

    for (k, v) in &patch.set {
        if let Some(prev) = attrs.insert(k.clone(), v.clone()) {
            old_set.insert(k.clone(), prev);
        } else {
            old_remove.push(k.clone());
        }
    }

    for key in &patch.remove {
        if let Some(prev) = attrs.remove(key) {
            old_set.insert(key.clone(), prev);
        }
    }

    AttrPatch {
        set: old_set,
        remove: old_remove,
    }
}
