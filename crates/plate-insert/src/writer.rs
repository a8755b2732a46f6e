use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::core::{
    AttrPatch, Attrs, Document, ElementNode, ModelError, Node, TextNode, apply_op_to,
    index_at_offset, max_offset,
};
use crate::ops::{Op, Path};
use crate::schema::{PARAGRAPH, Schema, TEXT};
use crate::selection::{Position, Range, Selection};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Leave the collapsed position as is even when text is not allowed there.
    #[serde(default)]
    pub skip_auto_paragraph: bool,
}

/// Mutation handle for one [`crate::Editor::change`] call.
pub struct Writer<'a> {
    doc: &'a mut Document,
    schema: &'a dyn Schema,
    selection: Selection,
    ops: Vec<Op>,
    inverse_ops: Vec<Op>,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(doc: &'a mut Document, schema: &'a dyn Schema, selection: Selection) -> Self {
        Self {
            doc,
            schema,
            selection,
            ops: Vec::new(),
            inverse_ops: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> (Vec<Op>, Vec<Op>, Selection) {
        (self.ops, self.inverse_ops, self.selection)
    }

    pub fn doc(&self) -> &Document {
        &*self.doc
    }

    pub fn schema(&self) -> &'a dyn Schema {
        self.schema
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
    }

    pub fn apply(&mut self, op: Op) -> Result<(), ModelError> {
        trace!(op = op.name(), path = ?op.path(), "apply");
        let inverse = apply_op_to(self.doc, op.clone())?;
        self.ops.push(op);
        self.inverse_ops.push(inverse);
        Ok(())
    }

    /// Inserts `node` at `position`, splitting a text node when needed.
    pub fn insert_node(&mut self, node: Node, position: &Position) -> Result<Path, ModelError> {
        let index = self.split_text_at(position)?;
        let mut path = position.path.clone();
        path.push(index);
        self.apply(Op::InsertNode {
            path: path.clone(),
            node,
        })?;
        Ok(path)
    }

    pub fn remove_node(&mut self, path: &[usize]) -> Result<(), ModelError> {
        self.apply(Op::RemoveNode {
            path: path.to_vec(),
        })
    }

    pub fn set_attributes(&mut self, path: &[usize], attrs: Attrs) -> Result<(), ModelError> {
        if attrs.is_empty() {
            return Ok(());
        }
        self.apply(Op::SetNodeAttrs {
            path: path.to_vec(),
            patch: AttrPatch {
                set: attrs,
                remove: Vec::new(),
            },
        })
    }

    /// Sets the attributes from `attrs` that the node at `path` may carry.
    pub fn set_allowed_attributes(&mut self, path: &[usize], attrs: &Attrs) -> Result<(), ModelError> {
        let Some(node) = self.doc.node(path) else {
            return Err(ModelError::InvalidPath(format!("No node at {path:?}")));
        };
        let allowed = self.schema.allowed_attributes(node.kind(), attrs);
        self.set_attributes(path, allowed)
    }

    /// Makes `position` fall on a child boundary and returns that child index.
    pub fn split_text_at(&mut self, position: &Position) -> Result<usize, ModelError> {
        let Some(children) = self.doc.children(&position.path) else {
            return Err(ModelError::InvalidPath(format!(
                "No container at {:?}",
                position.path
            )));
        };
        if position.offset > max_offset(children) {
            return Err(ModelError::InvalidPath(format!(
                "Offset out of bounds in {:?}: {} > {}",
                position.path,
                position.offset,
                max_offset(children)
            )));
        }

        let (index, inner) = index_at_offset(children, position.offset);
        if inner == 0 {
            return Ok(index);
        }
        let Some(Node::Text(text)) = children.get(index) else {
            return Err(ModelError::InvalidPath("Offset inside a non-text node".into()));
        };
        if !text.text.is_char_boundary(inner) {
            return Err(ModelError::InvalidPath(format!(
                "Offset {} in {:?} is inside a character",
                position.offset, position.path
            )));
        }
        let split_at = inner;
        let tail = TextNode {
            text: text.text[split_at..].to_string(),
            attrs: text.attrs.clone(),
        };
        let len = text.text.len();

        let mut text_path = position.path.clone();
        text_path.push(index);
        self.apply(Op::RemoveText {
            path: text_path,
            range: split_at..len,
        })?;
        let mut tail_path = position.path.clone();
        tail_path.push(index + 1);
        self.apply(Op::InsertNode {
            path: tail_path,
            node: Node::Text(tail),
        })?;
        Ok(index + 1)
    }

    /// Removes the content between two offsets of the same container.
    fn remove_flat(&mut self, parent: &[usize], start: usize, end: usize) -> Result<(), ModelError> {
        if start >= end {
            return Ok(());
        }
        let end_index = self.split_text_at(&Position::new(parent.to_vec(), end))?;
        let len_before = self.child_count(parent);
        let start_index = self.split_text_at(&Position::new(parent.to_vec(), start))?;
        let end_index = end_index + (self.child_count(parent) - len_before);

        for index in (start_index..end_index).rev() {
            self.remove_node(&child_path(parent, index))?;
        }
        Ok(())
    }

    fn child_count(&self, parent: &[usize]) -> usize {
        self.doc.children(parent).map_or(0, <[Node]>::len)
    }

    /// Removes the content of `range` and returns the collapsed position left
    /// behind. The writer selection moves there.
    pub fn delete_content(
        &mut self,
        range: &Range,
        options: DeleteOptions,
    ) -> Result<Position, ModelError> {
        if range.is_collapsed() {
            return Ok(range.start.clone());
        }

        let start = range.start.clone();
        let end = range.end.clone();

        if start.path == end.path {
            self.remove_flat(&start.path, start.offset, end.offset)?;
        } else {
            self.remove_across(&start, &end)?;
        }

        let mut position = start;
        let parent_kind = self.doc.container_kind(&position.path).unwrap_or_default();
        if !options.skip_auto_paragraph
            && !self.schema.check_child(parent_kind, TEXT)
            && self.schema.check_child(parent_kind, PARAGRAPH)
        {
            debug!(path = ?position.path, "auto paragraph after delete");
            let path = self.insert_node(Node::paragraph(""), &position)?;
            position = Position::new(path, 0);
        }

        self.selection = Selection::collapsed(position.clone());
        Ok(position)
    }

    fn remove_across(&mut self, start: &Position, end: &Position) -> Result<(), ModelError> {
        let common_len = start
            .path
            .iter()
            .zip(&end.path)
            .take_while(|(a, b)| a == b)
            .count();
        let common: Path = start.path[..common_len].to_vec();

        // Right side first so indices on the left stay valid.
        if end.path.len() > common_len {
            self.remove_flat(&end.path, 0, end.offset)?;
            for depth in (common_len + 1..end.path.len()).rev() {
                let parent = &end.path[..depth];
                for index in (0..end.path[depth]).rev() {
                    self.remove_node(&child_path(parent, index))?;
                }
            }
        }

        if start.path.len() > common_len {
            let max = self.doc.children(&start.path).map_or(0, max_offset);
            self.remove_flat(&start.path, start.offset, max)?;
            for depth in (common_len + 1..start.path.len()).rev() {
                let parent = &start.path[..depth];
                let len = self.child_count(parent);
                for index in (start.path[depth] + 1..len).rev() {
                    self.remove_node(&child_path(parent, index))?;
                }
            }
        }

        let (low, shift) = if start.path.len() > common_len {
            (start.path[common_len] + 1, 0)
        } else {
            let len_before = self.child_count(&common);
            let low = self.split_text_at(start)?;
            (low, self.child_count(&common) - len_before)
        };
        let high = if end.path.len() > common_len {
            end.path[common_len] + shift
        } else {
            self.split_text_at(end)?
        };
        for index in (low..high).rev() {
            self.remove_node(&child_path(&common, index))?;
        }

        if start.path.len() == common_len + 1 && end.path.len() == common_len + 1 {
            let left = start.path.clone();
            let right = child_path(&common, start.path[common_len] + 1);
            self.merge_into_previous(&left, &right)?;
        }
        Ok(())
    }

    /// Moves the children of `right` to the end of `left` and removes `right`,
    /// when `left` accepts all of them.
    fn merge_into_previous(&mut self, left: &[usize], right: &[usize]) -> Result<bool, ModelError> {
        let (Some(left_el), Some(right_el)) = (self.doc.element(left), self.doc.element(right)) else {
            return Ok(false);
        };
        let schema = self.schema;
        if !right_el
            .children
            .iter()
            .all(|child| schema.check_child(&left_el.kind, child.kind()))
        {
            return Ok(false);
        }

        let moved = right_el.children.clone();
        let mut index = left_el.children.len();
        for child in moved {
            self.apply(Op::InsertNode {
                path: child_path(left, index),
                node: child,
            })?;
            index += 1;
        }
        self.remove_node(right)?;
        Ok(true)
    }

    /// Inserts `node` at `range`, deleting its content first.
    ///
    /// Returns the affected range, or a collapsed range at the insertion point
    /// when no ancestor accepts the node.
    pub fn insert_content(&mut self, node: Node, range: &Range) -> Result<Range, ModelError> {
        self.insert_content_at(node, range).map(|(range, _)| range)
    }

    /// Like [`Writer::insert_content`], also returning the inserted node's path.
    pub(crate) fn insert_content_at(
        &mut self,
        node: Node,
        range: &Range,
    ) -> Result<(Range, Option<Path>), ModelError> {
        let position = if range.is_collapsed() {
            range.start.clone()
        } else {
            self.delete_content(
                range,
                DeleteOptions {
                    skip_auto_paragraph: true,
                },
            )?
        };

        if !self.has_allowed_ancestor(node.kind(), &position) {
            debug!(kind = node.kind(), path = ?position.path, "no place accepts content");
            return Ok((Range::collapsed(position), None));
        }

        let mut position = position;
        let mut split_depth = 0usize;
        loop {
            let parent_kind = self.doc.container_kind(&position.path).unwrap_or_default();
            if self.schema.check_child(parent_kind, node.kind()) {
                let path = self.insert_node(node, &position)?;
                return self.finish_insertion(path, split_depth);
            }

            let parent = position.path.clone();
            let Some((&parent_index, grandparent)) = parent.split_last() else {
                return Err(ModelError::InvalidPath("Root does not accept content".into()));
            };
            let Some(parent_el) = self.doc.element(&parent) else {
                return Err(ModelError::InvalidPath(format!("No element at {parent:?}")));
            };
            let grandparent_kind = self.doc.container_kind(grandparent).unwrap_or_default();

            if parent_el.is_empty() && self.schema.check_child(grandparent_kind, node.kind()) {
                debug!(path = ?parent, "replacing empty element");
                self.remove_node(&parent)?;
                let path = child_path(grandparent, parent_index);
                self.apply(Op::InsertNode {
                    path: path.clone(),
                    node,
                })?;
                return self.finish_insertion(path, split_depth);
            }

            let max = parent_el.max_offset();
            let next = if position.offset == 0 {
                split_depth = 0;
                self.doc.position_before(&parent)
            } else if position.offset == max {
                split_depth = 0;
                self.doc.position_after(&parent)
            } else {
                split_depth += 1;
                self.split_element(&position)?;
                self.doc.position_after(&parent)
            };
            position =
                next.ok_or_else(|| ModelError::InvalidPath(format!("No element at {parent:?}")))?;
        }
    }

    fn has_allowed_ancestor(&self, kind: &str, position: &Position) -> bool {
        let path = &position.path;
        for depth in (0..=path.len()).rev() {
            let container = &path[..depth];
            let container_kind = self.doc.container_kind(container).unwrap_or_default();
            if self.schema.check_child(container_kind, kind) {
                return true;
            }
            let Some(node) = self.doc.node(container) else {
                return false;
            };
            if self.schema.is_limit(node) {
                return false;
            }
            if let Node::Element(el) = node {
                let grandparent = self.doc.container_kind(&path[..depth - 1]).unwrap_or_default();
                if el.is_empty() && self.schema.check_child(grandparent, kind) {
                    return true;
                }
            }
        }
        false
    }

    /// Splits the element containing `position` in two at that point.
    fn split_element(&mut self, position: &Position) -> Result<(), ModelError> {
        let parent = position.path.clone();
        let index = self.split_text_at(position)?;
        let Some(el) = self.doc.element(&parent) else {
            return Err(ModelError::InvalidPath(format!("No element at {parent:?}")));
        };
        let right = ElementNode {
            kind: el.kind.clone(),
            attrs: el.attrs.clone(),
            children: el.children[index..].to_vec(),
        };
        let len = el.children.len();

        for child in (index..len).rev() {
            self.remove_node(&child_path(&parent, child))?;
        }
        let Some((&parent_index, grandparent)) = parent.split_last() else {
            return Err(ModelError::InvalidPath("Cannot split the root".into()));
        };
        self.apply(Op::InsertNode {
            path: child_path(grandparent, parent_index + 1),
            node: Node::Element(right),
        })
    }

    fn finish_insertion(
        &mut self,
        path: Path,
        split_depth: usize,
    ) -> Result<(Range, Option<Path>), ModelError> {
        let range = self.affected_range(&path, split_depth)?;

        let end_kind = self.doc.container_kind(&range.end.path).unwrap_or_default();
        self.selection = if self.schema.check_child(end_kind, TEXT) {
            Selection::collapsed(range.end.clone())
        } else {
            Selection::on(self.doc(), &path)
                .ok_or_else(|| ModelError::InvalidPath(format!("No node at {path:?}")))?
        };
        Ok((range, Some(path)))
    }

    /// Range around the inserted node, reaching into the halves of every
    /// element split on the way so that deleting it joins them again.
    fn affected_range(&self, path: &[usize], split_depth: usize) -> Result<Range, ModelError> {
        let missing = || ModelError::InvalidPath(format!("No node at {path:?}"));
        let mut range = Range::on(self.doc(), path).ok_or_else(missing)?;

        let Some((&index, parent)) = path.split_last() else {
            return Ok(range);
        };
        if index == 0 {
            return Ok(range);
        }
        let mut left = child_path(parent, index - 1);
        let mut right = child_path(parent, index + 1);

        for _ in 0..split_depth {
            let (Some(left_el), Some(_)) = (self.doc.element(&left), self.doc.element(&right)) else {
                break;
            };
            range = Range::new(
                Position::new(left.clone(), left_el.max_offset()),
                Position::new(right.clone(), 0),
            );
            let last = left_el.children.len().saturating_sub(1);
            left = child_path(&left, last);
            right = child_path(&right, 0);
        }
        Ok(range)
    }
}

fn child_path(parent: &[usize], index: usize) -> Path {
    let mut path = parent.to_vec();
    path.push(index);
    path
}

#[cfg(test)]
mod tests {
    use super::child_path;

    #[test]
    fn child_path_appends_index() {
        assert_eq!(child_path(&[1, 2], 3), vec![1, 2, 3]);
        assert_eq!(child_path(&[], 0), vec![0]);
    }
}
