//! Placing object nodes (images, tables, mentions, ...) into a document.
//!
//! [`insert_object`] resolves the target selection, optionally moves a block
//! object next to the block it would otherwise split, carries block formatting
//! over to the inserted content, wraps the object in a paragraph when the
//! target only accepts paragraphs and finally places the selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::core::{Attrs, Document, Editor, ModelError, Node};
use crate::schema::{COPY_ON_REPLACE, PARAGRAPH, Schema, TEXT};
use crate::selection::{Place, Position, Range, Selectable, Selection};
use crate::writer::{DeleteOptions, Writer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsertObjectError {
    #[error("cannot insert `{kind}`: not an object")]
    NotAnObject { kind: String },
    #[error("invalid selection placement `{0}`, expected `on` or `after`")]
    InvalidSelectionPlacement(String),
    #[error("invalid optimal position `{0}`, expected `auto`, `before` or `after`")]
    InvalidOptimalPosition(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Where a block object goes relative to the block the selection is in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum OptimalPosition {
    #[default]
    Auto,
    Before,
    After,
}

impl FromStr for OptimalPosition {
    type Err = InsertObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            other => Err(InsertObjectError::InvalidOptimalPosition(other.to_string())),
        }
    }
}

impl TryFrom<String> for OptimalPosition {
    type Error = InsertObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for OptimalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Before => "before",
            Self::After => "after",
        })
    }
}

/// Where the selection goes once the object is in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum SelectionPlacement {
    /// Select the object itself.
    On,
    /// Collapse the selection right after the object, in a text-accepting
    /// block when the object is a block.
    After,
}

impl FromStr for SelectionPlacement {
    type Err = InsertObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "after" => Ok(Self::After),
            other => Err(InsertObjectError::InvalidSelectionPlacement(other.to_string())),
        }
    }
}

impl TryFrom<String> for SelectionPlacement {
    type Error = InsertObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for SelectionPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "on",
            Self::After => "after",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertObjectOptions {
    /// Search for a place that does not split the selected block. Only used
    /// for block objects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub find_optimal_position: Option<OptimalPosition>,
    /// Leaves the selection where the insertion put it when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_selection: Option<SelectionPlacement>,
}

impl InsertObjectOptions {
    /// Options used by the insert commands.
    pub fn interactive() -> Self {
        Self {
            find_optimal_position: Some(OptimalPosition::Auto),
            set_selection: Some(SelectionPlacement::After),
        }
    }
}

/// Resolves `selectable` into a selection, falling back to `current`.
pub fn normalize_selectable(
    doc: &Document,
    current: &Selection,
    selectable: &Selectable,
    place: Option<Place>,
) -> Result<Selection, ModelError> {
    match selectable {
        Selectable::None => Ok(current.clone()),
        target => Selection::create(doc, target, place),
    }
}

/// Range where a block object can go without splitting the block the
/// selection is in.
///
/// A selected block object is replaced (`Auto`) or kept with the new object
/// placed next to it. Otherwise the range is collapsed: inside an empty
/// block, after a block the focus is at the end of, or before the block.
pub fn find_optimal_insertion_range(
    doc: &Document,
    schema: &dyn Schema,
    selection: &Selection,
    placement: OptimalPosition,
) -> Range {
    let selected_object = selection.selected_element(doc).filter(|path| {
        doc.node(path)
            .is_some_and(|node| schema.is_object(node) && !schema.is_inline(node))
    });
    if let Some(path) = selected_object {
        let range = match placement {
            OptimalPosition::Before => doc.position_before(&path).map(Range::collapsed),
            OptimalPosition::After => doc.position_after(&path).map(Range::collapsed),
            OptimalPosition::Auto => Range::on(doc, &path),
        };
        if let Some(range) = range {
            return range;
        }
    }

    let at_focus = || Range::collapsed(selection.focus.clone());
    let Some(block) = selection.first_selected_block(doc, schema) else {
        return at_focus();
    };
    let Some(el) = doc.element(&block) else {
        return at_focus();
    };

    if el.is_empty() {
        return Range::collapsed(Position::new(block, 0));
    }

    if let Some(after) = doc.position_after(&block) {
        if doc.is_touching(&selection.focus, &after) {
            return Range::collapsed(after);
        }
    }

    doc.position_before(&block)
        .map(Range::collapsed)
        .unwrap_or_else(at_focus)
}

/// Whether `object` has to be wrapped in a paragraph to be placed in
/// `parent`.
pub fn needs_auto_paragraph(schema: &dyn Schema, parent: &str, object: &str) -> bool {
    !schema.check_child(parent, object)
        && schema.check_child(parent, PARAGRAPH)
        && schema.check_child(PARAGRAPH, object)
}

/// Inserts `object` at `selectable` (the editor selection when
/// [`Selectable::None`]) as one change and returns the affected range.
///
/// The range is collapsed when nothing was inserted.
pub fn insert_object(
    editor: &mut Editor,
    object: Node,
    selectable: Selectable,
    place: Option<Place>,
    options: &InsertObjectOptions,
) -> Result<Range, InsertObjectError> {
    let schema = editor.schema();
    if !schema.is_object(&object) {
        return Err(InsertObjectError::NotAnObject {
            kind: object.kind().to_string(),
        });
    }

    let doc = editor.doc();
    let original = normalize_selectable(doc, editor.selection(), &selectable, place)?;

    let mut range = original.range(doc);
    if let Some(placement) = options.find_optimal_position {
        if schema.is_block(&object) {
            range = find_optimal_insertion_range(doc, schema, &original, placement);
            debug!(%placement, start = ?range.start, end = ?range.end, "optimal insertion range");
        }
    }

    // A selected block object counts as the first selected block.
    let source = original
        .selected_element(doc)
        .filter(|path| {
            doc.node(path)
                .is_some_and(|node| schema.is_object(node) && schema.is_block(node))
        })
        .or_else(|| original.first_selected_block(doc, schema));
    let carried = source
        .and_then(|path| doc.node(&path))
        .map(|block| schema.attributes_with_property(block, COPY_ON_REPLACE, &Value::Bool(true)))
        .unwrap_or_default();

    let set_selection = options.set_selection;
    editor.change("insert_object", move |writer| -> Result<Range, InsertObjectError> {
        let position = if range.is_collapsed() {
            range.start.clone()
        } else {
            writer.delete_content(
                &range,
                DeleteOptions {
                    skip_auto_paragraph: true,
                },
            )?
        };

        let schema = writer.schema();
        let wrap = {
            let parent = writer.doc().container_kind(&position.path).unwrap_or_default();
            needs_auto_paragraph(schema, parent, object.kind())
        };
        let content = if wrap {
            debug!(kind = object.kind(), path = ?position.path, "wrapping object in a paragraph");
            Node::element(PARAGRAPH, vec![object])
        } else {
            object
        };

        let (affected, inserted) = writer.insert_content_at(content, &Range::collapsed(position))?;
        let Some(mut object_path) = inserted else {
            return Ok(affected);
        };
        writer.set_allowed_attributes(&object_path, &carried)?;
        if affected.is_collapsed() {
            return Ok(affected);
        }
        if wrap {
            object_path.push(0);
        }

        if let Some(placement) = set_selection {
            update_selection(writer, &object_path, placement, &carried)?;
        }
        Ok(affected)
    })
}

fn update_selection(
    writer: &mut Writer<'_>,
    object: &[usize],
    placement: SelectionPlacement,
    carried: &Attrs,
) -> Result<(), ModelError> {
    let schema = writer.schema();
    let missing = || ModelError::InvalidPath(format!("No node at {object:?}"));

    if placement == SelectionPlacement::On {
        let selection = Selection::on(writer.doc(), object).ok_or_else(missing)?;
        writer.set_selection(selection);
        return Ok(());
    }

    let doc = writer.doc();
    let inline = doc.node(object).is_some_and(|node| schema.is_inline(node));
    let after = doc.position_after(object).ok_or_else(missing)?;
    if inline {
        writer.set_selection(Selection::collapsed(after));
        return Ok(());
    }

    let next = doc
        .node_after(&after)
        .filter(|path| doc.node(path).is_some_and(|node| schema.check_child(node.kind(), TEXT)));
    if let Some(next) = next {
        writer.set_selection(Selection::collapsed(Position::new(next, 0)));
        return Ok(());
    }

    let parent = doc.container_kind(&after.path).unwrap_or_default();
    if !schema.check_child(parent, PARAGRAPH) {
        debug!(path = ?object, "no text position after the object");
        return Ok(());
    }

    let path = writer.insert_node(Node::paragraph(""), &after)?;
    writer.set_allowed_attributes(&path, carried)?;
    writer.set_selection(Selection::collapsed(Position::new(path, 0)));
    Ok(())
}

impl Editor {
    /// See [`insert_object`].
    pub fn insert_object(
        &mut self,
        object: Node,
        selectable: Selectable,
        place: Option<Place>,
        options: &InsertObjectOptions,
    ) -> Result<Range, InsertObjectError> {
        insert_object(self, object, selectable, place, options)
    }
}
