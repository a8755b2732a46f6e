use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::core::{Document, ModelError, Node, index_at_offset};
use crate::ops::Path;
use crate::schema::Schema;

/// A location between two units of content.
///
/// `path` addresses the containing element (empty for the root) and `offset`
/// counts text bytes and child elements before the location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub path: Path,
    pub offset: usize,
}

impl Position {
    pub fn new(path: Path, offset: usize) -> Self {
        Self { path, offset }
    }

    pub fn root(offset: usize) -> Self {
        Self {
            path: Vec::new(),
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn collapsed(position: Position) -> Self {
        Self {
            start: position.clone(),
            end: position,
        }
    }

    /// The range spanning exactly the node at `path`.
    pub fn on(doc: &Document, path: &[usize]) -> Option<Self> {
        Some(Self {
            start: doc.position_before(path)?,
            end: doc.position_after(path)?,
        })
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub focus: Position,
}

/// What a new selection should be made from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selectable {
    /// Use the editor's current selection.
    #[default]
    None,
    Selection(Selection),
    Position(Position),
    Node(Path),
}

/// Where inside or around a node target the selection goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Place {
    Offset(usize),
    End,
    Before,
    After,
    On,
    In,
}

impl Selection {
    pub fn collapsed(position: Position) -> Self {
        Self {
            anchor: position.clone(),
            focus: position,
        }
    }

    pub fn from_range(range: Range) -> Self {
        Self {
            anchor: range.start,
            focus: range.end,
        }
    }

    pub fn on(doc: &Document, path: &[usize]) -> Option<Self> {
        Range::on(doc, path).map(Self::from_range)
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    pub fn is_backward(&self, doc: &Document) -> bool {
        doc.compare(&self.anchor, &self.focus) == Ordering::Greater
    }

    /// The selected range with `start` before `end` in document order.
    pub fn range(&self, doc: &Document) -> Range {
        if self.is_backward(doc) {
            Range::new(self.focus.clone(), self.anchor.clone())
        } else {
            Range::new(self.anchor.clone(), self.focus.clone())
        }
    }

    /// Builds a selection at `target`.
    ///
    /// Position targets ignore `place`. Node targets need one. Given
    /// selections and positions must exist in `doc`.
    pub fn create(
        doc: &Document,
        target: &Selectable,
        place: Option<Place>,
    ) -> Result<Self, ModelError> {
        match target {
            Selectable::None => Err(ModelError::InvalidPath(
                "No target to create a selection from".into(),
            )),
            Selectable::Selection(selection) => {
                for position in [&selection.anchor, &selection.focus] {
                    if !doc.is_valid_position(position) {
                        return Err(ModelError::InvalidPath(format!(
                            "Position {position:?} does not exist"
                        )));
                    }
                }
                Ok(selection.clone())
            }
            Selectable::Position(position) => {
                if !doc.is_valid_position(position) {
                    return Err(ModelError::InvalidPath(format!(
                        "Position {position:?} does not exist"
                    )));
                }
                Ok(Self::collapsed(position.clone()))
            }
            Selectable::Node(path) => {
                let Some(node) = doc.node(path) else {
                    return Err(ModelError::InvalidPath(format!("No node at {path:?}")));
                };
                let place = place.ok_or(ModelError::PlacementRequired)?;
                let missing = || ModelError::InvalidPath(format!("No node at {path:?}"));
                match place {
                    Place::Before => doc.position_before(path).map(Self::collapsed).ok_or_else(missing),
                    Place::After => doc.position_after(path).map(Self::collapsed).ok_or_else(missing),
                    Place::On => Self::on(doc, path).ok_or_else(missing),
                    Place::End | Place::In | Place::Offset(_) => {
                        let Node::Element(el) = node else {
                            return Err(ModelError::InvalidPath(format!(
                                "Node at {path:?} cannot contain a selection"
                            )));
                        };
                        let max = el.max_offset();
                        match place {
                            Place::End => Ok(Self::collapsed(Position::new(path.clone(), max))),
                            Place::In => Ok(Self {
                                anchor: Position::new(path.clone(), 0),
                                focus: Position::new(path.clone(), max),
                            }),
                            Place::Offset(offset)
                                if doc.is_valid_position(&Position::new(path.clone(), offset)) =>
                            {
                                Ok(Self::collapsed(Position::new(path.clone(), offset)))
                            }
                            _ => Err(ModelError::InvalidPath(format!(
                                "Offset {place:?} is not a position in {path:?} (max {max})"
                            ))),
                        }
                    }
                }
            }
        }
    }

    /// The element the selection spans exactly, if any.
    pub fn selected_element(&self, doc: &Document) -> Option<Path> {
        let range = self.range(doc);
        if range.start.path != range.end.path || range.end.offset != range.start.offset + 1 {
            return None;
        }
        let children = doc.children(&range.start.path)?;
        let (ix, inner) = index_at_offset(children, range.start.offset);
        if inner != 0 {
            return None;
        }
        match children.get(ix) {
            Some(Node::Element(_)) => {
                let mut path = range.start.path.clone();
                path.push(ix);
                Some(path)
            }
            _ => None,
        }
    }

    /// Text blocks touched by the selection, in document order.
    ///
    /// A non-collapsed range ending at the very start of a block does not
    /// select that block.
    pub fn selected_blocks(&self, doc: &Document, schema: &dyn Schema) -> Vec<Path> {
        let range = self.range(doc);
        let mut blocks: Vec<Path> = Vec::new();

        if let Some(block) = closest_block(doc, schema, &range.start.path) {
            blocks.push(block);
        }
        if range.is_collapsed() {
            return blocks;
        }

        let mut elements = Vec::new();
        element_paths(&doc.children, &mut Vec::new(), &mut elements);
        for path in elements {
            if blocks.contains(&path) {
                continue;
            }
            if range.end.offset == 0 && range.end.path == path {
                continue;
            }
            let Some(node) = doc.node(&path) else {
                continue;
            };
            if !schema.is_text_block(node) {
                continue;
            }
            let Some(before) = doc.position_before(&path) else {
                continue;
            };
            if doc.compare(&before, &range.start) != Ordering::Less
                && doc.compare(&before, &range.end) == Ordering::Less
            {
                blocks.push(path);
            }
        }

        blocks
    }

    pub fn first_selected_block(&self, doc: &Document, schema: &dyn Schema) -> Option<Path> {
        self.selected_blocks(doc, schema).into_iter().next()
    }
}

/// Nearest text block containing `path`, not looking past limit elements.
fn closest_block(doc: &Document, schema: &dyn Schema, path: &[usize]) -> Option<Path> {
    for depth in (1..=path.len()).rev() {
        let ancestor = &path[..depth];
        let node = doc.node(ancestor)?;
        if schema.is_text_block(node) {
            return Some(ancestor.to_vec());
        }
        if schema.is_limit(node) {
            return None;
        }
    }
    None
}

fn element_paths(children: &[Node], path: &mut Vec<usize>, out: &mut Vec<Path>) {
    for (ix, node) in children.iter().enumerate() {
        let Node::Element(el) = node else {
            continue;
        };
        path.push(ix);
        out.push(path.clone());
        element_paths(&el.children, path, out);
        path.pop();
    }
}
