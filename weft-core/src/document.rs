//! Local editable model: an ordered list of blocks plus the current selection.
//!
//! All mutation goes through [`EditOp`]s. Applying an op yields a resolved
//! [`Change`] that carries everything a follower (the shared document
//! binding) needs to replay the same edit without re-reading the model.
//!
//! ```text
//!   EditOp ──► BlockDocument::apply ──► Change ──► SharedDocument::mirror
//!                     │
//!                     └── selection mapped through the edit
//! ```
//!
//! Offsets are UTF-8 byte offsets into a block's concatenated span text and
//! must fall on character boundaries.

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockKind, Mark, Marks, TextSpan};

/// A caret location: block index plus byte offset into that block's text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub block: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(block: usize, offset: usize) -> Self {
        Self { block, offset }
    }
}

/// Half-open byte range `[start, end)` inside one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub block: usize,
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(block: usize, start: usize, end: usize) -> Self {
        Self { block, start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub focus: Position,
}

impl Selection {
    pub fn caret(at: Position) -> Self {
        Self {
            anchor: at,
            focus: at,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    /// The caret position when the selection is collapsed.
    pub fn collapsed_at(&self) -> Option<Position> {
        self.is_collapsed().then_some(self.focus)
    }
}

/// A local edit against the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum EditOp {
    InsertText {
        block: usize,
        offset: usize,
        text: String,
    },
    RemoveText {
        range: TextRange,
    },
    FormatText {
        range: TextRange,
        mark: Mark,
        on: bool,
    },
    /// Replace the discriminant and type-specific fields, keeping children.
    SetBlockKind {
        block: usize,
        kind: BlockKind,
    },
    InsertBlock {
        index: usize,
        block: Block,
    },
    RemoveBlock {
        index: usize,
    },
}

/// An applied edit, resolved against the model state it was applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    TextInserted {
        block: usize,
        offset: usize,
        text: String,
        /// Marks inherited from the text preceding the insertion point.
        marks: Marks,
    },
    TextRemoved {
        block: usize,
        start: usize,
        len: usize,
    },
    TextFormatted {
        block: usize,
        start: usize,
        len: usize,
        mark: Mark,
        on: bool,
    },
    KindChanged {
        block: usize,
        kind: BlockKind,
        /// Bytes of text dropped because the new kind cannot hold text.
        cleared_len: usize,
    },
    BlockInserted {
        index: usize,
        block: Block,
    },
    BlockRemoved {
        index: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("block index {index} out of bounds (document has {len} blocks)")]
    BlockOutOfBounds { index: usize, len: usize },
    #[error("offset {offset} out of bounds for block {block} (text length {len})")]
    OffsetOutOfBounds {
        block: usize,
        offset: usize,
        len: usize,
    },
    #[error("offset {offset} in block {block} is not on a character boundary")]
    NotCharBoundary { block: usize, offset: usize },
    #[error("range start {start} is past range end {end}")]
    InvertedRange { start: usize, end: usize },
    #[error("block {0} is a divider and cannot hold text")]
    DividerText(usize),
}

/// Anything that exposes a [`BlockDocument`] and accepts edits against it.
///
/// Implemented by the bare model and by the editor session, which mirrors
/// every accepted batch into the shared document. Callers holding a
/// `&mut impl EditableModel` cannot tell the two apart.
pub trait EditableModel {
    type Error: From<EditError>;

    fn document(&self) -> &BlockDocument;

    /// Apply `ops` as one atomic batch: either all succeed or none do.
    fn apply_edits(&mut self, ops: &[EditOp]) -> Result<Vec<Change>, Self::Error>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDocument {
    blocks: Vec<Block>,
    #[serde(skip)]
    selection: Option<Selection>,
}

impl BlockDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks,
            selection: None,
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    /// Set the selection, clamping both ends into the document.
    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection.and_then(|sel| {
            Some(Selection {
                anchor: self.clamp(sel.anchor)?,
                focus: self.clamp(sel.focus)?,
            })
        });
    }

    /// Collapsed caret position, if there is one.
    pub fn caret(&self) -> Option<Position> {
        self.selection.and_then(|s| s.collapsed_at())
    }

    /// Text of the caret's block from its start up to the caret.
    pub fn text_before_caret(&self) -> Option<(Position, String)> {
        let caret = self.caret()?;
        let text = self.blocks.get(caret.block)?.text();
        let before = text.get(..caret.offset)?.to_string();
        Some((caret, before))
    }

    /// Whether every byte of `range` carries `mark`. Empty ranges report `false`.
    pub fn mark_active(&self, range: TextRange, mark: Mark) -> bool {
        let Some(block) = self.blocks.get(range.block) else {
            return false;
        };
        if range.is_empty() {
            return false;
        }
        let mut pos = 0;
        for span in &block.children {
            let end = pos + span.len();
            if end > range.start && pos < range.end && !span.marks.get(mark) {
                return false;
            }
            pos = end;
        }
        true
    }

    /// Replace the whole block list, e.g. after a remote rebuild.
    ///
    /// The selection survives where it still points inside the document.
    pub fn replace_blocks(&mut self, blocks: Vec<Block>) {
        self.blocks = blocks;
        let selection = self.selection;
        self.set_selection(selection);
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.blocks)
    }

    /// Apply a single edit in place.
    pub fn apply(&mut self, op: &EditOp) -> Result<Change, EditError> {
        let change = match op {
            EditOp::InsertText {
                block,
                offset,
                text,
            } => {
                let target = self.block_mut(*block)?;
                if target.kind == BlockKind::Divider {
                    return Err(EditError::DividerText(*block));
                }
                check_offset(target, *block, *offset)?;
                let marks = marks_before(&target.children, *offset);
                let at = split_spans(&mut target.children, *offset);
                target
                    .children
                    .insert(at, TextSpan::marked(text.clone(), marks));
                target.normalize();
                Change::TextInserted {
                    block: *block,
                    offset: *offset,
                    text: text.clone(),
                    marks,
                }
            }
            EditOp::RemoveText { range } => {
                let target = self.block_mut(range.block)?;
                check_range(target, range)?;
                let from = split_spans(&mut target.children, range.start);
                let to = split_spans(&mut target.children, range.end);
                target.children.drain(from..to);
                target.normalize();
                Change::TextRemoved {
                    block: range.block,
                    start: range.start,
                    len: range.len(),
                }
            }
            EditOp::FormatText { range, mark, on } => {
                let target = self.block_mut(range.block)?;
                check_range(target, range)?;
                let from = split_spans(&mut target.children, range.start);
                let to = split_spans(&mut target.children, range.end);
                for span in &mut target.children[from..to] {
                    span.marks.set(*mark, *on);
                }
                target.normalize();
                Change::TextFormatted {
                    block: range.block,
                    start: range.start,
                    len: range.len(),
                    mark: *mark,
                    on: *on,
                }
            }
            EditOp::SetBlockKind { block, kind } => {
                let target = self.block_mut(*block)?;
                let before = target.text_len();
                target.set_kind(kind.clone());
                Change::KindChanged {
                    block: *block,
                    kind: kind.clone(),
                    cleared_len: before - target.text_len(),
                }
            }
            EditOp::InsertBlock { index, block } => {
                if *index > self.blocks.len() {
                    return Err(EditError::BlockOutOfBounds {
                        index: *index,
                        len: self.blocks.len(),
                    });
                }
                let block = Block::with_kind(block.kind.clone(), block.children.clone());
                self.blocks.insert(*index, block.clone());
                Change::BlockInserted {
                    index: *index,
                    block,
                }
            }
            EditOp::RemoveBlock { index } => {
                self.block_mut(*index)?;
                self.blocks.remove(*index);
                Change::BlockRemoved { index: *index }
            }
        };
        self.map_selection(&change);
        Ok(change)
    }

    fn block_mut(&mut self, index: usize) -> Result<&mut Block, EditError> {
        let len = self.blocks.len();
        self.blocks
            .get_mut(index)
            .ok_or(EditError::BlockOutOfBounds { index, len })
    }

    fn clamp(&self, pos: Position) -> Option<Position> {
        let last = self.blocks.len().checked_sub(1)?;
        let block = pos.block.min(last);
        let text = self.blocks[block].text();
        let mut offset = pos.offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        Some(Position { block, offset })
    }

    fn map_selection(&mut self, change: &Change) {
        let Some(sel) = self.selection else {
            return;
        };
        let map = |pos: Position| map_position(pos, change);
        let mapped = Selection {
            anchor: map(sel.anchor),
            focus: map(sel.focus),
        };
        self.set_selection(Some(mapped));
    }
}

impl EditableModel for BlockDocument {
    type Error = EditError;

    fn document(&self) -> &BlockDocument {
        self
    }

    fn apply_edits(&mut self, ops: &[EditOp]) -> Result<Vec<Change>, EditError> {
        let mut next = self.clone();
        let changes = ops
            .iter()
            .map(|op| next.apply(op))
            .collect::<Result<Vec<_>, _>>()?;
        *self = next;
        Ok(changes)
    }
}

fn map_position(pos: Position, change: &Change) -> Position {
    match change {
        Change::TextInserted {
            block,
            offset,
            text,
            ..
        } if pos.block == *block && pos.offset >= *offset => Position {
            offset: pos.offset + text.len(),
            ..pos
        },
        Change::TextRemoved { block, start, len } if pos.block == *block => {
            let offset = if pos.offset <= *start {
                pos.offset
            } else if pos.offset <= start + len {
                *start
            } else {
                pos.offset - len
            };
            Position { offset, ..pos }
        }
        Change::KindChanged {
            block, cleared_len, ..
        } if pos.block == *block && *cleared_len > 0 => Position { offset: 0, ..pos },
        Change::BlockInserted { index, .. } if pos.block >= *index => Position {
            block: pos.block + 1,
            ..pos
        },
        Change::BlockRemoved { index } if pos.block > *index => Position {
            block: pos.block - 1,
            ..pos
        },
        Change::BlockRemoved { index } if pos.block == *index => Position {
            block: index.saturating_sub(1),
            offset: usize::MAX,
        },
        _ => pos,
    }
}

fn check_offset(block: &Block, index: usize, offset: usize) -> Result<(), EditError> {
    let len = block.text_len();
    if offset > len {
        return Err(EditError::OffsetOutOfBounds {
            block: index,
            offset,
            len,
        });
    }
    if !block.text().is_char_boundary(offset) {
        return Err(EditError::NotCharBoundary {
            block: index,
            offset,
        });
    }
    Ok(())
}

fn check_range(block: &Block, range: &TextRange) -> Result<(), EditError> {
    if range.start > range.end {
        return Err(EditError::InvertedRange {
            start: range.start,
            end: range.end,
        });
    }
    check_offset(block, range.block, range.start)?;
    check_offset(block, range.block, range.end)
}

/// Marks of the byte just before `offset`, or of the first span at offset 0.
fn marks_before(spans: &[TextSpan], offset: usize) -> Marks {
    let mut pos = 0;
    for span in spans {
        let end = pos + span.len();
        if offset == 0 || (offset > pos && offset <= end) {
            return span.marks;
        }
        pos = end;
    }
    Marks::NONE
}

/// Ensure a span boundary at `offset` and return the index of the first span
/// starting there.
fn split_spans(spans: &mut Vec<TextSpan>, offset: usize) -> usize {
    let mut pos = 0;
    for i in 0..spans.len() {
        let len = spans[i].len();
        if offset == pos {
            return i;
        }
        if offset < pos + len {
            let tail = spans[i].text.split_off(offset - pos);
            let marks = spans[i].marks;
            spans.insert(i + 1, TextSpan::marked(tail, marks));
            return i + 1;
        }
        pos += len;
    }
    spans.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;

    fn doc_with(text: &str) -> BlockDocument {
        let mut doc = BlockDocument::from_blocks(vec![Block::paragraph(text)]);
        doc.set_selection(Some(Selection::caret(Position::new(0, text.len()))));
        doc
    }

    #[test]
    fn test_insert_moves_caret() {
        let mut doc = doc_with("hello");
        doc.apply(&EditOp::InsertText {
            block: 0,
            offset: 5,
            text: " world".into(),
        })
        .unwrap();
        assert_eq!(doc.blocks()[0].text(), "hello world");
        assert_eq!(doc.caret(), Some(Position::new(0, 11)));
    }

    #[test]
    fn test_insert_inherits_preceding_marks() {
        let mut doc = doc_with("ab");
        doc.apply(&EditOp::FormatText {
            range: TextRange::new(0, 0, 1),
            mark: Mark::Bold,
            on: true,
        })
        .unwrap();
        let change = doc
            .apply(&EditOp::InsertText {
                block: 0,
                offset: 1,
                text: "X".into(),
            })
            .unwrap();
        match change {
            Change::TextInserted { marks, .. } => assert!(marks.bold),
            other => panic!("unexpected change {other:?}"),
        }
        let block = &doc.blocks()[0];
        assert_eq!(block.children[0].text, "aX");
        assert!(block.children[0].marks.bold);
        assert_eq!(block.children[1].text, "b");
    }

    #[test]
    fn test_remove_collapses_caret_into_range() {
        let mut doc = doc_with("hello /tod");
        doc.apply(&EditOp::RemoveText {
            range: TextRange::new(0, 6, 10),
        })
        .unwrap();
        assert_eq!(doc.blocks()[0].text(), "hello ");
        assert_eq!(doc.caret(), Some(Position::new(0, 6)));
    }

    #[test]
    fn test_remove_everything_leaves_empty_span() {
        let mut doc = doc_with("gone");
        doc.apply(&EditOp::RemoveText {
            range: TextRange::new(0, 0, 4),
        })
        .unwrap();
        assert_eq!(doc.blocks()[0].children, vec![TextSpan::empty()]);
        assert!(doc.blocks()[0].validate().is_ok());
    }

    #[test]
    fn test_rejects_non_char_boundary() {
        let mut doc = doc_with("텍스트");
        let err = doc
            .apply(&EditOp::InsertText {
                block: 0,
                offset: 1,
                text: "x".into(),
            })
            .unwrap_err();
        assert_eq!(err, EditError::NotCharBoundary { block: 0, offset: 1 });
    }

    #[test]
    fn test_divider_rejects_text() {
        let mut doc = BlockDocument::from_blocks(vec![Block::new(BlockType::Divider, vec![])]);
        let err = doc
            .apply(&EditOp::InsertText {
                block: 0,
                offset: 0,
                text: "x".into(),
            })
            .unwrap_err();
        assert_eq!(err, EditError::DividerText(0));
    }

    #[test]
    fn test_set_kind_to_divider_reports_cleared_text() {
        let mut doc = doc_with("abc");
        let change = doc
            .apply(&EditOp::SetBlockKind {
                block: 0,
                kind: BlockKind::Divider,
            })
            .unwrap();
        assert_eq!(
            change,
            Change::KindChanged {
                block: 0,
                kind: BlockKind::Divider,
                cleared_len: 3
            }
        );
        assert_eq!(doc.caret(), Some(Position::new(0, 0)));
    }

    #[test]
    fn test_block_insert_and_remove_shift_selection() {
        let mut doc = doc_with("one");
        doc.apply(&EditOp::InsertBlock {
            index: 0,
            block: Block::paragraph("zero"),
        })
        .unwrap();
        assert_eq!(doc.caret(), Some(Position::new(1, 3)));

        doc.apply(&EditOp::RemoveBlock { index: 1 }).unwrap();
        assert_eq!(doc.caret(), Some(Position::new(0, 4)));
    }

    #[test]
    fn test_batch_is_atomic() {
        let mut doc = doc_with("keep");
        let result = doc.apply_edits(&[
            EditOp::InsertText {
                block: 0,
                offset: 0,
                text: ">> ".into(),
            },
            EditOp::RemoveBlock { index: 7 },
        ]);
        assert!(result.is_err());
        assert_eq!(doc.blocks()[0].text(), "keep");
    }

    #[test]
    fn test_mark_active() {
        let mut doc = doc_with("abcd");
        doc.apply(&EditOp::FormatText {
            range: TextRange::new(0, 1, 3),
            mark: Mark::Italic,
            on: true,
        })
        .unwrap();
        assert!(doc.mark_active(TextRange::new(0, 1, 3), Mark::Italic));
        assert!(!doc.mark_active(TextRange::new(0, 0, 3), Mark::Italic));
    }

    #[test]
    fn test_text_before_caret() {
        let mut doc = doc_with("hello /tod");
        let (caret, before) = doc.text_before_caret().unwrap();
        assert_eq!(caret, Position::new(0, 10));
        assert_eq!(before, "hello /tod");

        doc.set_selection(Some(Selection {
            anchor: Position::new(0, 0),
            focus: Position::new(0, 3),
        }));
        assert!(doc.text_before_caret().is_none());
    }

    #[test]
    fn test_replace_blocks_clamps_selection() {
        let mut doc = doc_with("a long line");
        doc.replace_blocks(vec![Block::paragraph("short")]);
        assert_eq!(doc.caret(), Some(Position::new(0, 5)));
        doc.replace_blocks(Vec::new());
        assert_eq!(doc.selection(), None);
    }

    #[test]
    fn test_to_json() {
        let doc = doc_with("hi");
        let json = doc.to_json().unwrap();
        assert!(json.contains("\"type\": \"paragraph\""));
    }
}
