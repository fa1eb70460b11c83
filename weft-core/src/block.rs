//! Block schema: the closed set of block types and the construction
//! contract that keeps their type-specific fields consistent.
//!
//! Every block carries a [`BlockKind`] (the discriminant plus the fields that
//! only exist for that discriminant) and a list of inline [`TextSpan`]s.
//!
//! ```text
//!   tag ("todo") ──► BlockType::from_tag ──► BlockKind::default_for ──► Block
//!        │                  │                          │
//!   unknown tags     falls back to            fills defaults
//!                    Paragraph                (checked=false, …)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of a block, independent of its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockType {
    Paragraph,
    HeadingOne,
    HeadingTwo,
    HeadingThree,
    BulletedList,
    NumberedList,
    Todo,
    Toggle,
    Quote,
    Code,
    Divider,
    Image,
}

impl BlockType {
    pub const ALL: [BlockType; 12] = [
        BlockType::Paragraph,
        BlockType::HeadingOne,
        BlockType::HeadingTwo,
        BlockType::HeadingThree,
        BlockType::BulletedList,
        BlockType::NumberedList,
        BlockType::Todo,
        BlockType::Toggle,
        BlockType::Quote,
        BlockType::Code,
        BlockType::Divider,
        BlockType::Image,
    ];

    /// Wire tag used in the shared document.
    pub fn tag(self) -> &'static str {
        match self {
            BlockType::Paragraph => "paragraph",
            BlockType::HeadingOne => "heading-one",
            BlockType::HeadingTwo => "heading-two",
            BlockType::HeadingThree => "heading-three",
            BlockType::BulletedList => "bulleted-list",
            BlockType::NumberedList => "numbered-list",
            BlockType::Todo => "todo",
            BlockType::Toggle => "toggle",
            BlockType::Quote => "quote",
            BlockType::Code => "code",
            BlockType::Divider => "divider",
            BlockType::Image => "image",
        }
    }

    /// Strict lookup. Returns `None` for tags this schema version does not know.
    pub fn try_from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.tag() == tag)
    }

    /// Lenient lookup used when reading content written by other peers.
    ///
    /// Unknown tags degrade to [`BlockType::Paragraph`] so a peer running an
    /// older schema still renders the text of blocks it does not understand.
    pub fn from_tag(tag: &str) -> Self {
        Self::try_from_tag(tag).unwrap_or_else(|| {
            log::debug!("Unknown block tag {tag:?}, treating as paragraph");
            BlockType::Paragraph
        })
    }

    pub fn is_heading(self) -> bool {
        matches!(
            self,
            BlockType::HeadingOne | BlockType::HeadingTwo | BlockType::HeadingThree
        )
    }

    pub fn is_list(self) -> bool {
        matches!(self, BlockType::BulletedList | BlockType::NumberedList)
    }

    pub fn is_todo(self) -> bool {
        self == BlockType::Todo
    }

    pub fn is_toggle(self) -> bool {
        self == BlockType::Toggle
    }

    /// Heading depth (1–3), `None` for non-headings.
    pub fn heading_level(self) -> Option<u8> {
        match self {
            BlockType::HeadingOne => Some(1),
            BlockType::HeadingTwo => Some(2),
            BlockType::HeadingThree => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Block discriminant together with its type-specific fields.
///
/// Field presence is enforced by construction: a `Todo` cannot exist
/// without `checked`, a paragraph cannot carry one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BlockKind {
    Paragraph,
    HeadingOne,
    HeadingTwo,
    HeadingThree,
    BulletedList,
    NumberedList,
    Todo {
        checked: bool,
    },
    Toggle {
        collapsed: bool,
    },
    Quote,
    Code {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Divider,
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
    },
}

impl BlockKind {
    /// Kind with the defaults a freshly created block of `ty` carries.
    pub fn default_for(ty: BlockType) -> Self {
        match ty {
            BlockType::Paragraph => BlockKind::Paragraph,
            BlockType::HeadingOne => BlockKind::HeadingOne,
            BlockType::HeadingTwo => BlockKind::HeadingTwo,
            BlockType::HeadingThree => BlockKind::HeadingThree,
            BlockType::BulletedList => BlockKind::BulletedList,
            BlockType::NumberedList => BlockKind::NumberedList,
            BlockType::Todo => BlockKind::Todo { checked: false },
            BlockType::Toggle => BlockKind::Toggle { collapsed: false },
            BlockType::Quote => BlockKind::Quote,
            BlockType::Code => BlockKind::Code { language: None },
            BlockType::Divider => BlockKind::Divider,
            BlockType::Image => BlockKind::Image {
                url: String::new(),
                alt: None,
            },
        }
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            BlockKind::Paragraph => BlockType::Paragraph,
            BlockKind::HeadingOne => BlockType::HeadingOne,
            BlockKind::HeadingTwo => BlockType::HeadingTwo,
            BlockKind::HeadingThree => BlockType::HeadingThree,
            BlockKind::BulletedList => BlockType::BulletedList,
            BlockKind::NumberedList => BlockType::NumberedList,
            BlockKind::Todo { .. } => BlockType::Todo,
            BlockKind::Toggle { .. } => BlockType::Toggle,
            BlockKind::Quote => BlockType::Quote,
            BlockKind::Code { .. } => BlockType::Code,
            BlockKind::Divider => BlockType::Divider,
            BlockKind::Image { .. } => BlockType::Image,
        }
    }
}

impl Default for BlockKind {
    fn default() -> Self {
        BlockKind::Paragraph
    }
}

/// One of the five orthogonal inline marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Bold,
    Italic,
    Underline,
    Code,
    Strikethrough,
}

impl Mark {
    pub const ALL: [Mark; 5] = [
        Mark::Bold,
        Mark::Italic,
        Mark::Underline,
        Mark::Code,
        Mark::Strikethrough,
    ];

    /// Attribute key in the shared text.
    pub fn key(self) -> &'static str {
        match self {
            Mark::Bold => "bold",
            Mark::Italic => "italic",
            Mark::Underline => "underline",
            Mark::Code => "code",
            Mark::Strikethrough => "strikethrough",
        }
    }
}

/// Set of marks applied to a span. Marks combine freely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Marks {
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub underline: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub code: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub strikethrough: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Marks {
    pub const NONE: Marks = Marks {
        bold: false,
        italic: false,
        underline: false,
        code: false,
        strikethrough: false,
    };

    pub fn get(&self, mark: Mark) -> bool {
        match mark {
            Mark::Bold => self.bold,
            Mark::Italic => self.italic,
            Mark::Underline => self.underline,
            Mark::Code => self.code,
            Mark::Strikethrough => self.strikethrough,
        }
    }

    pub fn set(&mut self, mark: Mark, on: bool) {
        match mark {
            Mark::Bold => self.bold = on,
            Mark::Italic => self.italic = on,
            Mark::Underline => self.underline = on,
            Mark::Code => self.code = on,
            Mark::Strikethrough => self.strikethrough = on,
        }
    }

    pub fn with(mut self, mark: Mark) -> Self {
        self.set(mark, true);
        self
    }

    pub fn is_plain(&self) -> bool {
        *self == Marks::NONE
    }

    /// Marks that are switched on, in declaration order.
    pub fn active(&self) -> impl Iterator<Item = Mark> + '_ {
        Mark::ALL.into_iter().filter(|m| self.get(*m))
    }
}

/// Leaf inline node: a run of text sharing one set of marks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    #[serde(flatten)]
    pub marks: Marks,
}

impl TextSpan {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marks: Marks::NONE,
        }
    }

    pub fn marked(text: impl Into<String>, marks: Marks) -> Self {
        Self {
            text: text.into(),
            marks,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Invariant violations reported by [`Block::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("block has no children")]
    NoChildren,
    #[error("divider must carry exactly one empty child, found {0} children")]
    DividerChildren(usize),
    #[error("empty span at index {0} is not the sole child")]
    StrayEmptySpan(usize),
}

/// A structured content node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub kind: BlockKind,
    pub children: Vec<TextSpan>,
}

impl Block {
    /// Construct a block of type `ty` around `children`.
    ///
    /// Type-specific fields get their defaults and children are normalized
    /// so the result always passes [`Block::validate`].
    pub fn new(ty: BlockType, children: Vec<TextSpan>) -> Self {
        Self::with_kind(BlockKind::default_for(ty), children)
    }

    pub fn with_kind(kind: BlockKind, children: Vec<TextSpan>) -> Self {
        let mut block = Self { kind, children };
        block.normalize();
        block
    }

    /// Construct from a raw tag; unknown tags yield a paragraph.
    pub fn from_tag(tag: &str, children: Vec<TextSpan>) -> Self {
        Self::new(BlockType::from_tag(tag), children)
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::new(BlockType::Paragraph, vec![TextSpan::plain(text)])
    }

    pub fn block_type(&self) -> BlockType {
        self.kind.block_type()
    }

    /// Switch this block to `ty` in place.
    ///
    /// Children survive the transform; type-specific fields are replaced by
    /// the defaults of the new type. A divider drops its text to keep the
    /// single-empty-child shape.
    pub fn set_type(&mut self, ty: BlockType) {
        self.set_kind(BlockKind::default_for(ty));
    }

    pub fn set_kind(&mut self, kind: BlockKind) {
        self.kind = kind;
        self.normalize();
    }

    /// Concatenated text of all spans.
    pub fn text(&self) -> String {
        self.children.iter().map(|s| s.text.as_str()).collect()
    }

    /// Text length in bytes.
    pub fn text_len(&self) -> usize {
        self.children.iter().map(TextSpan::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.text_len() == 0
    }

    /// Re-establish the children invariants.
    ///
    /// Drops empty spans, merges neighbours with identical marks and leaves
    /// a single plain empty span when nothing else remains.
    pub fn normalize(&mut self) {
        if self.kind == BlockKind::Divider {
            self.children = vec![TextSpan::empty()];
            return;
        }

        let mut merged: Vec<TextSpan> = Vec::with_capacity(self.children.len());
        for span in self.children.drain(..) {
            if span.is_empty() {
                continue;
            }
            match merged.last_mut() {
                Some(prev) if prev.marks == span.marks => prev.text.push_str(&span.text),
                _ => merged.push(span),
            }
        }
        if merged.is_empty() {
            merged.push(TextSpan::empty());
        }
        self.children = merged;
    }

    /// Check the children invariants without modifying the block.
    pub fn validate(&self) -> Result<(), SchemaViolation> {
        if self.children.is_empty() {
            return Err(SchemaViolation::NoChildren);
        }
        if self.kind == BlockKind::Divider {
            if self.children.len() != 1 || !self.children[0].is_empty() {
                return Err(SchemaViolation::DividerChildren(self.children.len()));
            }
            return Ok(());
        }
        if self.children.len() > 1 {
            if let Some(i) = self.children.iter().position(TextSpan::is_empty) {
                return Err(SchemaViolation::StrayEmptySpan(i));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_constructs_valid_block() {
        for ty in BlockType::ALL {
            let block = Block::new(ty, vec![TextSpan::plain("hello")]);
            assert_eq!(block.block_type(), ty);
            assert!(block.validate().is_ok(), "{ty} should validate");
        }
    }

    #[test]
    fn test_defaults_for_stateful_types() {
        assert_eq!(
            Block::new(BlockType::Todo, vec![]).kind,
            BlockKind::Todo { checked: false }
        );
        assert_eq!(
            Block::new(BlockType::Toggle, vec![]).kind,
            BlockKind::Toggle { collapsed: false }
        );
        assert_eq!(
            Block::new(BlockType::Code, vec![]).kind,
            BlockKind::Code { language: None }
        );
    }

    #[test]
    fn test_unknown_tag_degrades_to_paragraph() {
        let block = Block::from_tag("kanban-board", vec![TextSpan::plain("cards")]);
        assert_eq!(block.block_type(), BlockType::Paragraph);
        assert_eq!(block.text(), "cards");
        assert!(block.validate().is_ok());
        assert_eq!(BlockType::try_from_tag("kanban-board"), None);
    }

    #[test]
    fn test_tags_roundtrip() {
        for ty in BlockType::ALL {
            assert_eq!(BlockType::from_tag(ty.tag()), ty);
        }
    }

    #[test]
    fn test_capability_predicates() {
        assert!(BlockType::HeadingTwo.is_heading());
        assert!(!BlockType::Paragraph.is_heading());
        assert!(BlockType::NumberedList.is_list());
        assert!(BlockType::BulletedList.is_list());
        assert!(!BlockType::Todo.is_list());
        assert!(BlockType::Todo.is_todo());
        assert!(BlockType::Toggle.is_toggle());
        assert_eq!(BlockType::HeadingThree.heading_level(), Some(3));
        assert_eq!(BlockType::Quote.heading_level(), None);
    }

    #[test]
    fn test_empty_children_become_single_empty_span() {
        let block = Block::new(BlockType::Quote, vec![]);
        assert_eq!(block.children, vec![TextSpan::empty()]);
        assert!(block.validate().is_ok());
    }

    #[test]
    fn test_divider_carries_one_empty_child() {
        let mut block = Block::paragraph("will vanish");
        block.set_type(BlockType::Divider);
        assert_eq!(block.children, vec![TextSpan::empty()]);
        assert!(block.validate().is_ok());
    }

    #[test]
    fn test_set_type_preserves_children() {
        let bold = Marks::NONE.with(Mark::Bold);
        let mut block = Block::new(
            BlockType::Paragraph,
            vec![TextSpan::plain("buy "), TextSpan::marked("milk", bold)],
        );
        block.set_type(BlockType::Todo);
        assert_eq!(block.kind, BlockKind::Todo { checked: false });
        assert_eq!(block.children.len(), 2);
        assert_eq!(block.text(), "buy milk");
    }

    #[test]
    fn test_normalize_merges_equal_marks() {
        let block = Block::new(
            BlockType::Paragraph,
            vec![
                TextSpan::plain("a"),
                TextSpan::empty(),
                TextSpan::plain("b"),
                TextSpan::marked("c", Marks::NONE.with(Mark::Italic)),
            ],
        );
        assert_eq!(block.children.len(), 2);
        assert_eq!(block.children[0].text, "ab");
    }

    #[test]
    fn test_validate_rejects_stray_empty_span() {
        let block = Block {
            kind: BlockKind::Paragraph,
            children: vec![TextSpan::plain("x"), TextSpan::empty()],
        };
        assert_eq!(block.validate(), Err(SchemaViolation::StrayEmptySpan(1)));

        let block = Block {
            kind: BlockKind::Paragraph,
            children: vec![],
        };
        assert_eq!(block.validate(), Err(SchemaViolation::NoChildren));
    }

    #[test]
    fn test_json_shape_matches_wire_names() {
        let block = Block::new(BlockType::Todo, vec![TextSpan::plain("ship it")]);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "todo");
        assert_eq!(json["checked"], false);
        assert_eq!(json["children"][0]["text"], "ship it");
        assert!(json["children"][0].get("bold").is_none());

        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_marks_combine() {
        let marks = Marks::NONE.with(Mark::Bold).with(Mark::Strikethrough);
        let active: Vec<Mark> = marks.active().collect();
        assert_eq!(active, vec![Mark::Bold, Mark::Strikethrough]);
        assert!(!marks.is_plain());
    }
}
