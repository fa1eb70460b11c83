//! Slash-command palette.
//!
//! ```text
//!            caret after "/word"
//!   Closed ─────────────────────────► Open(trigger, search)
//!     ▲                                 │  │ caret still after "/word"
//!     │  Escape / no match / commit     │  └──► Open (search updated)
//!     └─────────────────────────────────┘
//! ```
//!
//! The palette never touches a document directly. Committing an entry
//! issues one edit batch against an [`EditableModel`], so a session
//! mirrors it to peers like any other local edit.

use weft_core::{BlockDocument, BlockKind, BlockType, Change, EditOp, EditableModel, TextRange};

/// One selectable entry of the palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandItem {
    pub block_type: BlockType,
    pub title: &'static str,
    pub description: &'static str,
    pub keywords: &'static [&'static str],
}

impl CommandItem {
    /// Case-insensitive substring match on the title or any keyword.
    pub fn matches(&self, search: &str) -> bool {
        let needle = search.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self
                .keywords
                .iter()
                .any(|k| k.to_lowercase().contains(&needle))
    }
}

/// Palette entries in display order. Images have no entry.
pub const CATALOG: [CommandItem; 11] = [
    CommandItem {
        block_type: BlockType::Paragraph,
        title: "Text",
        description: "Plain text block",
        keywords: &["text", "paragraph", "p", "텍스트", "문단"],
    },
    CommandItem {
        block_type: BlockType::HeadingOne,
        title: "Heading 1",
        description: "Large section heading",
        keywords: &["h1", "heading", "title", "제목", "헤딩"],
    },
    CommandItem {
        block_type: BlockType::HeadingTwo,
        title: "Heading 2",
        description: "Medium section heading",
        keywords: &["h2", "heading", "title", "제목"],
    },
    CommandItem {
        block_type: BlockType::HeadingThree,
        title: "Heading 3",
        description: "Small section heading",
        keywords: &["h3", "heading", "title", "제목"],
    },
    CommandItem {
        block_type: BlockType::BulletedList,
        title: "Bulleted list",
        description: "Simple bulleted list",
        keywords: &["ul", "bullet", "list", "목록", "리스트"],
    },
    CommandItem {
        block_type: BlockType::NumberedList,
        title: "Numbered list",
        description: "List with numbering",
        keywords: &["ol", "number", "ordered", "list", "목록", "번호"],
    },
    CommandItem {
        block_type: BlockType::Todo,
        title: "To-do",
        description: "Track tasks with a checkbox",
        keywords: &["todo", "checkbox", "task", "할일", "체크"],
    },
    CommandItem {
        block_type: BlockType::Toggle,
        title: "Toggle",
        description: "Collapsible content",
        keywords: &["toggle", "collapse", "토글", "접기"],
    },
    CommandItem {
        block_type: BlockType::Quote,
        title: "Quote",
        description: "Capture a quotation",
        keywords: &["quote", "blockquote", "인용", "인용문"],
    },
    CommandItem {
        block_type: BlockType::Code,
        title: "Code",
        description: "Code snippet",
        keywords: &["code", "pre", "코드"],
    },
    CommandItem {
        block_type: BlockType::Divider,
        title: "Divider",
        description: "Visual separator",
        keywords: &["divider", "hr", "line", "구분선", "선"],
    },
];

/// Catalog entries matching `search`, in catalog order.
pub fn filter_catalog(search: &str) -> Vec<&'static CommandItem> {
    CATALOG.iter().filter(|item| item.matches(search)).collect()
}

/// A `/word` right before a collapsed caret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// From the slash up to the caret.
    pub range: TextRange,
    pub search: String,
}

/// Detect a palette trigger at the document's caret.
///
/// Matches a `/` followed by zero or more ASCII word characters
/// (`[A-Za-z0-9_]`) ending exactly at the caret. Range selections never
/// match.
pub fn match_trigger(doc: &BlockDocument) -> Option<Trigger> {
    let (caret, before) = doc.text_before_caret()?;
    let word_start = before
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
        .last()
        .map_or(before.len(), |(i, _)| i);
    let slash = word_start.checked_sub(1)?;
    if before.as_bytes().get(slash) != Some(&b'/') {
        return None;
    }
    Some(Trigger {
        range: TextRange::new(caret.block, slash, caret.offset),
        search: before[word_start..].to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PaletteState {
    #[default]
    Closed,
    Open(Trigger),
}

/// Keys the palette reacts to while open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteKey {
    Up,
    Down,
    Enter,
    Escape,
}

/// What a key press did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaletteAction {
    /// Palette closed or key not handled
    Ignored,
    Highlighted(usize),
    Committed(BlockType),
    Closed,
}

#[derive(Debug, Default)]
pub struct CommandPalette {
    state: PaletteState,
    highlighted: usize,
}

impl CommandPalette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PaletteState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PaletteState::Open(_))
    }

    pub fn search(&self) -> Option<&str> {
        match &self.state {
            PaletteState::Open(trigger) => Some(&trigger.search),
            PaletteState::Closed => None,
        }
    }

    pub fn trigger(&self) -> Option<&Trigger> {
        match &self.state {
            PaletteState::Open(trigger) => Some(trigger),
            PaletteState::Closed => None,
        }
    }

    pub fn highlighted(&self) -> usize {
        self.highlighted
    }

    /// Visible entries; empty while closed.
    pub fn items(&self) -> Vec<&'static CommandItem> {
        self.search().map(filter_catalog).unwrap_or_default()
    }

    /// Re-evaluate the trigger after the selection or text changed.
    pub fn on_selection_change(&mut self, doc: &BlockDocument) {
        match match_trigger(doc) {
            Some(trigger) => {
                if self.search() != Some(trigger.search.as_str()) {
                    self.highlighted = 0;
                }
                log::trace!("Palette open, search {:?}", trigger.search);
                self.state = PaletteState::Open(trigger);
            }
            None => self.close(),
        }
    }

    pub fn close(&mut self) {
        if self.is_open() {
            log::trace!("Palette closed");
        }
        self.state = PaletteState::Closed;
        self.highlighted = 0;
    }

    /// Move the highlight onto entry `index` (pointer hover).
    pub fn hover(&mut self, index: usize) {
        if index < self.items().len() {
            self.highlighted = index;
        }
    }

    pub fn handle_key<M: EditableModel>(
        &mut self,
        key: PaletteKey,
        model: &mut M,
    ) -> Result<PaletteAction, M::Error> {
        if !self.is_open() {
            return Ok(PaletteAction::Ignored);
        }
        let items = self.items();
        match key {
            PaletteKey::Down | PaletteKey::Up if items.is_empty() => Ok(PaletteAction::Ignored),
            PaletteKey::Down => {
                self.highlighted = (self.highlighted + 1) % items.len();
                Ok(PaletteAction::Highlighted(self.highlighted))
            }
            PaletteKey::Up => {
                self.highlighted = (self.highlighted + items.len() - 1) % items.len();
                Ok(PaletteAction::Highlighted(self.highlighted))
            }
            PaletteKey::Enter => match items.get(self.highlighted) {
                Some(item) => self.commit(item.block_type, model),
                None => Ok(PaletteAction::Ignored),
            },
            PaletteKey::Escape => {
                self.close();
                Ok(PaletteAction::Closed)
            }
        }
    }

    /// Commit entry `index` (pointer click).
    pub fn click<M: EditableModel>(
        &mut self,
        index: usize,
        model: &mut M,
    ) -> Result<PaletteAction, M::Error> {
        match self.items().get(index) {
            Some(item) => self.commit(item.block_type, model),
            None => Ok(PaletteAction::Ignored),
        }
    }

    fn commit<M: EditableModel>(
        &mut self,
        block_type: BlockType,
        model: &mut M,
    ) -> Result<PaletteAction, M::Error> {
        self.insert_block(block_type, model)?;
        Ok(PaletteAction::Committed(block_type))
    }

    /// Delete the trigger text and turn its block into `block_type`.
    ///
    /// Both edits go out as one batch. The block keeps its remaining text;
    /// type-specific fields start from their defaults, except that picking
    /// the type a todo or toggle already has keeps its state. No-op while
    /// closed.
    pub fn insert_block<M: EditableModel>(
        &mut self,
        block_type: BlockType,
        model: &mut M,
    ) -> Result<Vec<Change>, M::Error> {
        let PaletteState::Open(trigger) = &self.state else {
            return Ok(Vec::new());
        };
        let stateful = block_type.is_todo() || block_type.is_toggle();
        let kind = match model.document().block(trigger.range.block) {
            Some(block) if stateful && block.block_type() == block_type => block.kind.clone(),
            _ => BlockKind::default_for(block_type),
        };
        let ops = [
            EditOp::RemoveText {
                range: trigger.range,
            },
            EditOp::SetBlockKind {
                block: trigger.range.block,
                kind,
            },
        ];
        let changes = model.apply_edits(&ops)?;
        log::debug!("Block {} turned into {block_type}", trigger.range.block);
        self.close();
        Ok(changes)
    }
}
