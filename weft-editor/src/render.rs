//! Block rendering.
//!
//! [`RenderSurface`] is the seam between the document and whatever draws
//! it: one exhaustive dispatch over [`BlockKind`] plus a leaf decorator for
//! marked text. [`render_document`] walks the blocks, interleaves remote
//! caret markers into the span text and hands the pieces to the surface.

use weft_core::{Block, BlockDocument, BlockKind, Mark, Marks, Position};

/// A remote peer's caret, positioned in the local model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCaret {
    pub name: String,
    pub color: String,
    pub at: Position,
}

pub trait RenderSurface {
    /// Wrap `text` in the decorations for `marks`.
    fn leaf(&self, text: &str, marks: Marks) -> String;

    /// Decoration for a remote caret.
    fn caret(&self, caret: &RemoteCaret) -> String;

    /// Render `block` around its already rendered children.
    ///
    /// `ordinal` is the 1-based position within a run of numbered list
    /// items, 0 for other blocks.
    fn block(&self, block: &Block, ordinal: usize, children: &str) -> String;

    /// Join rendered blocks.
    fn join(&self, blocks: Vec<String>) -> String {
        blocks.join("\n")
    }
}

/// Render every block of `doc` through `surface`.
pub fn render_document<S: RenderSurface>(
    surface: &S,
    doc: &BlockDocument,
    carets: &[RemoteCaret],
) -> String {
    let mut ordinal = 0;
    let rendered = doc
        .blocks()
        .iter()
        .enumerate()
        .map(|(index, block)| {
            ordinal = match block.kind {
                BlockKind::NumberedList => ordinal + 1,
                _ => 0,
            };
            let text = block.text();
            let mut here: Vec<(usize, &RemoteCaret)> = carets
                .iter()
                .filter(|c| c.at.block == index)
                .map(|c| (floor_char_boundary(&text, c.at.offset), c))
                .collect();
            here.sort_by_key(|(offset, _)| *offset);
            let children = render_children(surface, block, &here);
            surface.block(block, ordinal, &children)
        })
        .collect();
    surface.join(rendered)
}

/// Remote offsets may point past or into the middle of a character after
/// concurrent edits.
fn floor_char_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

fn render_children<S: RenderSurface>(
    surface: &S,
    block: &Block,
    carets: &[(usize, &RemoteCaret)],
) -> String {
    let mut out = String::new();
    let mut pending = carets.iter().peekable();
    let mut pos = 0;

    for span in &block.children {
        let end = pos + span.len();
        let mut cut = pos;
        while let Some((offset, caret)) = pending.next_if(|(offset, _)| *offset < end) {
            let at = (*offset).max(cut);
            out.push_str(&surface.leaf(&span.text[cut - pos..at - pos], span.marks));
            out.push_str(&surface.caret(caret));
            cut = at;
        }
        out.push_str(&surface.leaf(&span.text[cut - pos..], span.marks));
        pos = end;
    }
    for (_, caret) in pending {
        out.push_str(&surface.caret(caret));
    }
    out
}

/// Markdown-flavoured plain text, used by the terminal client.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSurface;

impl RenderSurface for TextSurface {
    fn leaf(&self, text: &str, marks: Marks) -> String {
        if text.is_empty() {
            return String::new();
        }
        let mut out = text.to_string();
        for mark in [Mark::Code, Mark::Bold, Mark::Italic, Mark::Underline, Mark::Strikethrough] {
            if !marks.get(mark) {
                continue;
            }
            out = match mark {
                Mark::Code => format!("`{out}`"),
                Mark::Bold => format!("**{out}**"),
                Mark::Italic => format!("_{out}_"),
                Mark::Underline => format!("<u>{out}</u>"),
                Mark::Strikethrough => format!("~~{out}~~"),
            };
        }
        out
    }

    fn caret(&self, caret: &RemoteCaret) -> String {
        format!("|{}", caret.name)
    }

    fn block(&self, block: &Block, ordinal: usize, children: &str) -> String {
        let ty = block.block_type();
        if let Some(level) = ty.heading_level() {
            return format!("{} {children}", "#".repeat(usize::from(level)));
        }
        if ty.is_list() {
            return match ordinal {
                0 => format!("- {children}"),
                n => format!("{n}. {children}"),
            };
        }
        match &block.kind {
            BlockKind::Paragraph
            | BlockKind::HeadingOne
            | BlockKind::HeadingTwo
            | BlockKind::HeadingThree
            | BlockKind::BulletedList
            | BlockKind::NumberedList => children.to_string(),
            BlockKind::Todo { checked } => {
                format!("[{}] {children}", if *checked { "x" } else { " " })
            }
            BlockKind::Toggle { collapsed } => {
                format!("{} {children}", if *collapsed { "▸" } else { "▾" })
            }
            BlockKind::Quote => format!("> {children}"),
            BlockKind::Code { language } => {
                format!("```{}\n{children}\n```", language.as_deref().unwrap_or_default())
            }
            BlockKind::Divider => "---".to_string(),
            BlockKind::Image { url, alt } => {
                format!("![{}]({url})", alt.as_deref().unwrap_or_default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{BlockType, TextSpan};

    fn render(blocks: Vec<Block>) -> String {
        render_document(&TextSurface, &BlockDocument::from_blocks(blocks), &[])
    }

    #[test]
    fn test_every_block_type_renders() {
        let blocks: Vec<Block> = BlockType::ALL
            .iter()
            .map(|ty| Block::new(*ty, vec![TextSpan::plain("x")]))
            .collect();
        let out = render(blocks);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "x");
        assert!(lines.contains(&"# x"));
        assert!(lines.contains(&"## x"));
        assert!(lines.contains(&"### x"));
        assert!(lines.contains(&"- x"));
        assert!(lines.contains(&"1. x"));
        assert!(lines.contains(&"[ ] x"));
        assert!(lines.contains(&"▾ x"));
        assert!(lines.contains(&"> x"));
        assert!(lines.contains(&"---"));
    }

    #[test]
    fn test_numbered_runs_restart() {
        let out = render(vec![
            Block::new(BlockType::NumberedList, vec![TextSpan::plain("a")]),
            Block::new(BlockType::NumberedList, vec![TextSpan::plain("b")]),
            Block::paragraph("gap"),
            Block::new(BlockType::NumberedList, vec![TextSpan::plain("c")]),
        ]);
        assert_eq!(out, "1. a\n2. b\ngap\n1. c");
    }

    #[test]
    fn test_marks_wrap() {
        let marks = Marks::NONE.with(Mark::Bold).with(Mark::Code);
        assert_eq!(TextSurface.leaf("hi", marks), "**`hi`**");
        assert_eq!(TextSurface.leaf("", marks), "");
        assert_eq!(TextSurface.leaf("s", Marks::NONE.with(Mark::Strikethrough)), "~~s~~");
    }

    #[test]
    fn test_checked_todo_and_code() {
        let todo = Block::with_kind(
            BlockKind::Todo { checked: true },
            vec![TextSpan::plain("done")],
        );
        let code = Block::with_kind(
            BlockKind::Code {
                language: Some("rust".into()),
            },
            vec![TextSpan::plain("fn main() {}")],
        );
        assert_eq!(render(vec![todo, code]), "[x] done\n```rust\nfn main() {}\n```");
    }

    #[test]
    fn test_remote_carets_interleave() {
        let block = Block::new(
            BlockType::Paragraph,
            vec![
                TextSpan::plain("ab"),
                TextSpan::marked("cd", Marks::NONE.with(Mark::Italic)),
            ],
        );
        let doc = BlockDocument::from_blocks(vec![block]);
        let carets = vec![
            RemoteCaret {
                name: "Bo".into(),
                color: "#FF6B6B".into(),
                at: Position::new(0, 3),
            },
            RemoteCaret {
                name: "Al".into(),
                color: "#4ECDC4".into(),
                at: Position::new(0, 4),
            },
        ];
        assert_eq!(render_document(&TextSurface, &doc, &carets), "ab_c_|Bo_d_|Al");
    }
}
