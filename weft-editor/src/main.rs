//! `weft`: line-oriented terminal client for one shared document.
//!
//! Plain lines are typed at the caret of the current block. Lines starting
//! with `:` are commands; `:help` lists them. Configuration comes from
//! `WEFT_ENDPOINT`, `WEFT_ROOM`, `WEFT_DOCUMENT` and `WEFT_SYNC_TIMEOUT_MS`.

use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use weft_core::{Block, BlockKind, EditOp, EditableModel, Mark, Position, Selection, TextRange};
use weft_editor::{
    render_document, CommandPalette, PaletteAction, PaletteKey, Session, SessionConfig,
    SessionError, SessionEvent, TextSurface,
};

const HELP: &str = "\
text            type at the caret
:up :down       move the palette highlight
:enter :esc     commit / close the palette
:pick N         commit palette entry N
:new            new paragraph below
:next :prev     move between blocks
:del            delete the character before the caret
:undo :redo     step through your own edits
:check :fold    toggle todo / toggle block
:bold :italic :underline :code :strike
                toggle a mark on the current block
:show :json :peers :status
:quit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Type(String),
    Key(PaletteKey),
    Pick(usize),
    NewBlock,
    Next,
    Prev,
    Delete,
    Undo,
    Redo,
    Check,
    Fold,
    Mark(Mark),
    Show,
    Json,
    Peers,
    Status,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let Some(rest) = line.strip_prefix(':') else {
            return Command::Type(line.to_string());
        };
        let mut words = rest.split_whitespace();
        match (words.next().unwrap_or_default(), words.next()) {
            ("up", None) => Command::Key(PaletteKey::Up),
            ("down", None) => Command::Key(PaletteKey::Down),
            ("enter", None) => Command::Key(PaletteKey::Enter),
            ("esc", None) => Command::Key(PaletteKey::Escape),
            ("pick", Some(n)) => match n.parse() {
                Ok(n) => Command::Pick(n),
                Err(_) => Command::Unknown(line.to_string()),
            },
            ("new", None) => Command::NewBlock,
            ("next", None) => Command::Next,
            ("prev", None) => Command::Prev,
            ("del", None) => Command::Delete,
            ("undo", None) => Command::Undo,
            ("redo", None) => Command::Redo,
            ("check", None) => Command::Check,
            ("fold", None) => Command::Fold,
            ("bold", None) => Command::Mark(Mark::Bold),
            ("italic", None) => Command::Mark(Mark::Italic),
            ("underline", None) => Command::Mark(Mark::Underline),
            ("code", None) => Command::Mark(Mark::Code),
            ("strike", None) => Command::Mark(Mark::Strikethrough),
            ("show", None) => Command::Show,
            ("json", None) => Command::Json,
            ("peers", None) => Command::Peers,
            ("status", None) => Command::Status,
            ("help", None) => Command::Help,
            ("quit", None) | ("q", None) => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

struct Editor {
    session: Session,
    palette: CommandPalette,
}

impl Editor {
    fn caret(&self) -> Position {
        let doc = self.session.model();
        doc.caret().unwrap_or_else(|| {
            let last = doc.len().saturating_sub(1);
            Position::new(last, doc.block(last).map_or(0, Block::text_len))
        })
    }

    fn move_to_block(&mut self, block: usize) {
        let len = self.session.model().block(block).map_or(0, Block::text_len);
        self.session
            .set_selection(Some(Selection::caret(Position::new(block, len))));
        self.palette.on_selection_change(self.session.model());
    }

    fn edit(&mut self, ops: &[EditOp]) -> Result<(), SessionError> {
        self.session.apply_edits(ops)?;
        self.palette.on_selection_change(self.session.model());
        Ok(())
    }

    fn run(&mut self, command: Command) -> Result<bool, SessionError> {
        let caret = self.caret();
        match command {
            Command::Type(text) => {
                self.session.set_selection(Some(Selection::caret(caret)));
                self.edit(&[EditOp::InsertText {
                    block: caret.block,
                    offset: caret.offset,
                    text,
                }])?;
                self.print_palette();
            }
            Command::Key(key) => {
                let action = self.palette.handle_key(key, &mut self.session)?;
                self.report(action);
            }
            Command::Pick(index) => {
                let action = self.palette.click(index, &mut self.session)?;
                self.report(action);
            }
            Command::NewBlock => {
                let index = (caret.block + 1).min(self.session.model().len());
                self.edit(&[EditOp::InsertBlock {
                    index,
                    block: Block::paragraph(""),
                }])?;
                self.move_to_block(index);
            }
            Command::Next => {
                let last = self.session.model().len().saturating_sub(1);
                self.move_to_block((caret.block + 1).min(last));
            }
            Command::Prev => self.move_to_block(caret.block.saturating_sub(1)),
            Command::Delete => {
                let text = self
                    .session
                    .model()
                    .block(caret.block)
                    .map(Block::text)
                    .unwrap_or_default();
                let before = text.get(..caret.offset).unwrap_or_default();
                if let Some((start, _)) = before.char_indices().next_back() {
                    self.session.set_selection(Some(Selection::caret(caret)));
                    self.edit(&[EditOp::RemoveText {
                        range: TextRange::new(caret.block, start, caret.offset),
                    }])?;
                }
            }
            Command::Undo => {
                if !self.session.undo()? {
                    println!("(nothing to undo)");
                }
                self.palette.on_selection_change(self.session.model());
            }
            Command::Redo => {
                if !self.session.redo()? {
                    println!("(nothing to redo)");
                }
                self.palette.on_selection_change(self.session.model());
            }
            Command::Check => self.flip(caret.block, |kind| match kind {
                BlockKind::Todo { checked } => Some(BlockKind::Todo { checked: !checked }),
                _ => None,
            })?,
            Command::Fold => self.flip(caret.block, |kind| match kind {
                BlockKind::Toggle { collapsed } => Some(BlockKind::Toggle {
                    collapsed: !collapsed,
                }),
                _ => None,
            })?,
            Command::Mark(mark) => {
                let len = self
                    .session
                    .model()
                    .block(caret.block)
                    .map_or(0, Block::text_len);
                let range = TextRange::new(caret.block, 0, len);
                if !range.is_empty() {
                    let on = !self.session.model().mark_active(range, mark);
                    self.edit(&[EditOp::FormatText { range, mark, on }])?;
                }
            }
            Command::Show => self.show(),
            Command::Json => match self.session.model().to_json() {
                Ok(json) => println!("{json}"),
                Err(e) => println!("(cannot serialize: {e})"),
            },
            Command::Peers => {
                let snapshot = self.session.presence_snapshot();
                println!("{} other peer(s)", snapshot.len());
                for (id, peer) in snapshot.iter() {
                    println!("  {} {} {id}", peer.identity.display_name, peer.identity.color);
                }
            }
            Command::Status => println!(
                "{:?}, {}, you are {}",
                self.session.state(),
                if self.session.is_connected() { "connected" } else { "disconnected" },
                self.session.identity().display_name
            ),
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(false),
            Command::Unknown(line) => println!("unknown command {line:?}, try :help"),
        }
        Ok(true)
    }

    /// Replace the kind of `block` when `flip` has an answer for it.
    fn flip<F>(&mut self, block: usize, flip: F) -> Result<(), SessionError>
    where
        F: Fn(&BlockKind) -> Option<BlockKind>,
    {
        let flipped = self.session.model().block(block).and_then(|b| flip(&b.kind));
        match flipped {
            Some(kind) => self.edit(&[EditOp::SetBlockKind { block, kind }]),
            None => {
                println!("(current block has nothing to toggle)");
                Ok(())
            }
        }
    }

    fn report(&mut self, action: PaletteAction) {
        match action {
            PaletteAction::Committed(ty) => {
                println!("block is now {ty}");
                self.show();
            }
            PaletteAction::Highlighted(_) => self.print_palette(),
            PaletteAction::Closed => println!("(menu closed)"),
            PaletteAction::Ignored => {}
        }
    }

    fn print_palette(&self) {
        if !self.palette.is_open() {
            return;
        }
        for (i, item) in self.palette.items().iter().enumerate() {
            let marker = if i == self.palette.highlighted() { '>' } else { ' ' };
            println!("{marker} {i:>2} {:<14} {}", item.title, item.description);
        }
    }

    fn show(&self) {
        println!(
            "{}",
            render_document(&TextSurface, self.session.model(), &self.session.remote_carets())
        );
    }

    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ConnectionChanged(true) => println!("(connected)"),
            SessionEvent::ConnectionChanged(false) => println!("(disconnected)"),
            SessionEvent::SeedDecided(_) => {
                let len = self.session.model().block(0).map_or(0, Block::text_len);
                self.session
                    .set_selection(Some(Selection::caret(Position::new(0, len))));
                self.show();
            }
            SessionEvent::DocumentChanged => self.palette.on_selection_change(self.session.model()),
            SessionEvent::PresenceChanged(snapshot) => {
                println!("({} other peer(s))", snapshot.len())
            }
            SessionEvent::StateChanged(state) => info!("Session state {state:?}"),
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = SessionConfig::from_env();
    info!("Opening {} on {}", config.key, config.endpoint);

    let session = match Session::new(config) {
        Ok(session) => session,
        Err(e) => {
            log::error!("Cannot create session: {e}");
            std::process::exit(1);
        }
    };
    let mut editor = Editor {
        session,
        palette: CommandPalette::new(),
    };
    if let Err(e) = editor.session.start() {
        log::error!("Cannot start session: {e}");
        std::process::exit(1);
    }
    println!("You are {}. Type :help for commands.", editor.session.identity().display_name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match editor.run(Command::parse(&line)) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("({e})"),
                },
                Ok(None) => break,
                Err(e) => {
                    log::error!("Reading input failed: {e}");
                    break;
                }
            },
            event = editor.session.next_event() => match event {
                Some(event) => editor.on_event(event),
                None => break,
            },
        }
    }

    editor.session.destroy();
    info!("Bye");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("hello /t"), Command::Type("hello /t".into()));
        assert_eq!(Command::parse(":down"), Command::Key(PaletteKey::Down));
        assert_eq!(Command::parse(":pick 3"), Command::Pick(3));
        assert_eq!(Command::parse(":bold"), Command::Mark(Mark::Bold));
        assert_eq!(Command::parse(":q"), Command::Quit);
        assert_eq!(Command::parse(":undo"), Command::Undo);
        assert_eq!(Command::parse(":redo"), Command::Redo);
        assert_eq!(Command::parse(":pick x"), Command::Unknown(":pick x".into()));
        assert_eq!(Command::parse(":nope"), Command::Unknown(":nope".into()));
    }
}
