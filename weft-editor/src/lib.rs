//! # weft-editor: collaborative block editor front end
//!
//! - [`session`]: attaches a local model to a shared document over the relay
//! - [`palette`]: slash-command palette that rewrites the current block
//! - [`render`]: render surface seam plus a plain-text surface

pub mod palette;
pub mod render;
pub mod session;

pub use palette::{
    filter_catalog, match_trigger, CommandItem, CommandPalette, PaletteAction, PaletteKey, CATALOG,
};
pub use render::{render_document, RemoteCaret, RenderSurface, TextSurface};
pub use session::{
    starter_blocks, SeedOutcome, Session, SessionConfig, SessionError, SessionEvent, SessionState,
};
