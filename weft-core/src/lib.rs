//! Block-structured document model and its binding to a replicated `yrs` document.
//!
//! - [`block`]: the closed block schema and its construction contract
//! - [`document`]: the local editable model and the edit operations it accepts
//! - [`collab`]: the shared-document follower that mirrors edits both ways

pub mod block;
pub mod collab;
pub mod document;

pub use block::{Block, BlockKind, BlockType, Mark, Marks, SchemaViolation, TextSpan};
pub use collab::{CollabError, SharedDocument, StickySelection};
pub use document::{
    BlockDocument, Change, EditError, EditOp, EditableModel, Position, Selection, TextRange,
};
