//! Draft history
//!
//! Two related but independent mechanisms sharing the draft's current
//! code: in-memory undo/redo stacks for the session, and a persisted,
//! append-only version log that survives it.

pub mod undo;
pub mod versions;

pub use undo::{DEFAULT_UNDO_CAPACITY, UndoRedoManager, UndoRedoState};
pub use versions::{DraftStore, VersionLog, VersionSnapshot, compute_content_hash};
