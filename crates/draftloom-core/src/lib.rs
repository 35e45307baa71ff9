//! Draftloom Core Library
//!
//! This crate provides the live code execution and self-healing pipeline
//! for AI-generated UI code, including:
//! - Source normalization (fences, imports, export-default variants)
//! - Transpile-and-execute engine with an explicit capability table
//! - Sandboxed execution over an async RPC boundary
//! - Error categorization, recovery strategies, and a retry queue
//! - Per-draft undo/redo and a persisted version log
//! - Runtime/resource monitors feeding the categorizer
//! - Storage (SQLite) and configuration

pub mod classify;
pub mod config;
pub mod draft;
pub mod error;
pub mod execute;
pub mod history;
pub mod monitor;
pub mod normalize;
pub mod queue;
pub mod recovery;
pub mod sandbox;
pub mod storage;
pub mod transpile;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::classify::{CategorizedError, ErrorCategory, Fixability, Severity, classify};
    pub use crate::config::Config;
    pub use crate::draft::{DraftSession, RenderOutcome, RenderState};
    pub use crate::error::{Error, Result};
    pub use crate::execute::{CapabilityTable, ComponentHost, ExecutionEngine, RawError};
    pub use crate::history::{UndoRedoManager, VersionLog, VersionSnapshot};
    pub use crate::normalize::{NormalizedSource, normalize};
    pub use crate::queue::ErrorQueue;
    pub use crate::recovery::{RecoveryEngine, RecoveryStrategy};
    pub use crate::sandbox::{Sandbox, SandboxBoundary};
    pub use crate::transpile::{Transpiler, TranspilerLoader};
}
