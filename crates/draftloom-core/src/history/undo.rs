//! In-memory undo/redo stacks
//!
//! Two bounded stacks plus one current slot per draft. Pushing a new
//! state always clears the redo stack; the oldest entry is evicted when a
//! stack overflows its capacity.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Default capacity of each of the undo and redo stacks
pub const DEFAULT_UNDO_CAPACITY: usize = 50;

/// A saved code state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRedoState {
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
}

impl UndoRedoState {
    fn new(code: &str, description: Option<String>) -> Self {
        Self {
            code: code.to_string(),
            timestamp: Utc::now(),
            description,
        }
    }
}

/// Bounded undo/redo history owning the draft's current code slot
///
/// The current slot is the single source of truth for the draft's live
/// code; it must only be mutated through these operations.
#[derive(Debug)]
pub struct UndoRedoManager {
    undo: VecDeque<UndoRedoState>,
    redo: VecDeque<UndoRedoState>,
    current: Option<UndoRedoState>,
    capacity: usize,
}

impl UndoRedoManager {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_UNDO_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            current: None,
            capacity: capacity.max(1),
        }
    }

    /// The draft's current code, if any state has been saved
    pub fn current_code(&self) -> Option<&str> {
        self.current.as_ref().map(|state| state.code.as_str())
    }

    pub fn current(&self) -> Option<&UndoRedoState> {
        self.current.as_ref()
    }

    /// Save a new state as current
    ///
    /// A no-op returning `false` when `code` equals the current slot.
    /// Otherwise the previous current is pushed onto the undo stack
    /// (evicting the oldest entry on overflow) and the redo stack is
    /// cleared.
    pub fn save_state(&mut self, code: &str, description: Option<String>) -> bool {
        if self
            .current
            .as_ref()
            .is_some_and(|current| current.code == code)
        {
            return false;
        }

        if let Some(previous) = self.current.take() {
            if self.undo.len() >= self.capacity {
                self.undo.pop_front();
            }
            self.undo.push_back(previous);
        }

        self.redo.clear();
        self.current = Some(UndoRedoState::new(code, description));
        true
    }

    /// Step back to the previous state
    ///
    /// Returns the state that became current, or `None` when the undo
    /// stack is empty; an empty stack is not an error.
    pub fn undo(&mut self) -> Option<UndoRedoState> {
        let state = self.undo.pop_back()?;

        if let Some(current) = self.current.take() {
            if self.redo.len() >= self.capacity {
                self.redo.pop_front();
            }
            self.redo.push_back(current);
        }

        self.current = Some(state.clone());
        Some(state)
    }

    /// Step forward again; the mirror of `undo`
    pub fn redo(&mut self) -> Option<UndoRedoState> {
        let state = self.redo.pop_back()?;

        if let Some(current) = self.current.take() {
            if self.undo.len() >= self.capacity {
                self.undo.pop_front();
            }
            self.undo.push_back(current);
        }

        self.current = Some(state.clone());
        Some(state)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }
}

impl Default for UndoRedoManager {
    fn default() -> Self {
        Self::new()
    }
}
