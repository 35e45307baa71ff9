//! Render supervisor state machine
//!
//! An explicit supervisor with states {idle, rendering, recovering,
//! errored} and checked transition functions, independent of any UI
//! framework lifecycle.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::CategorizedError;
use crate::error::{Error, Result};

/// Supervisor state for a draft's render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderState {
    /// Nothing in flight
    Idle,
    /// An execution attempt is running
    Rendering,
    /// An inline recovery cycle is running
    Recovering,
    /// The last attempt surfaced a failure
    Errored,
}

impl RenderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Rendering => "rendering",
            Self::Recovering => "recovering",
            Self::Errored => "errored",
        }
    }

    /// Whether an attempt is currently in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Rendering | Self::Recovering)
    }
}

impl std::fmt::Display for RenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Supervisor over a draft's render attempts
#[derive(Debug)]
pub struct RenderSupervisor {
    state: RenderState,
    last_error: Option<CategorizedError>,
}

impl RenderSupervisor {
    pub fn new() -> Self {
        Self {
            state: RenderState::Idle,
            last_error: None,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn last_error(&self) -> Option<&CategorizedError> {
        self.last_error.as_ref()
    }

    /// Idle | Errored -> Rendering
    pub fn begin_render(&mut self) -> Result<()> {
        match self.state {
            RenderState::Idle | RenderState::Errored => {
                self.transition(RenderState::Rendering);
                Ok(())
            }
            state => Err(Error::InvalidInput(format!(
                "cannot begin render while {state}"
            ))),
        }
    }

    /// Rendering -> Recovering, remembering the failure being healed
    pub fn begin_recovery(&mut self, error: CategorizedError) -> Result<()> {
        match self.state {
            RenderState::Rendering => {
                self.last_error = Some(error);
                self.transition(RenderState::Recovering);
                Ok(())
            }
            state => Err(Error::InvalidInput(format!(
                "cannot begin recovery while {state}"
            ))),
        }
    }

    /// Rendering | Recovering -> Idle, clearing any remembered failure
    pub fn rendered(&mut self) -> Result<()> {
        match self.state {
            RenderState::Rendering | RenderState::Recovering => {
                self.last_error = None;
                self.transition(RenderState::Idle);
                Ok(())
            }
            state => Err(Error::InvalidInput(format!(
                "cannot complete render while {state}"
            ))),
        }
    }

    /// Rendering | Recovering -> Errored, surfacing the failure
    pub fn failed(&mut self, error: CategorizedError) -> Result<()> {
        match self.state {
            RenderState::Rendering | RenderState::Recovering => {
                self.last_error = Some(error);
                self.transition(RenderState::Errored);
                Ok(())
            }
            state => Err(Error::InvalidInput(format!(
                "cannot fail render while {state}"
            ))),
        }
    }

    fn transition(&mut self, next: RenderState) {
        debug!(from = %self.state, to = %next, "Render supervisor transition");
        self.state = next;
    }
}

impl Default for RenderSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
