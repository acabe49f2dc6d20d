//! # Engine State Machine
//!
//! ```text
//! Stopped ──start──▶ Running ──pause──▶ Paused
//!    ▲                  │  ◀──resume───   │
//!    └──────stop────────┴──────stop───────┘
//! ```
//!
//! `Paused` is a sub-mode of running: the watcher stays up and, depending on
//! the [`PausePolicy`](crate::config::PausePolicy), the drain loop keeps
//! dispatching. Only the periodic remote poll is always suspended.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl EngineState {
    /// Whether background tasks are alive.
    pub fn is_active(&self) -> bool {
        matches!(self, EngineState::Running | EngineState::Paused)
    }

    pub fn can_transition_to(&self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (Stopped, Running) | (Running, Paused) | (Paused, Running) | (Running, Stopped) | (Paused, Stopped)
        )
    }

    /// Validate a transition, returning the new state.
    pub fn transition(self, next: EngineState) -> Result<EngineState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(SyncError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
                reason: match self {
                    EngineState::Stopped => "engine is not running".to_string(),
                    _ if self == next => format!("engine is already {}", self),
                    _ => "transition not allowed".to_string(),
                },
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Stopped => "stopped",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
        }
    }
}

impl FromStr for EngineState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stopped" => Ok(EngineState::Stopped),
            "running" => Ok(EngineState::Running),
            "paused" => Ok(EngineState::Paused),
            _ => Err(SyncError::InvalidState(s.to_string())),
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
