use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// Phases of one decision tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Generate,
    Score,
    Decide,
    Assign,
    Skip,
    Log,
    Adapt,
}

impl Phase {
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Generate)
                | (Generate, Score)
                | (Score, Decide)
                | (Decide, Assign)
                | (Decide, Skip)
                | (Assign, Log)
                | (Skip, Log)
                | (Log, Adapt)
                | (Adapt, Idle)
        )
    }
}

/// Enforces GENERATE → SCORE → DECIDE → (ASSIGN | SKIP) → LOG → ADAPT → IDLE.
#[derive(Debug, Clone)]
pub struct TickCycle {
    phase: Phase,
    visited: Vec<Phase>,
}

impl Default for TickCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl TickCycle {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            visited: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(DispatchError::PhaseTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.visited.push(next);
        Ok(())
    }

    pub fn visited(&self) -> &[Phase] {
        &self.visited
    }

    pub fn into_visited(self) -> Vec<Phase> {
        self.visited
    }
}
