//! Cycle state machine — explicit states and legal transition guards.
//!
//! Every cycle starts at `GenerateTask` and terminates at either
//! `Consolidate` (success) or `GiveUp` (attempts exhausted). The
//! orchestrator calls `advance()` to move between states; each call
//! validates that the edge is legal and records it in the transition log,
//! so a failed cycle can be reconstructed offline from the log alone.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The set of cycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// Obtaining the task: user-provided or adversary curriculum.
    GenerateTask,
    /// Actor is producing a candidate solution.
    Solve,
    /// Adversary is synthesizing killer tests against the candidate.
    Attack,
    /// Arbiter is executing solution + tests in a fresh sandbox.
    Verify,
    /// Verified solution is being stored as a skill — terminal success.
    Consolidate,
    /// Attempt failed with attempts remaining; feedback is being carried.
    Retry,
    /// Attempts exhausted without a pass — terminal failure.
    GiveUp,
}

impl CycleState {
    /// Whether this state ends the cycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Consolidate | Self::GiveUp)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerateTask => write!(f, "GenerateTask"),
            Self::Solve => write!(f, "Solve"),
            Self::Attack => write!(f, "Attack"),
            Self::Verify => write!(f, "Verify"),
            Self::Consolidate => write!(f, "Consolidate"),
            Self::Retry => write!(f, "Retry"),
            Self::GiveUp => write!(f, "GiveUp"),
        }
    }
}

/// Legal transitions between cycle states.
///
/// ```text
/// GenerateTask → Solve
/// Solve        → Attack | Retry
/// Attack       → Verify | Retry
/// Verify       → Consolidate | Retry | GiveUp
/// Retry        → Solve | GiveUp
/// ```
///
/// `Solve → Retry` and `Attack → Retry` cover agent failures (model error,
/// empty patches, unusable test plan); `Retry → GiveUp` covers an agent
/// failure on the final attempt.
fn is_legal_transition(from: CycleState, to: CycleState) -> bool {
    use CycleState::*;

    matches!(
        (from, to),
        (GenerateTask, Solve)
            | (Solve, Attack)
            | (Solve, Retry)
            | (Attack, Verify)
            | (Attack, Retry)
            | (Verify, Consolidate)
            | (Verify, Retry)
            | (Verify, GiveUp)
            | (Retry, Solve)
            | (Retry, GiveUp)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: CycleState,
    pub to: CycleState,
    /// Attempt number at the time of transition (0 before the first Solve).
    pub attempt: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, Error)]
#[error("illegal cycle transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: CycleState,
    pub to: CycleState,
}

/// Tracks the current cycle state, enforces legal transitions, and keeps
/// a complete transition log.
#[derive(Debug)]
pub struct CycleStateMachine {
    current: CycleState,
    attempt: u32,
    started: Instant,
    log: Vec<TransitionRecord>,
}

impl CycleStateMachine {
    pub fn new() -> Self {
        Self {
            current: CycleState::GenerateTask,
            attempt: 0,
            started: Instant::now(),
            log: Vec::new(),
        }
    }

    pub fn current(&self) -> CycleState {
        self.current
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Move to `to`, recording the transition. Terminal states accept no
    /// further transitions.
    pub fn advance(
        &mut self,
        to: CycleState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if self.current.is_terminal() || !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }
        self.log.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            reason: reason.map(str::to_string),
        });
        self.current = to;
        Ok(())
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.log
    }
}

impl Default for CycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let mut sm = CycleStateMachine::new();
        sm.set_attempt(1);
        sm.advance(CycleState::Solve, None).unwrap();
        sm.advance(CycleState::Attack, None).unwrap();
        sm.advance(CycleState::Verify, None).unwrap();
        sm.advance(CycleState::Consolidate, Some("all tests passed"))
            .unwrap();
        assert!(sm.current().is_terminal());
        assert_eq!(sm.history().len(), 4);
    }

    #[test]
    fn retry_loops_back_to_solve() {
        let mut sm = CycleStateMachine::new();
        sm.advance(CycleState::Solve, None).unwrap();
        sm.advance(CycleState::Attack, None).unwrap();
        sm.advance(CycleState::Verify, None).unwrap();
        sm.advance(CycleState::Retry, Some("assertion failures")).unwrap();
        sm.advance(CycleState::Solve, None).unwrap();
        assert_eq!(sm.current(), CycleState::Solve);
    }

    #[test]
    fn actor_failure_can_give_up_from_retry() {
        let mut sm = CycleStateMachine::new();
        sm.advance(CycleState::Solve, None).unwrap();
        sm.advance(CycleState::Retry, Some("actor produced no patches"))
            .unwrap();
        sm.advance(CycleState::GiveUp, Some("attempts exhausted"))
            .unwrap();
        assert!(sm.current().is_terminal());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut sm = CycleStateMachine::new();
        let err = sm.advance(CycleState::Verify, None).unwrap_err();
        assert_eq!(err.from, CycleState::GenerateTask);
        assert_eq!(err.to, CycleState::Verify);
        // State unchanged after a rejected transition.
        assert_eq!(sm.current(), CycleState::GenerateTask);
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut sm = CycleStateMachine::new();
        sm.advance(CycleState::Solve, None).unwrap();
        sm.advance(CycleState::Attack, None).unwrap();
        sm.advance(CycleState::Verify, None).unwrap();
        sm.advance(CycleState::GiveUp, None).unwrap();
        assert!(sm.advance(CycleState::Solve, None).is_err());
    }

    #[test]
    fn transition_log_records_attempt_and_reason() {
        let mut sm = CycleStateMachine::new();
        sm.set_attempt(2);
        sm.advance(CycleState::Solve, Some("retrying with feedback"))
            .unwrap();
        let record = &sm.history()[0];
        assert_eq!(record.attempt, 2);
        assert_eq!(record.reason.as_deref(), Some("retrying with feedback"));
    }
}
