//! The two finite-state machines of a run.
//!
//! [`RunStatus`] tracks a whole Migration Run across every stage and is what
//! the run ledger records. [`MigrationPhase`] tracks the orchestrator inside
//! the migrate stage. Both are plain enums with an explicit transition
//! table, so tests can walk them without any I/O. An illegal transition is a
//! [`EtlError::Configuration`] error: it means the caller's sequencing is
//! wrong, not that the data is.

use std::fmt;

use chrono::{DateTime, Utc};
use etl_rs_core::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};

/// Status of a Migration Run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Profiling,
    Cleaning,
    CanaryMigrating,
    FullMigrating,
    Verifying,
    Completed,
    RolledBack,
    Failed,
}

impl RunStatus {
    /// Returns `true` for Completed, RolledBack and Failed.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack | Self::Failed)
    }

    /// The transition table.
    ///
    /// `Pending -> CanaryMigrating` covers a migrate-only run that starts
    /// from an existing cleaned snapshot. `Completed -> Failed` is taken
    /// when the source is found to have changed after the load.
    pub const fn can_transition_to(self, next: Self) -> bool {
        use RunStatus::{
            CanaryMigrating, Cleaning, Completed, Failed, FullMigrating, Pending, Profiling,
            RolledBack, Verifying,
        };
        matches!(
            (self, next),
            (Pending, Profiling | CanaryMigrating)
                | (Profiling, Cleaning)
                | (Cleaning, CanaryMigrating)
                | (CanaryMigrating, FullMigrating)
                | (FullMigrating, Verifying)
                | (Verifying, Completed)
                | (CanaryMigrating | FullMigrating | Verifying, RolledBack)
                | (
                    Pending
                        | Profiling
                        | Cleaning
                        | CanaryMigrating
                        | FullMigrating
                        | Verifying
                        | Completed,
                    Failed
                )
        )
    }

    /// Moves to `next` if the table allows it.
    pub fn transition(&mut self, next: Self) -> EtlResult<()> {
        if self.can_transition_to(next) {
            *self = next;
            Ok(())
        } else {
            Err(EtlError::Configuration(format!(
                "illegal run transition {self} -> {next}"
            )))
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Phase of the migration orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationPhase {
    Pending,
    QualityGate,
    Canary,
    FullLoad,
    Verify,
    Completed,
    RolledBack,
    /// Reached when a failure happens before the target is touched without
    /// a rollback branch (bad snapshot), or when the rollback itself fails.
    Failed,
}

impl MigrationPhase {
    /// Returns `true` for Completed, RolledBack and Failed.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack | Self::Failed)
    }

    /// The transition table.
    pub const fn can_transition_to(self, next: Self) -> bool {
        use MigrationPhase::{
            Canary, Completed, Failed, FullLoad, Pending, QualityGate, RolledBack, Verify,
        };
        matches!(
            (self, next),
            (Pending, QualityGate)
                | (QualityGate, Canary)
                | (Canary, FullLoad)
                | (FullLoad, Verify)
                | (Verify, Completed)
                | (QualityGate | Canary | FullLoad | Verify, RolledBack)
                | (Pending | QualityGate | Canary | FullLoad | Verify, Failed)
        )
    }

    /// The run status a phase is reported under.
    pub const fn run_status(self) -> RunStatus {
        match self {
            Self::Pending | Self::QualityGate | Self::Canary => RunStatus::CanaryMigrating,
            Self::FullLoad => RunStatus::FullMigrating,
            Self::Verify => RunStatus::Verifying,
            Self::Completed => RunStatus::Completed,
            Self::RolledBack => RunStatus::RolledBack,
            Self::Failed => RunStatus::Failed,
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One recorded phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub phase: MigrationPhase,
    pub at: DateTime<Utc>,
}

/// A [`MigrationPhase`] with its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMachine {
    current: MigrationPhase,
    history: Vec<PhaseChange>,
}

impl PhaseMachine {
    /// A machine in [`MigrationPhase::Pending`].
    pub fn new() -> Self {
        Self {
            current: MigrationPhase::Pending,
            history: vec![PhaseChange {
                phase: MigrationPhase::Pending,
                at: Utc::now(),
            }],
        }
    }

    /// The current phase.
    pub const fn current(&self) -> MigrationPhase {
        self.current
    }

    /// Every phase entered so far, oldest first.
    pub fn history(&self) -> &[PhaseChange] {
        &self.history
    }

    /// Phases entered so far, without timestamps.
    pub fn phases(&self) -> Vec<MigrationPhase> {
        self.history.iter().map(|c| c.phase).collect()
    }

    /// Enters `next`.
    pub fn advance(&mut self, next: MigrationPhase) -> EtlResult<()> {
        if !self.current.can_transition_to(next) {
            return Err(EtlError::Configuration(format!(
                "illegal migration transition {} -> {next}",
                self.current
            )));
        }
        tracing::info!(from = %self.current, to = %next, "Migration phase");
        self.current = next;
        self.history.push(PhaseChange {
            phase: next,
            at: Utc::now(),
        });
        Ok(())
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_happy_path() {
        let mut s = RunStatus::Pending;
        for next in [
            RunStatus::Profiling,
            RunStatus::Cleaning,
            RunStatus::CanaryMigrating,
            RunStatus::FullMigrating,
            RunStatus::Verifying,
            RunStatus::Completed,
        ] {
            s.transition(next).unwrap();
        }
        assert!(s.is_terminal());
    }

    #[test]
    fn test_run_rollback_only_from_migration_states() {
        assert!(RunStatus::CanaryMigrating.can_transition_to(RunStatus::RolledBack));
        assert!(RunStatus::Verifying.can_transition_to(RunStatus::RolledBack));
        assert!(!RunStatus::Profiling.can_transition_to(RunStatus::RolledBack));
        assert!(RunStatus::Profiling.can_transition_to(RunStatus::Failed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [RunStatus::Completed, RunStatus::RolledBack, RunStatus::Failed] {
            let mut s = terminal;
            let err = s.transition(RunStatus::Pending).unwrap_err();
            assert_eq!(err.code(), "CONFIGURATION_ERROR");
            assert_eq!(s, terminal);
        }
    }

    #[test]
    fn test_only_a_completed_run_can_fail_afterwards() {
        assert!(RunStatus::Completed.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::RolledBack.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::RolledBack));
    }

    #[test]
    fn test_cannot_skip_verify() {
        let mut s = RunStatus::FullMigrating;
        assert!(s.transition(RunStatus::Completed).is_err());
    }

    #[test]
    fn test_phase_machine_records_history() {
        let mut m = PhaseMachine::new();
        m.advance(MigrationPhase::QualityGate).unwrap();
        m.advance(MigrationPhase::Canary).unwrap();
        m.advance(MigrationPhase::RolledBack).unwrap();
        assert_eq!(
            m.phases(),
            vec![
                MigrationPhase::Pending,
                MigrationPhase::QualityGate,
                MigrationPhase::Canary,
                MigrationPhase::RolledBack
            ]
        );
        assert!(m.advance(MigrationPhase::FullLoad).is_err());
    }

    #[test]
    fn test_quality_gate_cannot_jump_to_full_load() {
        assert!(!MigrationPhase::QualityGate.can_transition_to(MigrationPhase::FullLoad));
        assert!(MigrationPhase::QualityGate.can_transition_to(MigrationPhase::RolledBack));
        assert!(!MigrationPhase::Pending.can_transition_to(MigrationPhase::RolledBack));
    }

    #[test]
    fn test_phase_to_run_status() {
        assert_eq!(MigrationPhase::Canary.run_status(), RunStatus::CanaryMigrating);
        assert_eq!(MigrationPhase::FullLoad.run_status(), RunStatus::FullMigrating);
        assert_eq!(MigrationPhase::Verify.run_status(), RunStatus::Verifying);
    }
}
