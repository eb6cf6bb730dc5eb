//! Per-run stage machine.

use std::fmt;

use serde::Serialize;

use crate::domain::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStage {
    PlanReceived,
    TemplatesResolved,
    NodesCloned,
    ReferencesRewritten,
    Isolated,
    Recalculated,
    Assembled,
}

impl RunStage {
    pub fn next(self) -> Option<RunStage> {
        use RunStage::*;
        match self {
            PlanReceived => Some(TemplatesResolved),
            TemplatesResolved => Some(NodesCloned),
            NodesCloned => Some(ReferencesRewritten),
            ReferencesRewritten => Some(Isolated),
            Isolated => Some(Recalculated),
            Recalculated => Some(Assembled),
            Assembled => None,
        }
    }

    /// Failing before this stage completes aborts the run.
    pub fn is_terminal_on_failure(self) -> bool {
        matches!(self, RunStage::TemplatesResolved | RunStage::NodesCloned)
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Validates a stage transition; only the single forward step is legal.
pub fn validate_transition(from: RunStage, to: RunStage) -> Result<(), DomainError> {
    if from.next() == Some(to) {
        Ok(())
    } else {
        Err(DomainError::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
