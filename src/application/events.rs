//! Structured run events
//!
//! Every notable step of a run is recorded as a [`RunEvent`] in the run's
//! [`RunJournal`] and emitted through `tracing` at the event's level.

use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn, Level};

use crate::domain::RunStage;

/// Reference rewriting pass a fixup warning originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FixupPass {
    SharedReferences,
    Tables,
    Variables,
    ParentRehoming,
}

impl fmt::Display for FixupPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FixupPass::SharedReferences => "shared-references",
            FixupPass::Tables => "tables",
            FixupPass::Variables => "variables",
            FixupPass::ParentRehoming => "parent-rehoming",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RunEvent {
    StageReached {
        stage: RunStage,
    },
    /// A non-terminal stage failed as a whole; the run continues.
    StageFailed {
        stage: RunStage,
        reason: String,
    },
    TemplatesResolved {
        to_duplicate: usize,
        structural: usize,
    },
    SectionSkipped {
        template_id: String,
    },
    PlanEntrySkipped {
        template_id: String,
        reason: String,
    },
    CloneCreated {
        template_id: String,
        node_id: String,
        suffix: u32,
        node_count: usize,
    },
    CloneReused {
        template_id: String,
        node_id: String,
        suffix: u32,
    },
    SuffixReassigned {
        template_id: String,
        planned_suffix: u32,
        actual_suffix: u32,
    },
    ReconciliationFallback {
        planned_id: String,
    },
    FixupWarning {
        pass: FixupPass,
        node_id: String,
        reason: String,
    },
    IsolationWarning {
        node_id: String,
        reference: String,
    },
    NodeRecalculated {
        node_id: String,
        value: Option<String>,
    },
    RecalculationError {
        node_id: String,
        reason: String,
    },
}

impl RunEvent {
    pub fn level(&self) -> Level {
        match self {
            RunEvent::StageReached { .. } | RunEvent::NodeRecalculated { .. } => Level::DEBUG,
            RunEvent::TemplatesResolved { .. }
            | RunEvent::CloneCreated { .. }
            | RunEvent::CloneReused { .. }
            | RunEvent::SectionSkipped { .. } => Level::INFO,
            RunEvent::PlanEntrySkipped { .. }
            | RunEvent::SuffixReassigned { .. }
            | RunEvent::ReconciliationFallback { .. }
            | RunEvent::FixupWarning { .. }
            | RunEvent::IsolationWarning { .. }
            | RunEvent::RecalculationError { .. }
            | RunEvent::StageFailed { .. } => Level::WARN,
        }
    }

    fn emit(&self) {
        let level = self.level();
        if level == Level::WARN {
            warn!(event = ?self, "run event");
        } else if level == Level::INFO {
            info!(event = ?self, "run event");
        } else {
            debug!(event = ?self, "run event");
        }
    }
}

/// Per-kind tallies over a journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCounters {
    pub clones_created: usize,
    pub clones_reused: usize,
    pub reconciliation_fallbacks: usize,
    pub fixup_warnings: usize,
    pub isolation_warnings: usize,
    pub recalculated: usize,
    pub recalculation_errors: usize,
}

/// Append-only event record for one run.
#[derive(Debug, Default)]
pub struct RunJournal {
    events: Mutex<Vec<RunEvent>>,
}

impl RunJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: RunEvent) {
        event.emit();
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&RunEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn counters(&self) -> RunCounters {
        let mut counters = RunCounters::default();
        for event in self.events.lock().iter() {
            match event {
                RunEvent::CloneCreated { .. } => counters.clones_created += 1,
                RunEvent::CloneReused { .. } => counters.clones_reused += 1,
                RunEvent::ReconciliationFallback { .. } => {
                    counters.reconciliation_fallbacks += 1
                }
                RunEvent::FixupWarning { .. } => counters.fixup_warnings += 1,
                RunEvent::IsolationWarning { .. } => counters.isolation_warnings += 1,
                RunEvent::NodeRecalculated { .. } => counters.recalculated += 1,
                RunEvent::RecalculationError { .. } => counters.recalculation_errors += 1,
                _ => {}
            }
        }
        counters
    }
}
