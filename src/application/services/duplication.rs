//! Duplication run orchestration
//!
//! Plan → resolve → clone → rewrite → isolate → recalculate → assemble.
//! Resolution and cloning failures abort the run; everything after degrades into
//! events so the run still reaches `Assembled`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::application::events::{RunEvent, RunJournal};
use crate::application::services::assembler::{DuplicationSummary, ResponseAssembler};
use crate::application::services::cloner::SubtreeCloner;
use crate::application::services::isolation::IsolationEnforcer;
use crate::application::services::recalc::RecalculationDriver;
use crate::application::services::resolver::TemplateResolver;
use crate::application::services::rewriter::ReferenceRewriter;
use crate::application::{ApplicationError, ApplicationResult};
use crate::config::Settings;
use crate::domain::{validate_transition, AuthContext, DuplicationPlan, ReconciliationMap, RunStage};
use crate::infrastructure::traits::{Interpreter, TreeStore};

/// Registry of `(repeaterNodeId, scopeId)` pairs with a run in progress.
#[derive(Debug, Default)]
pub struct ScopeLocks {
    active: Mutex<HashSet<(String, String)>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the scope, failing with `RunInProgress` if it is already claimed.
    pub fn try_acquire(&self, repeater: &str, scope: &str) -> ApplicationResult<ScopeGuard<'_>> {
        let key = (repeater.to_string(), scope.to_string());
        if !self.active.lock().insert(key.clone()) {
            return Err(ApplicationError::RunInProgress {
                repeater: repeater.to_string(),
                scope: scope.to_string(),
            });
        }
        Ok(ScopeGuard { locks: self, key })
    }

    pub fn is_locked(&self, repeater: &str, scope: &str) -> bool {
        self.active
            .lock()
            .contains(&(repeater.to_string(), scope.to_string()))
    }
}

/// Releases its scope on drop.
#[derive(Debug)]
pub struct ScopeGuard<'a> {
    locks: &'a ScopeLocks,
    key: (String, String),
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.locks.active.lock().remove(&self.key);
    }
}

/// Current stage of a run; every transition is validated and journaled.
struct StageTracker<'a> {
    stage: RunStage,
    journal: &'a RunJournal,
}

impl<'a> StageTracker<'a> {
    fn start(journal: &'a RunJournal) -> Self {
        journal.record(RunEvent::StageReached {
            stage: RunStage::PlanReceived,
        });
        Self {
            stage: RunStage::PlanReceived,
            journal,
        }
    }

    fn advance(&mut self, to: RunStage) -> ApplicationResult<()> {
        validate_transition(self.stage, to)?;
        self.stage = to;
        self.journal.record(RunEvent::StageReached { stage: to });
        Ok(())
    }
}

pub struct DuplicationService {
    locks: Arc<ScopeLocks>,
    resolver: TemplateResolver,
    cloner: SubtreeCloner,
    rewriter: ReferenceRewriter,
    isolation: IsolationEnforcer,
    recalculation: RecalculationDriver,
    assembler: ResponseAssembler,
}

impl DuplicationService {
    pub fn new(
        store: Arc<dyn TreeStore>,
        interpreter: Arc<dyn Interpreter>,
        settings: Arc<Settings>,
    ) -> Self {
        Self::with_locks(store, interpreter, settings, Arc::new(ScopeLocks::new()))
    }

    /// Share a lock registry between several service instances.
    pub fn with_locks(
        store: Arc<dyn TreeStore>,
        interpreter: Arc<dyn Interpreter>,
        settings: Arc<Settings>,
        locks: Arc<ScopeLocks>,
    ) -> Self {
        Self {
            resolver: TemplateResolver::new(store.clone()),
            cloner: SubtreeCloner::new(store.clone(), settings.clone()),
            rewriter: ReferenceRewriter::new(store.clone(), settings.clone()),
            isolation: IsolationEnforcer::new(store.clone()),
            recalculation: RecalculationDriver::new(store.clone(), interpreter, settings),
            assembler: ResponseAssembler::new(store),
            locks,
        }
    }

    pub fn locks(&self) -> &Arc<ScopeLocks> {
        &self.locks
    }

    /// Execute `plan` on behalf of `auth`.
    pub fn run(
        &self,
        plan: &DuplicationPlan,
        auth: &AuthContext,
    ) -> ApplicationResult<DuplicationSummary> {
        let _guard = self
            .locks
            .try_acquire(&plan.repeater_node_id, &plan.scope_id)?;

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "duplication",
            run_id = %run_id,
            repeater = %plan.repeater_node_id,
            scope = %plan.scope_id
        );
        let _enter = span.enter();

        let journal = RunJournal::new();
        let mut stage = StageTracker::start(&journal);
        if plan.nodes.is_empty() && plan.variables.is_empty() {
            info!("run: empty plan");
        }

        let now = Utc::now();
        let resolved = self.resolver.resolve(plan, auth)?;
        journal.record(RunEvent::TemplatesResolved {
            to_duplicate: resolved.to_duplicate.len(),
            structural: resolved.structural.len(),
        });
        stage.advance(RunStage::TemplatesResolved)?;

        let mut reconciliation = ReconciliationMap::new();
        let records = self
            .cloner
            .clone_all(plan, &resolved, &mut reconciliation, &journal, now)?;
        stage.advance(RunStage::NodesCloned)?;

        let outcome = self
            .rewriter
            .rewrite(plan, &records, &reconciliation, &journal);
        stage.advance(RunStage::ReferencesRewritten)?;

        let mut clone_ids: Vec<String> = records
            .iter()
            .flat_map(|r| r.node_ids.iter().cloned())
            .collect();
        clone_ids.extend(outcome.display_node_ids.iter().cloned());
        let template_ids: HashSet<String> = records
            .iter()
            .flat_map(|r| r.original_ids().cloned())
            .collect();
        if let Err(e) = self.isolation.enforce(&clone_ids, &template_ids, &journal) {
            warn!("run: isolation failed: {e}");
            journal.record(RunEvent::StageFailed {
                stage: RunStage::Isolated,
                reason: e.to_string(),
            });
        }
        stage.advance(RunStage::Isolated)?;

        self.recalculation
            .recalculate(&records, &outcome.display_node_ids, &journal, now);
        stage.advance(RunStage::Recalculated)?;

        stage.advance(RunStage::Assembled)?;
        let summary = self.assembler.assemble(
            &run_id,
            stage.stage,
            &records,
            &outcome.display_node_ids,
            &journal,
        );
        info!(
            "run: {} duplicated, {} rows, {} warnings",
            summary.count,
            summary.nodes.len(),
            summary.diagnostics.counters.fixup_warnings
                + summary.diagnostics.counters.isolation_warnings
        );
        Ok(summary)
    }
}
