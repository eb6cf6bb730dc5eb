//! Reference rewriting after cloning
//!
//! Four passes run strictly in order: shared references, lookup tables, planned
//! variables, parent re-homing. A failure inside a pass is recorded as a
//! `FixupWarning` for the affected clone and never blocks the other clones.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::application::events::{FixupPass, RunEvent, RunJournal};
use crate::application::services::cloner::CloneRecord;
use crate::application::{ApplicationError, ApplicationResult, StoreResultExt};
use crate::config::Settings;
use crate::domain::{
    planned_id, remap_tokens, Capability, DomainError, DuplicationPlan, LookupTable, Node, NodeType,
    PlannedVariable, ReconciliationMap, Variable,
};
use crate::infrastructure::traits::{TreeStore, WriteBatch};

/// Rows added by the rewriter, reported to later stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub table_ids: Vec<String>,
    pub variable_ids: Vec<String>,
    pub display_node_ids: Vec<String>,
}

/// Run-scoped `(templateTableId, suffix) -> tableId` cache shared by all clones.
#[derive(Debug, Default)]
pub struct TableCopyCache {
    entries: HashMap<(String, u32), String>,
}

impl TableCopyCache {
    pub fn get(&self, table_id: &str, suffix: u32) -> Option<&str> {
        self.entries
            .get(&(table_id.to_string(), suffix))
            .map(String::as_str)
    }

    pub fn insert(&mut self, table_id: &str, suffix: u32, copy_id: String) {
        self.entries.insert((table_id.to_string(), suffix), copy_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct ReferenceRewriter {
    store: Arc<dyn TreeStore>,
    settings: Arc<Settings>,
}

impl ReferenceRewriter {
    pub fn new(store: Arc<dyn TreeStore>, settings: Arc<Settings>) -> Self {
        Self { store, settings }
    }

    /// Run all four passes.
    #[instrument(level = "debug", skip_all, fields(clones = records.len()))]
    pub fn rewrite(
        &self,
        plan: &DuplicationPlan,
        records: &[CloneRecord],
        reconciliation: &ReconciliationMap,
        journal: &RunJournal,
    ) -> RewriteOutcome {
        let mut outcome = RewriteOutcome::default();

        for record in records {
            if let Err(e) = self.propagate_shared_references(record, reconciliation) {
                warn_fixup(journal, FixupPass::SharedReferences, &record.root_id, &e);
            }
            if let Err(e) = self.remap_rule_references(record, reconciliation) {
                warn_fixup(journal, FixupPass::SharedReferences, &record.root_id, &e);
            }
        }

        let mut cache = TableCopyCache::default();
        for record in records {
            match self.duplicate_tables(record, reconciliation, &mut cache) {
                Ok(ids) => outcome.table_ids.extend(ids),
                Err(e) => warn_fixup(journal, FixupPass::Tables, &record.root_id, &e),
            }
        }
        debug!("rewrite: table cache holds {} entries", cache.len());

        for planned in &plan.variables {
            match self.duplicate_variable(plan, planned, reconciliation, journal) {
                Ok(Some((variable_id, display_id))) => {
                    outcome.variable_ids.push(variable_id);
                    outcome.display_node_ids.extend(display_id);
                }
                Ok(None) => {}
                Err(e) => warn_fixup(journal, FixupPass::Variables, &planned.target_node_id, &e),
            }
        }

        self.rehome_parents(records, reconciliation, journal);
        outcome
    }

    /// Pass (a): point shared references and linked capabilities at same-suffix clones
    /// where one exists.
    pub fn propagate_shared_references(
        &self,
        record: &CloneRecord,
        reconciliation: &ReconciliationMap,
    ) -> ApplicationResult<()> {
        let nodes = self
            .store
            .nodes(&record.node_ids)
            .with_store_context("load clone nodes")?;
        let remap = |ids: &[String]| -> Vec<String> {
            ids.iter()
                .map(|id| {
                    reconciliation
                        .resolve(&planned_id(id, record.suffix))
                        .map(str::to_string)
                        .or_else(|| record.id_map.get(id).cloned())
                        .unwrap_or_else(|| id.clone())
                })
                .collect()
        };

        let mut updates = Vec::new();
        for mut node in nodes {
            let shared = remap(&node.shared_reference_ids);
            let formulas = remap(&node.linked_formula_ids);
            let conditions = remap(&node.linked_condition_ids);
            let tables = remap(&node.linked_table_ids);
            if shared != node.shared_reference_ids
                || formulas != node.linked_formula_ids
                || conditions != node.linked_condition_ids
                || tables != node.linked_table_ids
            {
                node.shared_reference_ids = shared;
                node.linked_formula_ids = formulas;
                node.linked_condition_ids = conditions;
                node.linked_table_ids = tables;
                updates.push(node);
            }
        }

        debug!(
            "propagate_shared_references: {} nodes updated in {}",
            updates.len(),
            record.root_id
        );
        if updates.is_empty() {
            return Ok(());
        }
        self.store
            .apply(WriteBatch::updating_nodes(updates))
            .with_store_context("update shared references")
    }

    /// Pass (a), rules: rewrite formula tokens and variable capabilities of a clone that
    /// still name ids another plan entry cloned under the same suffix.
    pub fn remap_rule_references(
        &self,
        record: &CloneRecord,
        reconciliation: &ReconciliationMap,
    ) -> ApplicationResult<()> {
        let resolve = |id: &str| {
            reconciliation
                .resolve(&planned_id(id, record.suffix))
                .map(str::to_string)
        };

        let mut batch = WriteBatch::default();
        for node_id in &record.node_ids {
            for mut rule in self
                .store
                .rules_for_node(node_id)
                .with_store_context("load clone rules")?
            {
                let tokens = remap_tokens(&rule.tokens, resolve, resolve);
                if tokens != rule.tokens {
                    rule.tokens = tokens;
                    batch.rule_updates.push(rule);
                }
            }
            for mut variable in self
                .store
                .variables_for_node(node_id)
                .with_store_context("load clone variables")?
            {
                let capability = variable.capability();
                let Some(actual) = capability.target_id().and_then(resolve) else {
                    continue;
                };
                let source_ref = capability.remap(|_| actual).encode();
                if source_ref != variable.source_ref {
                    variable.source_ref = source_ref;
                    batch.variable_updates.push(variable);
                }
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        debug!(
            "remap_rule_references: {} rules, {} variables in {}",
            batch.rule_updates.len(),
            batch.variable_updates.len(),
            record.root_id
        );
        self.store
            .apply(batch)
            .with_store_context("update rule references")
    }

    /// Pass (b): materialize the tables a clone owns plus their lookup variables.
    pub fn duplicate_tables(
        &self,
        record: &CloneRecord,
        reconciliation: &ReconciliationMap,
        cache: &mut TableCopyCache,
    ) -> ApplicationResult<Vec<String>> {
        let suffix = record.suffix;
        let mut batch = WriteBatch::default();
        let mut touched_nodes: HashMap<String, Node> = HashMap::new();

        for (original_id, copy_id) in &record.table_id_map {
            if cache.get(original_id, suffix).is_some() {
                continue;
            }
            if self
                .store
                .table(copy_id)
                .with_store_context("look up table copy")?
                .is_some()
            {
                cache.insert(original_id, suffix, copy_id.clone());
                continue;
            }
            let original = self
                .store
                .table(original_id)
                .with_store_context("load template table")?
                .ok_or_else(|| DomainError::not_found("table", original_id))?;

            let resolve_node = |id: &String| {
                reconciliation
                    .resolve(&planned_id(id, suffix))
                    .map(str::to_string)
                    .or_else(|| record.id_map.get(id).cloned())
                    .unwrap_or_else(|| id.clone())
            };
            let mut copy = LookupTable {
                id: copy_id.clone(),
                node_id: resolve_node(&original.node_id),
                name: original.name.clone(),
                columns: original.columns.clone(),
                rows: original.rows.clone(),
                source_node_ids: original
                    .source_node_ids
                    .iter()
                    .map(|id| resolve_node(id))
                    .collect(),
                linked_table_ids: original
                    .linked_table_ids
                    .iter()
                    .map(|t| {
                        record
                            .table_id_map
                            .get(t)
                            .cloned()
                            .or_else(|| cache.get(t, suffix).map(str::to_string))
                            .unwrap_or_else(|| t.clone())
                    })
                    .collect(),
                lookup_variable_id: None,
            };

            if let Some(variable_id) = &original.lookup_variable_id {
                if let Some(variable) = self
                    .store
                    .variable(variable_id)
                    .with_store_context("load lookup variable")?
                {
                    let lookup = Variable {
                        id: planned_id(&variable.id, suffix),
                        node_id: copy.node_id.clone(),
                        exposed_key: planned_id(&variable.exposed_key, suffix),
                        display_name: variable.display_name.clone(),
                        source_ref: Capability::Table(copy.id.clone()).encode(),
                        computed_value: None,
                        lookup: true,
                    };
                    copy.lookup_variable_id = Some(lookup.id.clone());

                    let owner = match touched_nodes.remove(&copy.node_id) {
                        Some(node) => Some(node),
                        None => self
                            .store
                            .node(&copy.node_id)
                            .with_store_context("load table owner")?,
                    };
                    if let Some(mut owner) = owner {
                        if !owner.linked_variable_ids.contains(&lookup.id) {
                            owner.linked_variable_ids.push(lookup.id.clone());
                        }
                        touched_nodes.insert(owner.id.clone(), owner);
                    }
                    if self
                        .store
                        .variable(&lookup.id)
                        .with_store_context("look up lookup variable copy")?
                        .is_none()
                    {
                        batch.new_variables.push(lookup);
                    }
                }
            }

            cache.insert(original_id, suffix, copy.id.clone());
            batch.new_tables.push(copy);
        }

        let table_ids: Vec<String> = batch.new_tables.iter().map(|t| t.id.clone()).collect();
        batch.node_updates = touched_nodes.into_values().collect();
        if batch.is_empty() {
            return Ok(table_ids);
        }
        debug!(
            "duplicate_tables: {} tables for {}",
            table_ids.len(),
            record.root_id
        );
        self.store
            .apply(batch)
            .with_store_context("write table copies")?;
        Ok(table_ids)
    }

    /// Pass (c): copy one planned variable onto its reconciled target node.
    ///
    /// Returns the new variable id and the display node id, if one was created.
    pub fn duplicate_variable(
        &self,
        plan: &DuplicationPlan,
        planned: &PlannedVariable,
        reconciliation: &ReconciliationMap,
        journal: &RunJournal,
    ) -> ApplicationResult<Option<(String, Option<String>)>> {
        let template = self
            .store
            .variable(&planned.template_variable_id)
            .with_store_context("load template variable")?
            .ok_or_else(|| DomainError::not_found("variable", &planned.template_variable_id))?;
        if template.is_lookup(&self.settings.lookup_marker) {
            debug!(
                "duplicate_variable: {} is a lookup variable, regenerated with its table",
                template.id
            );
            return Ok(None);
        }

        let resolution = reconciliation.resolve_or_literal(&planned.target_node_id);
        if resolution.is_fallback() {
            journal.record(RunEvent::ReconciliationFallback {
                planned_id: planned.target_node_id.clone(),
            });
        }
        let mut target = self
            .store
            .node(resolution.id())
            .with_store_context("load variable target")?
            .ok_or_else(|| DomainError::not_found("node", resolution.id()))?;

        let suffix = reconciliation.resolve_suffix(
            target.metadata.copy_suffix,
            &target.id,
            Some(planned.planned_suffix),
            self.settings.default_suffix,
        );
        let variable_id = planned
            .planned_variable_id
            .clone()
            .unwrap_or_else(|| planned_id(&template.id, suffix));
        if self
            .store
            .variable(&variable_id)
            .with_store_context("look up variable copy")?
            .is_some()
        {
            debug!("duplicate_variable: {variable_id} exists, skipping");
            return Ok(None);
        }

        let capability = self.remap_capability(&template.capability(), suffix)?;
        let variable = Variable {
            id: variable_id.clone(),
            node_id: target.id.clone(),
            exposed_key: planned_id(&template.exposed_key, suffix),
            display_name: template.display_name.clone(),
            source_ref: capability.encode(),
            computed_value: None,
            lookup: false,
        };

        let mut batch = WriteBatch::default();
        let display_id = if self.settings.create_display_nodes {
            self.display_node(plan, &target, &variable, suffix)?
                .map(|display| {
                    let id = display.id.clone();
                    batch.new_nodes.push(display);
                    id
                })
        } else {
            None
        };

        if !target.linked_variable_ids.contains(&variable_id) {
            target.linked_variable_ids.push(variable_id.clone());
        }
        batch.new_variables.push(variable);
        batch.node_updates.push(target);
        self.store
            .apply(batch)
            .with_store_context("write variable copy")?;

        Ok(Some((variable_id, display_id)))
    }

    /// Same-suffix copy of the rule/table a capability targets, when it exists.
    fn remap_capability(&self, capability: &Capability, suffix: u32) -> ApplicationResult<Capability> {
        let Some(target) = capability.target_id() else {
            return Ok(Capability::Neutral);
        };
        let candidate = planned_id(target, suffix);
        let exists = match capability {
            Capability::Table(_) => self
                .store
                .table(&candidate)
                .with_store_context("look up table copy")?
                .is_some(),
            _ => self
                .store
                .rule(&candidate)
                .with_store_context("look up rule copy")?
                .is_some(),
        };
        Ok(if exists {
            capability.remap(|_| candidate)
        } else {
            capability.clone()
        })
    }

    fn display_node(
        &self,
        plan: &DuplicationPlan,
        target: &Node,
        variable: &Variable,
        suffix: u32,
    ) -> ApplicationResult<Option<Node>> {
        let id = format!("{}-display", variable.id);
        if self
            .store
            .node(&id)
            .with_store_context("look up display node")?
            .is_some()
        {
            return Ok(None);
        }
        let mut display = Node::new(id, Some(target.id.as_str()), &target.tree_id, NodeType::Display);
        display.label = variable.display_name.clone();
        display.metadata.display_for_variable = Some(variable.id.clone());
        display.metadata.copy_suffix = Some(suffix);
        display.metadata.repeat_scope_id = Some(plan.scope_id.clone());
        display.metadata.duplicated_from_repeater = Some(plan.repeater_node_id.clone());
        display.metadata.duplicated_at = target.metadata.duplicated_at;
        Ok(Some(display))
    }

    /// Pass (d): move clone roots under the clone of their original parent.
    ///
    /// All moves are written in one batch.
    pub fn rehome_parents(
        &self,
        records: &[CloneRecord],
        reconciliation: &ReconciliationMap,
        journal: &RunJournal,
    ) {
        let mut moves = Vec::new();
        let mut moved_ids = HashSet::new();

        for record in records {
            match self.rehome_target(record, reconciliation) {
                Ok(Some(root)) => {
                    if moved_ids.insert(root.id.clone()) {
                        moves.push(root);
                    }
                }
                Ok(None) => {}
                Err(e) => warn_fixup(journal, FixupPass::ParentRehoming, &record.root_id, &e),
            }
        }

        if moves.is_empty() {
            return;
        }
        debug!("rehome_parents: moving {} clone roots", moves.len());
        if let Err(e) = self
            .store
            .apply(WriteBatch::updating_nodes(moves))
            .with_store_context("re-home clone roots")
        {
            for id in moved_ids {
                warn_fixup(journal, FixupPass::ParentRehoming, &id, &e);
            }
        }
    }

    fn rehome_target(
        &self,
        record: &CloneRecord,
        reconciliation: &ReconciliationMap,
    ) -> ApplicationResult<Option<Node>> {
        let mut root = self
            .store
            .node(&record.root_id)
            .with_store_context("load clone root")?
            .ok_or_else(|| DomainError::not_found("node", &record.root_id))?;
        let (Some(suffix), Some(original_id)) = (
            root.metadata.copy_suffix,
            root.metadata.original_node_id().map(str::to_string),
        ) else {
            return Ok(None);
        };
        let Some(original) = self
            .store
            .node(&original_id)
            .with_store_context("load original node")?
        else {
            return Ok(None);
        };
        let Some(parent_base) = original.parent_id else {
            return Ok(None);
        };
        // Parent copied in this run, as a template or inside another template's subtree
        let Some(target) = reconciliation
            .resolve(&planned_id(&parent_base, suffix))
            .map(str::to_string)
        else {
            return Ok(None);
        };
        if root.parent_id.as_deref() == Some(target.as_str()) {
            return Ok(None);
        }
        if self
            .store
            .node(&target)
            .with_store_context("look up parent clone")?
            .is_none()
        {
            debug!("rehome_target: {target} does not exist, keeping parent of {}", root.id);
            return Ok(None);
        }

        debug!("rehome_target: {} -> {}", root.id, target);
        root.parent_id = Some(target);
        Ok(Some(root))
    }
}

fn warn_fixup(journal: &RunJournal, pass: FixupPass, node_id: &str, error: &ApplicationError) {
    journal.record(RunEvent::FixupWarning {
        pass,
        node_id: node_id.to_string(),
        reason: error.to_string(),
    });
}
