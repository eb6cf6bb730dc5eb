//! Subtree cloning
//!
//! Each plan entry becomes one atomic store batch holding the cloned nodes, rules and
//! plain variables. Tables are only planned here (`table_id_map`); the rewriter
//! materializes them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, instrument, warn};

use crate::application::events::{RunEvent, RunJournal};
use crate::application::services::resolver::ResolvedTemplates;
use crate::application::{ApplicationError, ApplicationResult, StoreResultExt};
use crate::config::Settings;
use crate::domain::{
    planned_id, remap_tokens, CopyProvenance, DuplicationPlan, LookupTable, Node,
    ReconciliationMap, Rule, Variable,
};
use crate::infrastructure::traits::{StoreError, StoreResult, TreeStore, WriteBatch};

/// Outcome of cloning (or reusing) one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRecord {
    pub template_id: String,
    pub root_id: String,
    pub suffix: u32,
    /// Original node id to clone id, root included.
    pub id_map: BTreeMap<String, String>,
    pub rule_id_map: BTreeMap<String, String>,
    pub table_id_map: BTreeMap<String, String>,
    /// Clone node ids, root first.
    pub node_ids: Vec<String>,
    pub reused: bool,
}

impl CloneRecord {
    /// Every original id (nodes, rules, tables) this clone was derived from.
    pub fn original_ids(&self) -> impl Iterator<Item = &String> {
        self.id_map
            .keys()
            .chain(self.rule_id_map.keys())
            .chain(self.table_id_map.keys())
    }
}

/// Rows of a template subtree selected for cloning.
#[derive(Debug, Default)]
struct Blueprint {
    nodes: Vec<Node>,
    rules: Vec<Rule>,
    tables: Vec<LookupTable>,
    variables: Vec<Variable>,
}

impl Blueprint {
    fn ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.iter().map(|n| &n.id)
    }
}

pub struct SubtreeCloner {
    store: Arc<dyn TreeStore>,
    settings: Arc<Settings>,
}

impl SubtreeCloner {
    pub fn new(store: Arc<dyn TreeStore>, settings: Arc<Settings>) -> Self {
        Self { store, settings }
    }

    /// Clone every plan entry in order, registering each clone for reconciliation.
    ///
    /// The first failing clone aborts the run with `CloneFailure`.
    pub fn clone_all(
        &self,
        plan: &DuplicationPlan,
        resolved: &ResolvedTemplates,
        reconciliation: &mut ReconciliationMap,
        journal: &RunJournal,
        now: DateTime<Utc>,
    ) -> ApplicationResult<Vec<CloneRecord>> {
        let mut records = Vec::with_capacity(plan.nodes.len());

        for entry in &plan.nodes {
            let template_id = &entry.template_node_id;
            if resolved.is_structural(template_id) {
                journal.record(RunEvent::SectionSkipped {
                    template_id: template_id.clone(),
                });
                continue;
            }
            let Some(template) = resolved.template(template_id) else {
                journal.record(RunEvent::PlanEntrySkipped {
                    template_id: template_id.clone(),
                    reason: "template not resolved".into(),
                });
                continue;
            };

            let record = self.clone_entry(plan, template, entry.planned_suffix, journal, now)?;

            let suffix = reconciliation.resolve_suffix(
                Some(record.suffix),
                &record.root_id,
                Some(entry.planned_suffix),
                self.settings.default_suffix,
            );
            let mut suffixes = vec![suffix];
            if suffix != entry.planned_suffix {
                suffixes.push(entry.planned_suffix);
            }
            for suffix in suffixes {
                reconciliation.register_clone(template_id, &record.root_id, suffix, &record.id_map);
                reconciliation.register_pairs(&record.rule_id_map, suffix);
                reconciliation.register_pairs(&record.table_id_map, suffix);
            }
            if let Some(planned) = &entry.planned_target_node_id {
                if reconciliation.resolve(planned).is_none() {
                    reconciliation.register(planned.clone(), record.root_id.clone());
                }
            }

            records.push(record);
        }

        debug!(
            "clone_all: {} records, {} reconciliation entries",
            records.len(),
            reconciliation.len()
        );
        Ok(records)
    }

    /// Clone one template with `planned_suffix`, reusing an existing canonical copy.
    #[instrument(level = "debug", skip_all, fields(template = %template.id, suffix = planned_suffix))]
    pub fn clone_entry(
        &self,
        plan: &DuplicationPlan,
        template: &Node,
        planned_suffix: u32,
        journal: &RunJournal,
        now: DateTime<Utc>,
    ) -> ApplicationResult<CloneRecord> {
        if let Some(existing) = self
            .store
            .find_copy(&plan.scope_id, &template.id, planned_suffix)
            .with_store_context("look up existing copy")?
        {
            let record = self.reuse(template, existing, planned_suffix)?;
            journal.record(RunEvent::CloneReused {
                template_id: template.id.clone(),
                node_id: record.root_id.clone(),
                suffix: record.suffix,
            });
            return Ok(record);
        }

        let blueprint = self
            .blueprint(plan, template)
            .map_err(|source| self.failure(template, planned_suffix, source))?;

        let record = match self.write_clone(plan, template, &blueprint, planned_suffix, now) {
            Ok(record) => record,
            Err(e) if e.is_conflict() => {
                warn!("clone_entry: {e}, assigning a free suffix");
                let suffix = self
                    .free_suffix(&blueprint)
                    .map_err(|source| self.failure(template, planned_suffix, source))?;
                journal.record(RunEvent::SuffixReassigned {
                    template_id: template.id.clone(),
                    planned_suffix,
                    actual_suffix: suffix,
                });
                self.write_clone(plan, template, &blueprint, suffix, now)
                    .map_err(|source| self.failure(template, suffix, source))?
            }
            Err(source) => return Err(self.failure(template, planned_suffix, source)),
        };

        journal.record(RunEvent::CloneCreated {
            template_id: template.id.clone(),
            node_id: record.root_id.clone(),
            suffix: record.suffix,
            node_count: record.node_ids.len(),
        });
        Ok(record)
    }

    fn failure(&self, template: &Node, suffix: u32, source: StoreError) -> ApplicationError {
        error!(
            template = %template.id,
            suffix,
            error = %source,
            "clone failed, aborting run"
        );
        ApplicationError::CloneFailure {
            template_id: template.id.clone(),
            suffix,
            source,
        }
    }

    /// Rebuild the record of an existing copy from descendant provenance.
    fn reuse(
        &self,
        template: &Node,
        root: Node,
        suffix: u32,
    ) -> ApplicationResult<CloneRecord> {
        debug!("reuse: {} already copied as {}", template.id, root.id);
        let mut id_map = BTreeMap::new();
        id_map.insert(template.id.clone(), root.id.clone());
        let mut node_ids = vec![root.id.clone()];

        let mut stack = vec![root.id.clone()];
        while let Some(parent_id) = stack.pop() {
            let children = self
                .store
                .children(&parent_id)
                .with_store_context("load copy children")?;
            for child in children {
                // Roots of other clones re-homed under this copy
                if child.metadata.source_template_id.is_some() {
                    continue;
                }
                if let Some(original) = child.metadata.copied_from_node_id.as_ref() {
                    id_map.insert(original.clone(), child.id.clone());
                }
                node_ids.push(child.id.clone());
                stack.push(child.id);
            }
        }

        let mut rule_id_map = BTreeMap::new();
        let mut table_id_map = BTreeMap::new();
        for original in id_map.keys() {
            for rule in self
                .store
                .rules_for_node(original)
                .with_store_context("load template rules")?
            {
                let candidate = planned_id(&rule.id, suffix);
                if self.store.rule(&candidate).with_store_context("load rule")?.is_some() {
                    rule_id_map.insert(rule.id, candidate);
                }
            }
            for table in self
                .store
                .tables_for_node(original)
                .with_store_context("load template tables")?
            {
                table_id_map.insert(table.id.clone(), planned_id(&table.id, suffix));
            }
        }

        Ok(CloneRecord {
            template_id: template.id.clone(),
            root_id: root.id,
            suffix,
            id_map,
            rule_id_map,
            table_id_map,
            node_ids,
            reused: true,
        })
    }

    /// Collect the template subtree, skipping sections and nodes other plan entries clone.
    fn blueprint(&self, plan: &DuplicationPlan, template: &Node) -> StoreResult<Blueprint> {
        let mut blueprint = Blueprint::default();
        let mut stack = vec![template.clone()];

        while let Some(node) = stack.pop() {
            let mut children = self.store.children(&node.id)?;
            children.retain(|c| !c.node_type.is_structural() && !plan.covers_template(&c.id));
            // Reverse so the stack yields children in sibling order
            stack.extend(children.into_iter().rev());

            blueprint.rules.extend(self.store.rules_for_node(&node.id)?);
            blueprint.tables.extend(self.store.tables_for_node(&node.id)?);
            blueprint.variables.extend(
                self.store
                    .variables_for_node(&node.id)?
                    .into_iter()
                    .filter(|v| {
                        !v.is_lookup(&self.settings.lookup_marker) && !plan.covers_variable(&v.id)
                    }),
            );
            blueprint.nodes.push(node);
        }

        debug!(
            "blueprint: {} nodes, {} rules, {} tables, {} variables",
            blueprint.nodes.len(),
            blueprint.rules.len(),
            blueprint.tables.len(),
            blueprint.variables.len()
        );
        Ok(blueprint)
    }

    /// Smallest suffix for which no target id of the blueprint exists yet.
    fn free_suffix(&self, blueprint: &Blueprint) -> StoreResult<u32> {
        for candidate in 1..=self.settings.max_suffix_attempts {
            if self.is_free(blueprint, candidate)? {
                debug!("free_suffix: {candidate}");
                return Ok(candidate);
            }
        }
        Err(StoreError::Backend(format!(
            "no free suffix within {} candidates",
            self.settings.max_suffix_attempts
        )))
    }

    fn is_free(&self, blueprint: &Blueprint, suffix: u32) -> StoreResult<bool> {
        for id in blueprint.ids() {
            if self.store.node(&planned_id(id, suffix))?.is_some() {
                return Ok(false);
            }
        }
        for rule in &blueprint.rules {
            if self.store.rule(&planned_id(&rule.id, suffix))?.is_some() {
                return Ok(false);
            }
        }
        for table in &blueprint.tables {
            if self.store.table(&planned_id(&table.id, suffix))?.is_some() {
                return Ok(false);
            }
        }
        for variable in &blueprint.variables {
            if self
                .store
                .variable(&planned_id(&variable.id, suffix))?
                .is_some()
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn write_clone(
        &self,
        plan: &DuplicationPlan,
        template: &Node,
        blueprint: &Blueprint,
        suffix: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<CloneRecord> {
        let id_map: BTreeMap<String, String> = blueprint
            .ids()
            .map(|id| (id.clone(), planned_id(id, suffix)))
            .collect();
        let rule_id_map: BTreeMap<String, String> = blueprint
            .rules
            .iter()
            .map(|r| (r.id.clone(), planned_id(&r.id, suffix)))
            .collect();
        let table_id_map: BTreeMap<String, String> = blueprint
            .tables
            .iter()
            .map(|t| (t.id.clone(), planned_id(&t.id, suffix)))
            .collect();
        let variable_id_map: BTreeMap<String, String> = blueprint
            .variables
            .iter()
            .map(|v| (v.id.clone(), planned_id(&v.id, suffix)))
            .collect();
        let remap = |map: &BTreeMap<String, String>, ids: &[String]| -> Vec<String> {
            ids.iter()
                .map(|id| map.get(id).cloned().unwrap_or_else(|| id.clone()))
                .collect()
        };

        let mut batch = WriteBatch::default();
        for node in &blueprint.nodes {
            let is_root = node.id == template.id;
            let mut clone = node.clone();
            clone.id = planned_id(&node.id, suffix);
            clone.parent_id = if is_root {
                template.parent_id.clone()
            } else {
                node.parent_id
                    .as_ref()
                    .map(|p| id_map.get(p).cloned().unwrap_or_else(|| p.clone()))
            };
            clone.label = planned_id(&node.label, suffix);
            clone.metadata.pending_recalculation = false;
            clone.metadata.stamp(&CopyProvenance {
                source_template_id: is_root.then(|| template.id.clone()),
                copied_from_node_id: node.id.clone(),
                copy_suffix: suffix,
                duplicated_from_repeater: plan.repeater_node_id.clone(),
                repeat_scope_id: plan.scope_id.clone(),
                duplicated_at: now,
            });
            clone.linked_formula_ids = remap(&rule_id_map, &node.linked_formula_ids);
            clone.linked_condition_ids = remap(&rule_id_map, &node.linked_condition_ids);
            clone.linked_table_ids = remap(&table_id_map, &node.linked_table_ids);
            // Plan-covered and lookup variables are attached by the rewriter
            clone.linked_variable_ids = node
                .linked_variable_ids
                .iter()
                .filter_map(|id| variable_id_map.get(id).cloned())
                .collect();
            batch.new_nodes.push(clone);
        }

        for rule in &blueprint.rules {
            batch.new_rules.push(Rule {
                id: rule_id_map[&rule.id].clone(),
                node_id: id_map
                    .get(&rule.node_id)
                    .cloned()
                    .unwrap_or_else(|| rule.node_id.clone()),
                kind: rule.kind,
                name: rule.name.clone(),
                tokens: remap_tokens(
                    &rule.tokens,
                    |id| id_map.get(id).cloned(),
                    |id| table_id_map.get(id).cloned(),
                ),
            });
        }

        for variable in &blueprint.variables {
            let capability = variable.capability().remap(|target| {
                rule_id_map
                    .get(target)
                    .or_else(|| table_id_map.get(target))
                    .cloned()
                    .unwrap_or_else(|| target.to_string())
            });
            batch.new_variables.push(Variable {
                id: variable_id_map[&variable.id].clone(),
                node_id: id_map
                    .get(&variable.node_id)
                    .cloned()
                    .unwrap_or_else(|| variable.node_id.clone()),
                exposed_key: planned_id(&variable.exposed_key, suffix),
                display_name: variable.display_name.clone(),
                source_ref: capability.encode(),
                computed_value: variable.computed_value.clone(),
                lookup: false,
            });
        }

        let node_ids: Vec<String> = batch.new_nodes.iter().map(|n| n.id.clone()).collect();
        self.store.apply(batch)?;
        debug!("write_clone: {} nodes written with suffix {suffix}", node_ids.len());

        Ok(CloneRecord {
            template_id: template.id.clone(),
            root_id: planned_id(&template.id, suffix),
            suffix,
            id_map,
            rule_id_map,
            table_id_map,
            node_ids,
            reused: false,
        })
    }
}
