//! Recalculation of clones from their own inputs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::application::events::{RunEvent, RunJournal};
use crate::application::services::cloner::CloneRecord;
use crate::config::Settings;
use crate::domain::{CalculationAudit, Node, OwnInputs};
use crate::infrastructure::traits::{Interpreter, StoreResult, TreeStore, WriteBatch};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculationSummary {
    pub evaluated: usize,
    pub errors: usize,
}

pub struct RecalculationDriver {
    store: Arc<dyn TreeStore>,
    interpreter: Arc<dyn Interpreter>,
    settings: Arc<Settings>,
}

impl RecalculationDriver {
    pub fn new(
        store: Arc<dyn TreeStore>,
        interpreter: Arc<dyn Interpreter>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            interpreter,
            settings,
        }
    }

    /// Recalculate every clone subtree. Groups follow the tree as it stands after
    /// re-homing: a clone moved under another clone is evaluated with that clone, and
    /// `extra_node_ids` (display nodes) join the subtree of their parent.
    ///
    /// Per-node failures are recorded and counted; they never stop the batch.
    #[instrument(level = "debug", skip_all, fields(clones = records.len()))]
    pub fn recalculate(
        &self,
        records: &[CloneRecord],
        extra_node_ids: &[String],
        journal: &RunJournal,
        now: DateTime<Utc>,
    ) -> RecalculationSummary {
        let mut summary = RecalculationSummary::default();
        let groups = self.groups(records, extra_node_ids, journal, &mut summary);

        let mut seen = HashSet::new();
        for group in groups {
            let group: Vec<String> = group.into_iter().filter(|id| seen.insert(id.clone())).collect();
            if group.is_empty() {
                continue;
            }
            if let Err(e) = self.recalculate_group(&group, journal, now, &mut summary) {
                summary.errors += 1;
                journal.record(RunEvent::RecalculationError {
                    node_id: group[0].clone(),
                    reason: e.to_string(),
                });
            }
        }
        debug!(
            "recalculate: {} evaluated, {} errors",
            summary.evaluated, summary.errors
        );
        summary
    }

    /// One group per outermost clone root, holding every run node below it.
    /// Run nodes not reachable from any root form a trailing group.
    fn groups(
        &self,
        records: &[CloneRecord],
        extra_node_ids: &[String],
        journal: &RunJournal,
        summary: &mut RecalculationSummary,
    ) -> Vec<Vec<String>> {
        let run_nodes: Vec<&String> = records
            .iter()
            .flat_map(|r| r.node_ids.iter())
            .chain(extra_node_ids)
            .collect();
        let run_ids: HashSet<&str> = records
            .iter()
            .flat_map(|r| r.node_ids.iter().map(String::as_str))
            .chain(extra_node_ids.iter().map(String::as_str))
            .collect();

        let mut groups: Vec<Vec<String>> = Vec::new();
        for root in records.iter().map(|r| r.root_id.as_str()).unique() {
            match self.subtree(root, &run_ids) {
                Ok(ids) => groups.push(ids),
                Err(e) => {
                    summary.errors += 1;
                    journal.record(RunEvent::RecalculationError {
                        node_id: root.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let nested: HashSet<String> = groups
            .iter()
            .flat_map(|g| g.iter().skip(1).cloned())
            .collect();
        groups.retain(|g| !nested.contains(&g[0]));

        let covered: HashSet<&str> = groups.iter().flatten().map(String::as_str).collect();
        let loose: Vec<String> = run_nodes
            .iter()
            .filter(|id| !covered.contains(id.as_str()))
            .map(|id| id.to_string())
            .collect();
        if !loose.is_empty() {
            groups.push(loose);
        }
        groups
    }

    /// `root` and its descendants that belong to the run, root first.
    fn subtree(&self, root: &str, run_ids: &HashSet<&str>) -> StoreResult<Vec<String>> {
        let mut ids = vec![root.to_string()];
        let mut stack = vec![root.to_string()];
        while let Some(parent) = stack.pop() {
            for child in self.store.children(&parent)? {
                if run_ids.contains(child.id.as_str()) && !ids.contains(&child.id) {
                    ids.push(child.id.clone());
                    stack.push(child.id);
                }
            }
        }
        Ok(ids)
    }

    /// Own inputs of a clone subtree: its node values, rules and tables.
    pub fn own_inputs(&self, nodes: &[Node]) -> StoreResult<OwnInputs> {
        let mut inputs = OwnInputs::default();
        for node in nodes {
            inputs
                .node_values
                .insert(node.id.clone(), node.effective_value().map(str::to_string));
            for rule in self.store.rules_for_node(&node.id)? {
                inputs.rules.insert(rule.id.clone(), rule);
            }
            for table in self.store.tables_for_node(&node.id)? {
                inputs.tables.insert(table.id.clone(), table);
            }
        }
        Ok(inputs)
    }

    fn recalculate_group(
        &self,
        ids: &[String],
        journal: &RunJournal,
        now: DateTime<Utc>,
        summary: &mut RecalculationSummary,
    ) -> StoreResult<()> {
        let nodes = children_first(self.store.nodes(ids)?);
        let mut inputs = self.own_inputs(&nodes)?;

        for node in nodes {
            let node_id = node.id.clone();
            match self.recalculate_node(node, &mut inputs, journal, now) {
                Ok(NodeOutcome { evaluated, errors }) => {
                    summary.evaluated += evaluated;
                    summary.errors += errors;
                }
                Err(e) => {
                    summary.errors += 1;
                    journal.record(RunEvent::RecalculationError {
                        node_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn recalculate_node(
        &self,
        mut node: Node,
        inputs: &mut OwnInputs,
        journal: &RunJournal,
        now: DateTime<Utc>,
    ) -> StoreResult<NodeOutcome> {
        let mut outcome = NodeOutcome::default();
        let mut batch = WriteBatch::default();
        let mut audits = Vec::new();

        for mut variable in self.store.variables_for_node(&node.id)? {
            let capability = variable.capability();
            if capability.is_neutral() {
                continue;
            }
            if !inputs.owns(&capability) {
                outcome.errors += 1;
                journal.record(RunEvent::RecalculationError {
                    node_id: node.id.clone(),
                    reason: format!("{capability} is outside the clone subtree"),
                });
                continue;
            }
            match self.interpreter.evaluate(&node, &capability, inputs) {
                Ok(value) => {
                    audits.push(CalculationAudit {
                        node_id: node.id.clone(),
                        variable_id: variable.id.clone(),
                        old_value: variable.computed_value.clone(),
                        new_value: value.clone(),
                        calculated_at: now,
                        calculated_by: self.settings.calculated_by.clone(),
                    });
                    journal.record(RunEvent::NodeRecalculated {
                        node_id: node.id.clone(),
                        value: value.clone(),
                    });
                    variable.computed_value = value.clone();
                    node.calculated_value = value;
                    node.calculated_at = Some(now);
                    node.calculated_by = Some(self.settings.calculated_by.clone());
                    batch.variable_updates.push(variable);
                    outcome.evaluated += 1;
                }
                Err(e) => {
                    outcome.errors += 1;
                    journal.record(RunEvent::RecalculationError {
                        node_id: node.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if outcome.errors == 0 {
            node.metadata.pending_recalculation = false;
        }
        inputs.node_values.insert(
            node.id.clone(),
            node.effective_value().map(str::to_string),
        );
        batch.node_updates.push(node);
        self.store.apply(batch)?;
        for audit in audits {
            self.store.record_calculation(audit)?;
        }
        Ok(outcome)
    }
}

#[derive(Debug, Default)]
struct NodeOutcome {
    evaluated: usize,
    errors: usize,
}

/// Order nodes so that every node comes after all of its descendants in the set.
fn children_first(nodes: Vec<Node>) -> Vec<Node> {
    let parents: HashMap<&str, Option<&str>> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.parent_id.as_deref()))
        .collect();
    let depth = |id: &str| {
        let mut depth = 0usize;
        let mut current = parents.get(id).copied().flatten();
        while let Some(parent) = current {
            if depth > parents.len() {
                break;
            }
            match parents.get(parent) {
                Some(next) => {
                    depth += 1;
                    current = *next;
                }
                None => break,
            }
        }
        depth
    };
    let depths: Vec<usize> = nodes.iter().map(|n| depth(&n.id)).collect();
    let mut indexed: Vec<(usize, Node)> = depths.into_iter().zip(nodes).collect();
    indexed.sort_by(|a, b| b.0.cmp(&a.0));
    indexed.into_iter().map(|(_, n)| n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NodeType;

    #[test]
    fn given_nested_subtree_when_ordering_then_children_precede_parents() {
        let nodes = vec![
            Node::new("root", Some("outside"), "t", NodeType::Branch),
            Node::new("mid", Some("root"), "t", NodeType::Branch),
            Node::new("leaf", Some("mid"), "t", NodeType::Field),
            Node::new("sibling", Some("root"), "t", NodeType::Field),
        ];

        let ids: Vec<String> = children_first(nodes).into_iter().map(|n| n.id).collect();

        let pos = |id: &str| ids.iter().position(|i| i == id).unwrap();
        assert!(pos("leaf") < pos("mid"));
        assert!(pos("mid") < pos("root"));
        assert!(pos("sibling") < pos("root"));
    }
}
