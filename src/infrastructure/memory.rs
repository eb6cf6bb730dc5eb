//! In-memory tree store with JSON snapshot persistence
//!
//! State lives behind one `RwLock`; `apply` validates the whole batch before touching
//! anything, so a rejected batch leaves the store unchanged.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::{CalculationAudit, LookupTable, Node, Rule, Tree, Variable};
use crate::infrastructure::traits::{StoreError, StoreResult, TreeStore, WriteBatch};
use crate::infrastructure::{InfraError, InfraResult};

/// Serializable content of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TreeSnapshot {
    pub trees: Vec<Tree>,
    pub nodes: Vec<Node>,
    pub variables: Vec<Variable>,
    pub rules: Vec<Rule>,
    pub tables: Vec<LookupTable>,
    pub audits: Vec<CalculationAudit>,
}

impl TreeSnapshot {
    /// Read a snapshot from a JSON file.
    pub fn load(path: &Path) -> InfraResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| InfraError::io(format!("read snapshot {}", path.display()), e))?;
        serde_json::from_str(&content)
            .map_err(|e| InfraError::json(format!("parse snapshot {}", path.display()), e))
    }

    /// Write the snapshot as pretty JSON.
    pub fn save(&self, path: &Path) -> InfraResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| InfraError::json("serialize snapshot", e))?;
        std::fs::write(path, content)
            .map_err(|e| InfraError::io(format!("write snapshot {}", path.display()), e))
    }
}

#[derive(Debug, Default)]
struct StoreState {
    trees: BTreeMap<String, Tree>,
    nodes: BTreeMap<String, Node>,
    variables: BTreeMap<String, Variable>,
    rules: BTreeMap<String, Rule>,
    tables: BTreeMap<String, LookupTable>,
    audits: Vec<CalculationAudit>,
}

/// Reference [`TreeStore`] implementation.
#[derive(Debug, Default)]
pub struct InMemoryTreeStore {
    state: RwLock<StoreState>,
}

impl InMemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: TreeSnapshot) -> Self {
        let state = StoreState {
            trees: by_id(snapshot.trees, |t| &t.id),
            nodes: by_id(snapshot.nodes, |n| &n.id),
            variables: by_id(snapshot.variables, |v| &v.id),
            rules: by_id(snapshot.rules, |r| &r.id),
            tables: by_id(snapshot.tables, |t| &t.id),
            audits: snapshot.audits,
        };
        debug!(
            "from_snapshot: {} trees, {} nodes, {} variables",
            state.trees.len(),
            state.nodes.len(),
            state.variables.len()
        );
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        let state = self.state.read();
        TreeSnapshot {
            trees: state.trees.values().cloned().collect(),
            nodes: state.nodes.values().cloned().collect(),
            variables: state.variables.values().cloned().collect(),
            rules: state.rules.values().cloned().collect(),
            tables: state.tables.values().cloned().collect(),
            audits: state.audits.clone(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn audits(&self) -> Vec<CalculationAudit> {
        self.state.read().audits.clone()
    }

    fn check_batch(state: &StoreState, batch: &WriteBatch) -> StoreResult<()> {
        check_inserts("node", batch.new_nodes.iter().map(|n| &n.id), &state.nodes)?;
        check_inserts(
            "variable",
            batch.new_variables.iter().map(|v| &v.id),
            &state.variables,
        )?;
        check_inserts("rule", batch.new_rules.iter().map(|r| &r.id), &state.rules)?;
        check_inserts("table", batch.new_tables.iter().map(|t| &t.id), &state.tables)?;

        let inserted_nodes: HashSet<&String> = batch.new_nodes.iter().map(|n| &n.id).collect();
        for node in &batch.node_updates {
            if !state.nodes.contains_key(&node.id) && !inserted_nodes.contains(&node.id) {
                return Err(StoreError::Missing {
                    entity: "node",
                    id: node.id.clone(),
                });
            }
        }
        let inserted_vars: HashSet<&String> = batch.new_variables.iter().map(|v| &v.id).collect();
        for variable in &batch.variable_updates {
            if !state.variables.contains_key(&variable.id) && !inserted_vars.contains(&variable.id)
            {
                return Err(StoreError::Missing {
                    entity: "variable",
                    id: variable.id.clone(),
                });
            }
        }
        let inserted_rules: HashSet<&String> = batch.new_rules.iter().map(|r| &r.id).collect();
        if let Some(rule) = batch
            .rule_updates
            .iter()
            .find(|r| !state.rules.contains_key(&r.id) && !inserted_rules.contains(&r.id))
        {
            return Err(StoreError::Missing {
                entity: "rule",
                id: rule.id.clone(),
            });
        }
        Ok(())
    }
}

fn by_id<T>(items: Vec<T>, key: impl Fn(&T) -> &String) -> BTreeMap<String, T> {
    items
        .into_iter()
        .map(|item| (key(&item).clone(), item))
        .collect()
}

fn check_inserts<'a, T>(
    entity: &'static str,
    ids: impl Iterator<Item = &'a String>,
    existing: &BTreeMap<String, T>,
) -> StoreResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if existing.contains_key(id) || !seen.insert(id) {
            return Err(StoreError::Conflict {
                entity,
                id: id.clone(),
            });
        }
    }
    Ok(())
}

impl TreeStore for InMemoryTreeStore {
    fn tree(&self, tree_id: &str) -> StoreResult<Option<Tree>> {
        Ok(self.state.read().trees.get(tree_id).cloned())
    }

    fn node(&self, id: &str) -> StoreResult<Option<Node>> {
        Ok(self.state.read().nodes.get(id).cloned())
    }

    fn nodes(&self, ids: &[String]) -> StoreResult<Vec<Node>> {
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect())
    }

    fn children(&self, parent_id: &str) -> StoreResult<Vec<Node>> {
        let state = self.state.read();
        let mut children: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| n.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        Ok(children)
    }

    fn find_copy(
        &self,
        scope_id: &str,
        template_id: &str,
        suffix: u32,
    ) -> StoreResult<Option<Node>> {
        let state = self.state.read();
        Ok(state
            .nodes
            .values()
            .find(|n| {
                n.metadata.repeat_scope_id.as_deref() == Some(scope_id)
                    && n.metadata.source_template_id.as_deref() == Some(template_id)
                    && n.metadata.copy_suffix == Some(suffix)
            })
            .cloned())
    }

    fn variable(&self, id: &str) -> StoreResult<Option<Variable>> {
        Ok(self.state.read().variables.get(id).cloned())
    }

    fn variables_for_node(&self, node_id: &str) -> StoreResult<Vec<Variable>> {
        let state = self.state.read();
        Ok(state
            .variables
            .values()
            .filter(|v| v.node_id == node_id)
            .cloned()
            .collect())
    }

    fn rule(&self, id: &str) -> StoreResult<Option<Rule>> {
        Ok(self.state.read().rules.get(id).cloned())
    }

    fn rules_for_node(&self, node_id: &str) -> StoreResult<Vec<Rule>> {
        let state = self.state.read();
        Ok(state
            .rules
            .values()
            .filter(|r| r.node_id == node_id)
            .cloned()
            .collect())
    }

    fn table(&self, id: &str) -> StoreResult<Option<LookupTable>> {
        Ok(self.state.read().tables.get(id).cloned())
    }

    fn tables_for_node(&self, node_id: &str) -> StoreResult<Vec<LookupTable>> {
        let state = self.state.read();
        Ok(state
            .tables
            .values()
            .filter(|t| t.node_id == node_id)
            .cloned()
            .collect())
    }

    #[instrument(level = "trace", skip_all)]
    fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut state = self.state.write();
        Self::check_batch(&state, &batch)?;

        for node in batch.new_nodes.into_iter().chain(batch.node_updates) {
            state.nodes.insert(node.id.clone(), node);
        }
        for variable in batch
            .new_variables
            .into_iter()
            .chain(batch.variable_updates)
        {
            state.variables.insert(variable.id.clone(), variable);
        }
        for rule in batch.new_rules.into_iter().chain(batch.rule_updates) {
            state.rules.insert(rule.id.clone(), rule);
        }
        for table in batch.new_tables {
            state.tables.insert(table.id.clone(), table);
        }
        Ok(())
    }

    fn record_calculation(&self, audit: CalculationAudit) -> StoreResult<()> {
        self.state.write().audits.push(audit);
        Ok(())
    }
}
