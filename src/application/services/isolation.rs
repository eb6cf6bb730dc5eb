//! Isolation of clones from template-computed values

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::application::events::{RunEvent, RunJournal};
use crate::application::{ApplicationResult, StoreResultExt};
use crate::domain::TokenRef;
use crate::infrastructure::traits::{TreeStore, WriteBatch};

pub struct IsolationEnforcer {
    store: Arc<dyn TreeStore>,
}

impl IsolationEnforcer {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    /// Null calculated values on all clones, warn about pointers back into the templates
    /// (node links, rule tokens, variable capabilities) and flag every clone for
    /// recalculation. One store transaction.
    #[instrument(level = "debug", skip_all, fields(clones = clone_ids.len()))]
    pub fn enforce(
        &self,
        clone_ids: &[String],
        template_ids: &HashSet<String>,
        journal: &RunJournal,
    ) -> ApplicationResult<()> {
        let nodes = self
            .store
            .nodes(clone_ids)
            .with_store_context("load clones")?;

        let mut batch = WriteBatch::default();
        for mut node in nodes {
            let warn = |reference: &str| {
                journal.record(RunEvent::IsolationWarning {
                    node_id: node.id.clone(),
                    reference: reference.to_string(),
                });
            };
            node.outgoing_references()
                .filter(|r| template_ids.contains(*r))
                .for_each(|r| warn(r.as_str()));

            for rule in self
                .store
                .rules_for_node(&node.id)
                .with_store_context("load clone rules")?
            {
                rule.tokens
                    .iter()
                    .filter_map(|token| match TokenRef::parse(token)? {
                        TokenRef::Value(id) | TokenRef::Table(id) => Some(id),
                    })
                    .filter(|id| template_ids.contains(*id))
                    .for_each(|id| warn(id));
            }

            for mut variable in self
                .store
                .variables_for_node(&node.id)
                .with_store_context("load clone variables")?
            {
                if let Some(target) = variable.capability().target_id() {
                    if template_ids.contains(target) {
                        warn(target);
                    }
                }
                if variable.computed_value.take().is_some() {
                    batch.variable_updates.push(variable);
                }
            }

            node.clear_calculation();
            node.metadata.pending_recalculation = true;
            batch.node_updates.push(node);
        }

        debug!(
            "enforce: {} nodes, {} variables reset",
            batch.node_updates.len(),
            batch.variable_updates.len()
        );
        if batch.is_empty() {
            return Ok(());
        }
        self.store
            .apply(batch)
            .with_store_context("isolate clones")
    }
}
