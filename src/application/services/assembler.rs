//! Response assembly

use std::sync::Arc;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, warn};

use crate::application::events::{RunCounters, RunEvent, RunJournal};
use crate::application::services::cloner::CloneRecord;
use crate::application::StoreResultExt;
use crate::domain::{Node, NodeMetadata, NodeType, RunStage};
use crate::infrastructure::traits::TreeStore;

/// Column projection used for every node read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub tree_id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    pub order: i64,
    pub value: Option<String>,
    pub metadata: NodeMetadata,
    pub linked_variable_ids: Vec<String>,
    pub calculated_value: Option<String>,
    pub calculated_at: Option<DateTime<Utc>>,
    pub calculated_by: Option<String>,
}

impl From<&Node> for NodeRow {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            parent_id: node.parent_id.clone(),
            tree_id: node.tree_id.clone(),
            node_type: node.node_type,
            label: node.label.clone(),
            order: node.order,
            value: node.value.clone(),
            metadata: node.metadata.clone(),
            linked_variable_ids: node.linked_variable_ids.clone(),
            calculated_value: node.calculated_value.clone(),
            calculated_at: node.calculated_at,
            calculated_by: node.calculated_by.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicatedEntry {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub parent_id: Option<String>,
    pub source_template_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDiagnostics {
    pub run_id: String,
    pub stage: RunStage,
    pub events: Vec<RunEvent>,
    pub counters: RunCounters,
}

/// Result of one duplication run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicationSummary {
    pub duplicated: Vec<DuplicatedEntry>,
    pub nodes: Vec<NodeRow>,
    pub count: usize,
    pub diagnostics: RunDiagnostics,
}

impl DuplicationSummary {
    pub fn node(&self, id: &str) -> Option<&NodeRow> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

pub struct ResponseAssembler {
    store: Arc<dyn TreeStore>,
}

impl ResponseAssembler {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    /// Load the final rows of every touched node.
    ///
    /// Cloning already succeeded when this runs, so a failed read is recorded as
    /// `StageFailed` and the summary carries whatever could be loaded.
    pub fn assemble(
        &self,
        run_id: &str,
        stage: RunStage,
        records: &[CloneRecord],
        display_node_ids: &[String],
        journal: &RunJournal,
    ) -> DuplicationSummary {
        let roots: Vec<String> = records.iter().map(|r| r.root_id.clone()).unique().collect();
        let duplicated: Vec<DuplicatedEntry> = self
            .load(&roots, "load clone roots", journal)
            .iter()
            .map(|n| DuplicatedEntry {
                id: n.id.clone(),
                label: n.label.clone(),
                node_type: n.node_type,
                parent_id: n.parent_id.clone(),
                source_template_id: n.metadata.source_template_id.clone(),
            })
            .collect();

        let touched: Vec<String> = records
            .iter()
            .flat_map(|r| r.node_ids.iter())
            .chain(display_node_ids)
            .unique()
            .cloned()
            .collect();
        let nodes: Vec<NodeRow> = self
            .load(&touched, "load touched nodes", journal)
            .iter()
            .map(NodeRow::from)
            .collect();

        debug!(
            "assemble: {} duplicated, {} rows",
            duplicated.len(),
            nodes.len()
        );
        DuplicationSummary {
            count: duplicated.len(),
            duplicated,
            nodes,
            diagnostics: Self::diagnostics(run_id, stage, journal),
        }
    }

    fn load(&self, ids: &[String], context: &str, journal: &RunJournal) -> Vec<Node> {
        match self.store.nodes(ids).with_store_context(context) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("assemble: {e}");
                journal.record(RunEvent::StageFailed {
                    stage: RunStage::Assembled,
                    reason: e.to_string(),
                });
                Vec::new()
            }
        }
    }

    fn diagnostics(run_id: &str, stage: RunStage, journal: &RunJournal) -> RunDiagnostics {
        RunDiagnostics {
            run_id: run_id.to_string(),
            stage,
            events: journal.events(),
            counters: journal.counters(),
        }
    }
}
