//! Duplication plan: externally computed, consumed exactly once per run.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedNode {
    pub template_node_id: String,
    /// Id the planner expects; the actual clone id may drift from it.
    #[serde(default)]
    pub planned_target_node_id: Option<String>,
    pub planned_suffix: u32,
}

impl PlannedNode {
    pub fn new(template_node_id: impl Into<String>, planned_suffix: u32) -> Self {
        let template_node_id = template_node_id.into();
        Self {
            planned_target_node_id: Some(planned_id(&template_node_id, planned_suffix)),
            template_node_id,
            planned_suffix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedVariable {
    pub template_variable_id: String,
    /// Planned id of the node receiving the copy.
    pub target_node_id: String,
    #[serde(default)]
    pub planned_variable_id: Option<String>,
    pub planned_suffix: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicationPlan {
    pub repeater_node_id: String,
    pub scope_id: String,
    #[serde(default)]
    pub nodes: Vec<PlannedNode>,
    #[serde(default)]
    pub variables: Vec<PlannedVariable>,
}

impl DuplicationPlan {
    /// Distinct template ids, in plan order.
    pub fn template_ids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|n| n.template_node_id.clone())
            .unique()
            .collect()
    }

    pub fn covers_template(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|n| n.template_node_id == node_id)
    }

    pub fn covers_variable(&self, variable_id: &str) -> bool {
        self.variables
            .iter()
            .any(|v| v.template_variable_id == variable_id)
    }
}

/// `"{base}-{suffix}"`, the id convention shared by planner and cloner.
pub fn planned_id(base: &str, suffix: u32) -> String {
    format!("{base}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_camel_case_json_when_deserializing_then_plan_is_read() {
        let json = r#"{
            "repeaterNodeId": "R",
            "scopeId": "scope-1",
            "nodes": [{"templateNodeId": "T1", "plannedTargetNodeId": "T1-2", "plannedSuffix": 2}],
            "variables": []
        }"#;

        let plan: DuplicationPlan = serde_json::from_str(json).unwrap();

        assert_eq!(plan.repeater_node_id, "R");
        assert_eq!(plan.nodes[0].planned_suffix, 2);
        assert_eq!(plan.nodes[0].planned_target_node_id.as_deref(), Some("T1-2"));
    }

    #[test]
    fn given_repeated_templates_when_listing_ids_then_deduplicated_in_order() {
        let plan = DuplicationPlan {
            repeater_node_id: "R".into(),
            scope_id: "s".into(),
            nodes: vec![
                PlannedNode::new("B", 1),
                PlannedNode::new("A", 1),
                PlannedNode::new("B", 2),
            ],
            variables: vec![],
        };

        assert_eq!(plan.template_ids(), vec!["B".to_string(), "A".to_string()]);
        assert!(plan.covers_template("A"));
        assert!(!plan.covers_template("C"));
    }
}
