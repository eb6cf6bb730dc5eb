//! Domain entities: core data structures

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::capability::Capability;

/// Kind of a tree node.
///
/// `Section` nodes are structural and never cloned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Section,
    Branch,
    Field,
    Repeater,
    Display,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Section => "section",
            NodeType::Branch => "branch",
            NodeType::Field => "field",
            NodeType::Repeater => "repeater",
            NodeType::Display => "display",
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, NodeType::Section)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration tree owning a set of nodes, scoped to an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub id: String,
    pub organization_id: String,
    #[serde(default)]
    pub name: String,
}

/// Template ids a repeater node duplicates from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeaterConfig {
    #[serde(default)]
    pub template_node_ids: Vec<String>,
}

/// Where, when and from what a clone originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyProvenance {
    pub source_template_id: Option<String>,
    pub copied_from_node_id: String,
    pub copy_suffix: u32,
    pub duplicated_from_repeater: String,
    pub repeat_scope_id: String,
    pub duplicated_at: DateTime<Utc>,
}

/// Free-form node metadata; clones carry their provenance here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copied_from_node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy_suffix: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicated_from_repeater: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_scope_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicated_at: Option<DateTime<Utc>>,
    /// Set on companion display nodes materialized for a variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_for_variable: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub pending_recalculation: bool,
}

impl NodeMetadata {
    /// Write provenance fields. `source_template_id` is only set on clone roots.
    pub fn stamp(&mut self, provenance: &CopyProvenance) {
        self.source_template_id = provenance.source_template_id.clone();
        self.copied_from_node_id = Some(provenance.copied_from_node_id.clone());
        self.copy_suffix = Some(provenance.copy_suffix);
        self.duplicated_from_repeater = Some(provenance.duplicated_from_repeater.clone());
        self.repeat_scope_id = Some(provenance.repeat_scope_id.clone());
        self.duplicated_at = Some(provenance.duplicated_at);
    }

    /// Original node id this clone was copied from, if recoverable.
    pub fn original_node_id(&self) -> Option<&str> {
        self.copied_from_node_id
            .as_deref()
            .or(self.source_template_id.as_deref())
    }
}

/// Hierarchical configuration entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub tree_id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    #[serde(default)]
    pub order: i64,
    /// The node's own raw input.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub metadata: NodeMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeater: Option<RepeaterConfig>,
    #[serde(default)]
    pub shared_reference_ids: Vec<String>,
    #[serde(default)]
    pub linked_formula_ids: Vec<String>,
    #[serde(default)]
    pub linked_condition_ids: Vec<String>,
    #[serde(default)]
    pub linked_table_ids: Vec<String>,
    #[serde(default)]
    pub linked_variable_ids: Vec<String>,
    #[serde(default)]
    pub calculated_value: Option<String>,
    #[serde(default)]
    pub calculated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub calculated_by: Option<String>,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<&str>,
        tree_id: impl Into<String>,
        node_type: NodeType,
    ) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            parent_id: parent_id.map(str::to_string),
            tree_id: tree_id.into(),
            node_type,
            order: 0,
            value: None,
            metadata: NodeMetadata::default(),
            repeater: None,
            shared_reference_ids: Vec::new(),
            linked_formula_ids: Vec::new(),
            linked_condition_ids: Vec::new(),
            linked_table_ids: Vec::new(),
            linked_variable_ids: Vec::new(),
            calculated_value: None,
            calculated_at: None,
            calculated_by: None,
        }
    }

    /// Template ids declared by a repeater node (empty for other nodes).
    pub fn declared_templates(&self) -> &[String] {
        self.repeater
            .as_ref()
            .map(|r| r.template_node_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn clear_calculation(&mut self) {
        self.calculated_value = None;
        self.calculated_at = None;
        self.calculated_by = None;
    }

    /// Value visible to formulas: raw input first, then the computed value.
    pub fn effective_value(&self) -> Option<&str> {
        self.value.as_deref().or(self.calculated_value.as_deref())
    }

    /// All outgoing pointers (shared references plus linked capabilities).
    pub fn outgoing_references(&self) -> impl Iterator<Item = &String> {
        self.shared_reference_ids
            .iter()
            .chain(&self.linked_formula_ids)
            .chain(&self.linked_condition_ids)
            .chain(&self.linked_table_ids)
    }
}

/// Value attached to a node; its capability is encoded in `source_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub id: String,
    pub node_id: String,
    pub exposed_key: String,
    pub display_name: String,
    #[serde(default)]
    pub source_ref: Option<String>,
    #[serde(default)]
    pub computed_value: Option<String>,
    /// Explicit marker for variables derived from a lookup table.
    #[serde(default)]
    pub lookup: bool,
}

impl Variable {
    pub fn capability(&self) -> Capability {
        Capability::decode(self.source_ref.as_deref())
    }

    /// Lookup variables are regenerated with their table, never copied directly.
    ///
    /// The explicit flag wins; rows written before the flag existed are recognized by
    /// `marker` in the display name.
    pub fn is_lookup(&self, marker: &str) -> bool {
        self.lookup || (!marker.is_empty() && self.display_name.contains(marker))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Formula,
    Condition,
}

/// Formula or condition owned by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub node_id: String,
    pub kind: RuleKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Selector/lookup table owned by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupTable {
    pub id: String,
    pub node_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
    /// Nodes whose values select the row.
    #[serde(default)]
    pub source_node_ids: Vec<String>,
    #[serde(default)]
    pub linked_table_ids: Vec<String>,
    /// Derived lookup variable regenerated with the table.
    #[serde(default)]
    pub lookup_variable_id: Option<String>,
}

/// Old/new pair recorded for every recalculated value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationAudit {
    pub node_id: String,
    pub variable_id: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub calculated_at: DateTime<Utc>,
    pub calculated_by: String,
}

/// Caller identity supplied by the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub is_super_admin: bool,
    pub organization_id: Option<String>,
}

impl AuthContext {
    pub fn member_of(organization_id: impl Into<String>) -> Self {
        Self {
            is_super_admin: false,
            organization_id: Some(organization_id.into()),
        }
    }

    pub fn super_admin() -> Self {
        Self {
            is_super_admin: true,
            organization_id: None,
        }
    }

    /// Whether the caller may read templates owned by `organization_id`.
    pub fn may_access(&self, organization_id: &str) -> bool {
        self.is_super_admin || self.organization_id.as_deref() == Some(organization_id)
    }
}

/// Inputs an interpreter may read: exclusively the clone's own subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnInputs {
    pub node_values: BTreeMap<String, Option<String>>,
    pub rules: BTreeMap<String, Rule>,
    pub tables: BTreeMap<String, LookupTable>,
}

impl OwnInputs {
    pub fn value_of(&self, node_id: &str) -> Option<&str> {
        self.node_values.get(node_id).and_then(|v| v.as_deref())
    }

    /// Whether the capability's target is owned by this subtree.
    pub fn owns(&self, capability: &Capability) -> bool {
        match capability {
            Capability::Neutral => true,
            Capability::Formula(id) | Capability::Condition(id) => self.rules.contains_key(id),
            Capability::Table(id) => self.tables.contains_key(id),
        }
    }
}
